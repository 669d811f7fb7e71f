// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// dokwerk-access — who may run operations, and how many.
//
// A durable, append-only usage log in SQLite; calendar-month quota windows;
// the quota enforcer that admits or rejects a request against that log; and
// the API-key directory that turns a credential into a user id.

pub mod enforcer;
pub mod identity;
pub mod usage;
pub mod window;

pub use enforcer::{Decision, QuotaEnforcer, QuotaStatus};
pub use identity::{ApiKeyDirectory, hash_key};
pub use usage::{Admission, SqliteUsageStore, UsageRecord, UsageStore};
pub use window::QuotaWindow;
