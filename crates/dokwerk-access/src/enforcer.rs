// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Quota enforcer — admits a user's request while their usage in the current
// calendar month is below the limit.
//
// `admit` is the entry point for request handling: it checks and records in
// one atomic step through `UsageStore::append_if_below`. `check` and `record`
// remain available separately for read-only queries and for stores that only
// support plain appends.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dokwerk_core::config::QuotaFailMode;
use dokwerk_core::error::{DokwerkError, Result};
use dokwerk_core::types::UserId;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::usage::{UsageRecord, UsageStore};
use crate::window::QuotaWindow;

/// Usage figures for one user in one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub window_start: DateTime<Utc>,
    pub reset_at: DateTime<Utc>,
}

impl QuotaStatus {
    fn new(limit: u64, used: u64, window: &QuotaWindow) -> Self {
        Self {
            limit,
            used,
            remaining: limit.saturating_sub(used),
            window_start: window.start,
            reset_at: window.reset_at(),
        }
    }
}

/// An admission decision with the figures a transport layer puts in
/// rate-limit headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub admitted: bool,
    #[serde(flatten)]
    pub status: QuotaStatus,
    /// Set when the store was unreachable and the fail-open policy admitted
    /// the request without counting it.
    pub unmetered: bool,
}

impl Decision {
    /// The figures behind a `QuotaExceeded` error; `None` for any other error.
    pub fn rejected_by(err: &DokwerkError) -> Option<Self> {
        let DokwerkError::QuotaExceeded {
            limit,
            used,
            reset_at,
        } = err
        else {
            return None;
        };
        let window = QuotaWindow::containing(*reset_at - Duration::nanoseconds(1));
        Some(Self {
            admitted: false,
            status: QuotaStatus::new(*limit, *used, &window),
            unmetered: false,
        })
    }

    pub fn remaining(&self) -> u64 {
        self.status.remaining
    }

    /// `X-RateLimit-*` header pairs.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            ("X-RateLimit-Limit", self.status.limit.to_string()),
            ("X-RateLimit-Remaining", self.status.remaining.to_string()),
            ("X-RateLimit-Reset", self.status.reset_at.to_rfc3339()),
        ]
    }
}

pub struct QuotaEnforcer {
    store: Arc<dyn UsageStore>,
    limit: u64,
    fail_mode: QuotaFailMode,
}

impl QuotaEnforcer {
    pub fn new(store: Arc<dyn UsageStore>, limit: u64, fail_mode: QuotaFailMode) -> Self {
        Self {
            store,
            limit,
            fail_mode,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn fail_mode(&self) -> QuotaFailMode {
        self.fail_mode
    }

    /// Would a request from `user` be admitted now? Records nothing.
    pub fn check(&self, user: UserId) -> Result<Decision> {
        self.check_at(user, Utc::now())
    }

    #[instrument(skip(self))]
    pub fn check_at(&self, user: UserId, now: DateTime<Utc>) -> Result<Decision> {
        let window = QuotaWindow::containing(now);
        match self.store.count_between(user, window.start, window.end) {
            Ok(used) => Ok(Decision {
                admitted: used < self.limit,
                status: QuotaStatus::new(self.limit, used, &window),
                unmetered: false,
            }),
            Err(err) => self.on_store_failure(user, &window, err),
        }
    }

    /// Append one usage record for `user`.
    pub fn record(&self, user: UserId, endpoint: &str) -> Result<()> {
        self.record_at(user, endpoint, Utc::now())
    }

    pub fn record_at(&self, user: UserId, endpoint: &str, now: DateTime<Utc>) -> Result<()> {
        self.store
            .append(&UsageRecord::new(user, endpoint, now))
            .map_err(|err| {
                error!(%user, %err, "usage record failed");
                DokwerkError::QuotaUnavailable(err.to_string())
            })
    }

    /// Check and record in one step. Returns `QuotaExceeded` when the user
    /// has used up the month.
    pub fn admit(&self, user: UserId, endpoint: &str) -> Result<Decision> {
        self.admit_at(user, endpoint, Utc::now())
    }

    #[instrument(skip(self))]
    pub fn admit_at(&self, user: UserId, endpoint: &str, now: DateTime<Utc>) -> Result<Decision> {
        let window = QuotaWindow::containing(now);
        let record = UsageRecord::new(user, endpoint, now);

        let admission = match self.store.append_if_below(&record, &window, self.limit) {
            Ok(admission) => admission,
            Err(err) => return self.on_store_failure(user, &window, err),
        };

        if !admission.admitted {
            info!(%user, used = admission.used_before, "quota exhausted");
            return Err(DokwerkError::QuotaExceeded {
                limit: self.limit,
                used: admission.used_before,
                reset_at: window.reset_at(),
            });
        }

        let status = QuotaStatus::new(self.limit, admission.used_before + 1, &window);
        info!(%user, used = status.used, remaining = status.remaining, "request admitted");
        Ok(Decision {
            admitted: true,
            status,
            unmetered: false,
        })
    }

    /// Current usage for `user`. Always fails when the store is down,
    /// whatever the fail mode.
    pub fn status(&self, user: UserId) -> Result<QuotaStatus> {
        self.status_at(user, Utc::now())
    }

    pub fn status_at(&self, user: UserId, now: DateTime<Utc>) -> Result<QuotaStatus> {
        let window = QuotaWindow::containing(now);
        let used = self
            .store
            .count_between(user, window.start, window.end)
            .map_err(|err| DokwerkError::QuotaUnavailable(err.to_string()))?;
        Ok(QuotaStatus::new(self.limit, used, &window))
    }

    /// The latest `count` admitted operations for `user`, newest first.
    pub fn recent(&self, user: UserId, count: u32) -> Result<Vec<UsageRecord>> {
        self.store
            .recent_for_user(user, count)
            .map_err(|err| DokwerkError::QuotaUnavailable(err.to_string()))
    }

    fn on_store_failure(
        &self,
        user: UserId,
        window: &QuotaWindow,
        err: DokwerkError,
    ) -> Result<Decision> {
        match self.fail_mode {
            QuotaFailMode::Closed => {
                error!(%user, %err, "usage store unavailable; rejecting");
                Err(DokwerkError::QuotaUnavailable(err.to_string()))
            }
            QuotaFailMode::Open => {
                warn!(%user, %err, "usage store unavailable; admitting unmetered");
                Ok(Decision {
                    admitted: true,
                    status: QuotaStatus::new(self.limit, 0, window),
                    unmetered: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::usage::SqliteUsageStore;

    struct DownStore;

    impl UsageStore for DownStore {
        fn append(&self, _record: &UsageRecord) -> Result<()> {
            Err(DokwerkError::Database("connection refused".into()))
        }

        fn count_between(&self, _: UserId, _: DateTime<Utc>, _: DateTime<Utc>) -> Result<u64> {
            Err(DokwerkError::Database("connection refused".into()))
        }

        fn recent_for_user(&self, _: UserId, _: u32) -> Result<Vec<UsageRecord>> {
            Err(DokwerkError::Database("connection refused".into()))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    fn enforcer(limit: u64) -> (Arc<SqliteUsageStore>, QuotaEnforcer) {
        let store = Arc::new(SqliteUsageStore::open_in_memory().unwrap());
        let enforcer = QuotaEnforcer::new(store.clone(), limit, QuotaFailMode::Closed);
        (store, enforcer)
    }

    #[test]
    fn ninety_ninth_to_hundredth_then_rejected() {
        let (_store, enforcer) = enforcer(100);
        let user = UserId(42);
        for _ in 0..99 {
            enforcer.record_at(user, "convert", now()).unwrap();
        }

        let before = enforcer.check_at(user, now()).unwrap();
        assert!(before.admitted);
        assert_eq!(before.remaining(), 1);

        let decision = enforcer.admit_at(user, "ocr", now()).unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.status.used, 100);
        assert_eq!(decision.remaining(), 0);

        let err = enforcer.admit_at(user, "ocr", now()).unwrap_err();
        match &err {
            DokwerkError::QuotaExceeded {
                limit,
                used,
                reset_at,
            } => {
                assert_eq!(*limit, 100);
                assert_eq!(*used, 100);
                assert_eq!(*reset_at, Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap());
            }
            other => panic!("unexpected {other:?}"),
        }

        let rejected = Decision::rejected_by(&err).unwrap();
        assert!(!rejected.admitted);
        assert_eq!(rejected.remaining(), 0);
        assert_eq!(rejected.status.limit, 100);
        assert_eq!(rejected.status.used, 100);
        assert_eq!(rejected.status.window_start, QuotaWindow::containing(now()).start);
        assert_eq!(rejected.status.reset_at, QuotaWindow::containing(now()).reset_at());
        assert!(Decision::rejected_by(&DokwerkError::QuotaUnavailable("down".into())).is_none());

        let status = enforcer.status_at(user, now()).unwrap();
        assert_eq!(status.used, 100);
        assert_eq!(status.remaining, 0);
        assert!(!enforcer.check_at(user, now()).unwrap().admitted);
    }

    #[test]
    fn previous_month_does_not_count() {
        let (_store, enforcer) = enforcer(2);
        let user = UserId(1);
        let september = Utc.with_ymd_and_hms(2026, 9, 30, 23, 59, 59).unwrap();
        enforcer.record_at(user, "convert", september).unwrap();
        enforcer.record_at(user, "convert", september).unwrap();
        assert!(!enforcer.check_at(user, september).unwrap().admitted);

        let decision = enforcer.admit_at(user, "convert", now()).unwrap();
        assert_eq!(decision.status.used, 1);
        assert_eq!(decision.remaining(), 1);
    }

    #[test]
    fn users_are_counted_separately() {
        let (_store, enforcer) = enforcer(1);
        enforcer.admit_at(UserId(1), "ocr", now()).unwrap();
        assert!(enforcer.admit_at(UserId(2), "ocr", now()).is_ok());
        assert!(enforcer.admit_at(UserId(1), "ocr", now()).is_err());
    }

    #[test]
    fn concurrent_admissions_never_exceed_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteUsageStore::open(dir.path().join("usage.db")).unwrap());
        let enforcer = Arc::new(QuotaEnforcer::new(store, 10, QuotaFailMode::Closed));

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let enforcer = Arc::clone(&enforcer);
                std::thread::spawn(move || enforcer.admit_at(UserId(9), "compress", now()).is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 10);
        assert_eq!(enforcer.status_at(UserId(9), now()).unwrap().used, 10);
    }

    #[test]
    fn fail_closed_rejects_when_store_is_down() {
        let enforcer = QuotaEnforcer::new(Arc::new(DownStore), 100, QuotaFailMode::Closed);
        let err = enforcer.admit_at(UserId(1), "ocr", now()).unwrap_err();
        assert!(matches!(err, DokwerkError::QuotaUnavailable(_)));
        assert!(enforcer.check_at(UserId(1), now()).is_err());
    }

    #[test]
    fn fail_open_admits_unmetered() {
        let enforcer = QuotaEnforcer::new(Arc::new(DownStore), 100, QuotaFailMode::Open);
        let decision = enforcer.admit_at(UserId(1), "ocr", now()).unwrap();
        assert!(decision.admitted);
        assert!(decision.unmetered);
        assert_eq!(decision.remaining(), 100);

        // Status reporting never pretends.
        assert!(enforcer.status_at(UserId(1), now()).is_err());
        let err = enforcer.recent(UserId(1), 5).unwrap_err();
        assert!(matches!(err, DokwerkError::QuotaUnavailable(_)));
    }

    #[test]
    fn recent_lists_admitted_operations_only() {
        let (_store, enforcer) = enforcer(2);
        let user = UserId(4);
        enforcer.admit_at(user, "convert", now()).unwrap();
        enforcer.admit_at(user, "ocr", now() + chrono::Duration::seconds(1)).unwrap();
        assert!(enforcer.admit_at(user, "compress", now()).is_err());

        let recent = enforcer.recent(user, 10).unwrap();
        let endpoints: Vec<_> = recent.iter().map(|r| r.endpoint.as_str()).collect();
        assert_eq!(endpoints, ["ocr", "convert"]);
        assert!(enforcer.recent(UserId(5), 10).unwrap().is_empty());
    }

    #[test]
    fn headers_carry_remaining_and_reset() {
        let (_store, enforcer) = enforcer(5);
        let decision = enforcer.admit_at(UserId(3), "convert", now()).unwrap();
        let headers = decision.headers();
        assert_eq!(headers[0], ("X-RateLimit-Limit", "5".to_string()));
        assert_eq!(headers[1], ("X-RateLimit-Remaining", "4".to_string()));
        assert!(headers[2].1.starts_with("2026-11-01T00:00:00"));
    }
}
