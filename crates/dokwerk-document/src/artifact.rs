// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Temporary artifact manager — allocates scratch paths under one managed root
// and is the only component that deletes them.
//
// The manager is created once at startup and cloned into every component that
// needs scratch space. Clones share the same root.

use std::fs::OpenOptions;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dokwerk_core::error::{DokwerkError, Result};
use dokwerk_core::types::{Artifact, DocumentFormat};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Attempts before `allocate` gives up on finding an unused name.
const ALLOCATE_ATTEMPTS: usize = 4;

/// Longest basename hint kept in generated file names.
const MAX_HINT_LEN: usize = 64;

/// Handle to the managed scratch directory.
#[derive(Debug, Clone)]
pub struct ArtifactManager {
    root: Arc<PathBuf>,
}

impl ArtifactManager {
    /// Create a manager rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the managed root if it does not exist. Idempotent and safe when
    /// several callers race on first use.
    pub fn ensure_root(&self) -> Result<()> {
        std::fs::create_dir_all(self.root.as_path()).map_err(|err| {
            DokwerkError::WriteFailure(format!(
                "cannot create temp root {}: {err}",
                self.root.display()
            ))
        })
    }

    /// Reserve a new, uniquely named, empty file for an artifact of `format`.
    ///
    /// The name is `<hint>_<unix millis>_<random>.<ext>`; the file is created
    /// with `create_new`, so two callers can never receive the same path.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn allocate(&self, hint: &str, format: DocumentFormat) -> Result<Artifact> {
        self.ensure_root()?;
        let stem = sanitize_hint(hint);

        for _ in 0..ALLOCATE_ATTEMPTS {
            let random = Uuid::new_v4().simple().to_string();
            let name = format!(
                "{stem}_{}_{}.{}",
                Utc::now().timestamp_millis(),
                &random[..12],
                format.extension()
            );
            let path = self.root.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    debug!(path = %path.display(), "artifact allocated");
                    return Ok(Artifact::new(path, format, 0));
                }
                Err(err) if err.kind() == IoErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(DokwerkError::WriteFailure(format!(
                        "cannot create {}: {err}",
                        path.display()
                    )));
                }
            }
        }

        Err(DokwerkError::WriteFailure(format!(
            "no unique name found for '{stem}' after {ALLOCATE_ATTEMPTS} attempts"
        )))
    }

    /// Take ownership of a file that already exists (e.g. an upload written by
    /// the transport layer). The file will be deleted on release.
    pub fn adopt(&self, path: impl Into<PathBuf>, format: DocumentFormat) -> Result<Artifact> {
        let path = path.into();
        let metadata = std::fs::metadata(&path).map_err(|err| {
            DokwerkError::SourceUnreadable(format!("{}: {err}", path.display()))
        })?;
        if !metadata.is_file() {
            return Err(DokwerkError::SourceUnreadable(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        Ok(Artifact::new(path, format, metadata.len()))
    }

    /// Re-read the size of `artifact` after it has been written.
    pub fn refresh(&self, artifact: &mut Artifact) -> Result<()> {
        let metadata = std::fs::metadata(&artifact.path).map_err(|err| {
            DokwerkError::WriteFailure(format!("{}: {err}", artifact.path.display()))
        })?;
        artifact.size_bytes = metadata.len();
        Ok(())
    }

    /// Delete the artifact's file. Never fails: a missing file is already
    /// released, any other error is logged.
    pub fn release(&self, artifact: &Artifact) {
        match std::fs::remove_file(&artifact.path) {
            Ok(()) => debug!(path = %artifact.path.display(), "artifact released"),
            Err(err) if err.kind() == IoErrorKind::NotFound => {
                debug!(path = %artifact.path.display(), "artifact already gone");
            }
            Err(err) => {
                warn!(path = %artifact.path.display(), %err, "failed to release artifact");
            }
        }
    }

    /// Wrap `artifact` so that it is released when the lease is dropped.
    pub fn lease(&self, artifact: Artifact) -> ArtifactLease {
        ArtifactLease {
            artifact,
            manager: self.clone(),
            armed: true,
        }
    }

    /// Delete files in the managed root whose last modification is older than
    /// `max_age`. Returns the number of files removed.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let entries = match std::fs::read_dir(self.root.as_path()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == IoErrorKind::NotFound => return 0,
            Err(err) => {
                warn!(%err, "cannot list temp root");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let expired = entry
                .metadata()
                .ok()
                .filter(|m| m.is_file())
                .and_then(|m| m.modified().ok())
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age > max_age);

            if !expired {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => warn!(path = %path.display(), %err, "failed to sweep artifact"),
            }
        }

        if removed > 0 {
            info!(removed, "expired artifacts swept");
        }
        removed
    }
}

/// Ownership token for an artifact: releases it when dropped unless the
/// holder calls [`ArtifactLease::keep`].
///
/// The transport layer calls [`ArtifactLease::consumed`] once it has finished
/// streaming the bytes, which releases immediately.
#[derive(Debug)]
pub struct ArtifactLease {
    artifact: Artifact,
    manager: ArtifactManager,
    armed: bool,
}

impl ArtifactLease {
    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn path(&self) -> &Path {
        &self.artifact.path
    }

    /// Update the recorded size from disk.
    pub fn refresh(&mut self) -> Result<()> {
        self.manager.refresh(&mut self.artifact)
    }

    /// Signal that the bytes have been delivered; releases the file now.
    pub fn consumed(mut self) {
        self.armed = false;
        self.manager.release(&self.artifact);
    }

    /// Disarm the lease and hand the artifact to a new owner.
    pub fn keep(mut self) -> Artifact {
        self.armed = false;
        self.artifact.clone()
    }
}

impl Drop for ArtifactLease {
    fn drop(&mut self) {
        if self.armed {
            self.manager.release(&self.artifact);
        }
    }
}

/// Reduce a caller-supplied basename to `[A-Za-z0-9_-]`.
fn sanitize_hint(hint: &str) -> String {
    let stem = Path::new(hint)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_HINT_LEN)
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        "artifact".to_string()
    } else {
        cleaned
    }
}
