// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution and config loading.

use std::path::{Path, PathBuf};

use dokwerk_core::config::ServiceConfig;
use tracing::{info, warn};

const CONFIG_FILE: &str = "config.json";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "DOKWERK_CONFIG";

/// Return the application data directory, creating it if needed.
///
/// `$DOKWERK_HOME` wins; otherwise the XDG data dir, then `~/.local/share`.
pub fn data_dir() -> PathBuf {
    let dir = match std::env::var("DOKWERK_HOME") {
        Ok(home) => PathBuf::from(home),
        Err(_) => dirs_fallback().join("dokwerk"),
    };
    if let Err(err) = std::fs::create_dir_all(&dir) {
        warn!(path = %dir.display(), %err, "cannot create data directory");
    }
    dir
}

fn dirs_fallback() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    std::env::temp_dir()
}

/// Where the config is read from: `$DOKWERK_CONFIG`, else
/// `<data dir>/config.json`.
pub fn config_path(data_dir: &Path) -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join(CONFIG_FILE))
}

/// Load the config at `path`, falling back to defaults when the file is
/// missing or invalid. Relative paths in the result are anchored at
/// `data_dir`.
pub fn load_config(path: &Path, data_dir: &Path) -> ServiceConfig {
    let mut config = if path.is_file() {
        match ServiceConfig::load(path) {
            Ok(config) => {
                info!(path = %path.display(), "config loaded");
                config
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "invalid config; using defaults");
                ServiceConfig::default()
            }
        }
    } else {
        info!(path = %path.display(), "no config file; using defaults");
        ServiceConfig::default()
    };
    anchor(&mut config.temp_root, data_dir);
    anchor(&mut config.database_path, data_dir);
    config
}

fn anchor(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_yields_anchored_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.json"), dir.path());
        assert_eq!(config.monthly_limit, 100);
        assert_eq!(config.temp_root, dir.path().join("temp"));
        assert_eq!(config.database_path, dir.path().join("dokwerk.db"));
    }

    #[test]
    fn invalid_config_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_config(&path, dir.path()).monthly_limit, 100);
    }

    #[test]
    fn absolute_paths_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let scratch = dir.path().join("elsewhere");
        let config = ServiceConfig {
            temp_root: scratch.clone(),
            monthly_limit: 7,
            ..ServiceConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = load_config(&path, Path::new("/unused"));
        assert_eq!(loaded.temp_root, scratch);
        assert_eq!(loaded.monthly_limit, 7);
    }
}
