//! Optional on-disk configuration, layered under CLI flags.
//!
//! Resolved via the `dirs` crate's `config_dir()`, falling back to nothing
//! at all if neither a `--config` flag nor an XDG config file is present. A
//! missing config file is not an error — both binaries run correctly with
//! zero configuration.

use crate::error::{Result, SyncError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default port both binaries listen on / connect to when nothing else says
/// otherwise.
pub const DEFAULT_PORT: u16 = 8988;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl FileConfig {
    /// Load `path` if given, else the first of `$XDG_CONFIG_HOME/sy/config.toml`
    /// or the platform config dir equivalent, via the `dirs` crate. Returns
    /// `Ok(FileConfig::default())` when nothing is found.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let candidate = match explicit_path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        let Some(candidate) = candidate else {
            return Ok(FileConfig::default());
        };

        match std::fs::read_to_string(&candidate) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|e| SyncError::Config(format!("{}: {e}", candidate.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && explicit_path.is_none() => {
                Ok(FileConfig::default())
            }
            Err(e) => Err(SyncError::io(candidate, e)),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sy").join("config.toml"))
}
