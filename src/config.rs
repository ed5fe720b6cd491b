//! Configuration loaded from an optional `gusto.toml`.
//!
//! Every field has a default, so a project without a config file gets the
//! conventional `src/` → `dist/` layout. Unknown keys are rejected to catch
//! typos early.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: Paths,
    pub server: Server,
    pub publish: Publish,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    /// Source tree root; per-category subdirectories live under it
    /// (`sass`, `css`, `bundle`, `img`, `misc`, `pages`, `templates`).
    pub source: Utf8PathBuf,
    /// Build output root, mirroring the category subdirectories.
    pub dist: Utf8PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            source: Utf8PathBuf::from("src"),
            dist: Utf8PathBuf::from("dist"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Server {
    /// Port of the development HTTP server.
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Publish {
    /// Target object-storage bucket. Publishing with an empty bucket is a
    /// configuration error.
    pub bucket: String,
    /// Credentials profile requested from the cloud SDK.
    pub profile: String,
    /// Optional key prefix inside the bucket.
    pub prefix: String,
}

impl Default for Publish {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            profile: String::from("default"),
            prefix: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config file at '{path}', using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Read(path.to_string(), e)),
        };

        toml::from_str(&raw).map_err(|e| ConfigError::Parse(path.to_string(), e))
    }
}
