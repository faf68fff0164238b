use crate::error::Result;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CONFIG_FILE_NAME: &str = ".text2sql_config.json";

pub const DEFAULT_CONNECTION: &str = "default_connection";
pub const DEFAULT_MODEL: &str = "default_model";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";

/// Flat string-to-string settings persisted as a single JSON object.
///
/// Reads never fail: a missing file, an unreadable file and a malformed file
/// all look like an empty store. Writes replace the whole file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

fn config_path() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(CONFIG_FILE_NAME),
        None => PathBuf::from(CONFIG_FILE_NAME),
    }
}

impl ConfigStore {
    pub fn default_location() -> Self {
        Self::at(config_path())
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored value, or an empty string when the key is unset or
    /// the file cannot be read.
    pub fn get(&self, key: &str) -> String {
        self.load()
            .and_then(|mut values| values.remove(key))
            .unwrap_or_default()
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.load().unwrap_or_default();
        values.insert(key.to_string(), value.to_string());

        let contents = serde_json::to_string_pretty(&values)?;
        write_private(&self.path, contents.as_bytes())?;

        debug!(path = %self.path.display(), key, "Saved config value");
        Ok(())
    }

    fn load(&self) -> Option<BTreeMap<String, String>> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(values) => Some(values),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring malformed config file");
                None
            }
        }
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(contents)
}
