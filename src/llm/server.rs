//! Lifecycle of a background inference server that lives outside this process.
//!
//! The server is found on `PATH`, probed over loopback HTTP and, when it does
//! not answer, started in the background and polled a bounded number of times.

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Searches `PATH` for an executable file called `name`.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

#[derive(Debug, Clone)]
pub struct LocalServer {
    binary: String,
    install_hint: String,
    health_url: String,
    poll_interval: Duration,
    max_attempts: u32,
}

impl LocalServer {
    pub fn new(
        binary: impl Into<String>,
        install_hint: impl Into<String>,
        health_url: impl Into<String>,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            binary: binary.into(),
            install_hint: install_hint.into(),
            health_url: health_url.into(),
            poll_interval,
            max_attempts,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn locate(&self) -> Result<PathBuf> {
        find_on_path(&self.binary).ok_or_else(|| Error::MissingBinary {
            binary: self.binary.clone(),
            hint: self.install_hint.clone(),
        })
    }

    pub async fn is_healthy(&self, http: &reqwest::Client) -> bool {
        match http
            .get(&self.health_url)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.health_url, error = %e, "Health check failed");
                false
            }
        }
    }

    /// Makes sure the server answers its health check, starting it if needed.
    pub async fn ensure_running(&self, http: &reqwest::Client) -> Result<()> {
        if self.is_healthy(http).await {
            return Ok(());
        }

        let binary = self.locate()?;
        info!(binary = %binary.display(), "Starting local model server");

        let child = Command::new(&binary)
            .arg("serve")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::ServerStart {
                binary: self.binary.clone(),
                message: e.to_string(),
            })?;
        debug!(pid = ?child.id(), "Spawned local model server");

        for attempt in 1..=self.max_attempts {
            if self.is_healthy(http).await {
                debug!(attempt, "Local model server is ready");
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        Err(Error::ServerTimeout {
            binary: self.binary.clone(),
            attempts: self.max_attempts,
        })
    }
}
