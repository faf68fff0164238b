use super::server::LocalServer;
use crate::error::{Error, Result};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const BINARY: &str = "ollama";
const INSTALL_HINT: &str = "https://ollama.ai";
const HEALTH_URL: &str = "http://localhost:11434/api/tags";
const MODEL: &str = "llama3.1";
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);
const READY_POLL_ATTEMPTS: u32 = 10;

/// One-shot generation through a locally installed `ollama`.
#[derive(Debug, Clone)]
pub struct Client {
    server: LocalServer,
    model: String,
    // health checks must not go through an HTTP proxy
    loopback: reqwest::Client,
}

impl Client {
    pub fn new() -> Self {
        Self::with_server(LocalServer::new(
            BINARY,
            INSTALL_HINT,
            HEALTH_URL,
            READY_POLL_INTERVAL,
            READY_POLL_ATTEMPTS,
        ))
    }

    fn with_server(server: LocalServer) -> Self {
        Self {
            server,
            model: MODEL.to_string(),
            loopback: reqwest::Client::builder()
                .no_proxy()
                .build()
                .unwrap_or_default(),
        }
    }

    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let binary = self.server.locate()?;
        self.server.ensure_running(&self.loopback).await?;

        debug!(model = %self.model, prompt_len = prompt.len(), "Running local model");

        let output = Command::new(&binary)
            .args(["run", &self.model, prompt])
            .output()
            .await
            .map_err(|e| self.process_error(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.process_error(format!("{}: {}", output.status, stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn process_error(&self, message: String) -> Error {
        Error::Process {
            binary: self.server.binary().to_string(),
            message,
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}
