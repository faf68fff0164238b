use crate::config::{ConfigStore, OPENAI_API_KEY};
use crate::error::{Error, Result};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use tracing::debug;

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const MODEL: &str = "gpt-4";

const GREEN: &str = "\x1b[32m";
const RESET: &str = "\x1b[0m";

/// The environment wins over the config file. Blank values count as unset.
pub fn resolve_api_key(config: &ConfigStore) -> Result<String> {
    pick_api_key(std::env::var(OPENAI_API_KEY).ok(), config.get(OPENAI_API_KEY))
}

fn pick_api_key(from_env: Option<String>, from_config: String) -> Result<String> {
    let clean = |key: String| -> String { key.chars().filter(|c| !c.is_whitespace()).collect() };

    from_env
        .map(clean)
        .filter(|key| !key.is_empty())
        .or_else(|| Some(clean(from_config)).filter(|key| !key.is_empty()))
        .ok_or(Error::MissingApiKey)
}

#[derive(Debug, Clone)]
pub struct Client {
    api_key: String,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: &'static str,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// Returns the text carried by one server-sent-events line, if any.
fn parse_event_line(line: &str) -> Option<String> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return None;
    }

    let chunk: StreamChunk = serde_json::from_str(data).ok()?;
    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn echo(text: &str) {
    print!("{}", text);
    io::stdout().flush().ok();
}

impl Client {
    pub fn new(api_key: &str, http: reqwest::Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            http,
        }
    }

    /// Sends `prompt` as a single user message and streams the reply to the
    /// terminal while collecting it.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ApiRequest {
            model: MODEL,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: true,
        };

        debug!(model = MODEL, prompt_len = prompt.len(), "Sending chat completion request");

        let response = self
            .http
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api { status, body });
        }

        let mut full_text = String::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();

        echo(GREEN);

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    echo(RESET);
                    return Err(e.into());
                }
            };
            pending.extend_from_slice(&chunk);

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if let Some(text) = parse_event_line(String::from_utf8_lossy(&line).trim_end()) {
                    echo(&text);
                    full_text.push_str(&text);
                }
            }
        }

        if let Some(text) = parse_event_line(String::from_utf8_lossy(&pending).trim_end()) {
            echo(&text);
            full_text.push_str(&text);
        }

        echo(RESET);
        println!();

        Ok(full_text)
    }
}
