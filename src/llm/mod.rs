//! Turns a natural-language request into SQL through one of the model backends.
//!
//! Every backend receives the same schema-annotated prompt and returns free
//! text; the first fenced code block in that text (if any) is taken as the
//! generated statement.

pub mod ollama;
pub mod openai;
pub mod server;

use crate::config::ConfigStore;
use crate::error::{Error, Result};
use crate::schema::Schema;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;

/// What the not-yet-implemented backend answers with.
pub const PLACEHOLDER_RESPONSE: &str = "placeholder";

const QUOTING_HINT: &str = r#"IMPORTANT: Ensure to quote all table names in double quotes to preserve case sensitivity, e.g., "TableName"."#;

const QUERY_ONLY_HINT: &str = "    Additionally, your output will be sent right to a database so output no information other than the query,
    otherwise it will fail when sent to the server.";

static SQL_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:sql)?\n?(.*?)\n?```").expect("valid fence pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Local inference through the `ollama` binary.
    Llama,
    /// Hosted chat-completion API.
    OpenAi,
    /// Reserved for a future backend.
    Claude,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Llama, ModelKind::OpenAi, ModelKind::Claude];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Llama => "llama",
            ModelKind::OpenAi => "openai",
            ModelKind::Claude => "claude",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnsupportedModel(s.to_string()))
    }
}

pub fn build_prompt(request: &str, schema: &Schema) -> String {
    format!(
        "Generate an SQL query for the following request: {}\nAvailable tables and their schemas:\n{}\n{}",
        request,
        schema.to_prompt_string(),
        QUOTING_HINT
    )
}

/// Local models tend to chat around the query, so they get an extra warning.
pub fn build_local_prompt(request: &str, schema: &Schema) -> String {
    format!("{}\n{}", build_prompt(request, schema), QUERY_ONLY_HINT)
}

/// Pulls the first fenced block out of a model response, or returns the whole
/// response trimmed when there is none.
pub fn extract_sql(text: &str) -> String {
    match SQL_FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(sql) => sql.as_str().trim().to_string(),
        None => {
            debug!("No SQL code block found, using raw response");
            text.trim().to_string()
        }
    }
}

/// Hook for enforcing quoted table names. Leaves the statement untouched.
pub fn quote_table_names(sql: &str, _tables: &[String]) -> String {
    sql.to_string()
}

pub struct Dispatcher {
    http: reqwest::Client,
    config: ConfigStore,
    local: ollama::Client,
}

impl Dispatcher {
    pub fn new(config: ConfigStore) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            local: ollama::Client::new(),
        }
    }

    pub async fn generate(
        &self,
        request: &str,
        tables: &[String],
        schema: &Schema,
        model: &str,
    ) -> Result<String> {
        let kind: ModelKind = model.parse()?;
        debug!(model = %kind, tables = tables.len(), "Generating SQL");

        let raw = match kind {
            ModelKind::OpenAi => {
                let api_key = openai::resolve_api_key(&self.config)?;
                openai::Client::new(&api_key, self.http.clone())
                    .complete(&build_prompt(request, schema))
                    .await?
            }
            ModelKind::Llama => {
                self.local
                    .complete(&build_local_prompt(request, schema))
                    .await?
            }
            ModelKind::Claude => PLACEHOLDER_RESPONSE.to_string(),
        };

        Ok(quote_table_names(&extract_sql(&raw), tables))
    }
}
