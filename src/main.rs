mod config;
mod db;
mod error;
mod llm;
mod render;
mod schema;
mod session;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{ConfigStore, DEFAULT_CONNECTION, DEFAULT_MODEL};
use llm::{Dispatcher, ModelKind};
use session::{DatabaseRunner, DispatchGenerator, Session, TerminalPrompter};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "text2sql", version, about = "Generate SQL queries from natural language")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate and execute SQL queries
    Query {
        /// What you want to know, in plain language
        query: String,

        /// Table names to use instead of every table in the public schema
        #[arg(short, long, value_delimiter = ',', num_args = 1..)]
        using: Vec<String>,

        /// Database connection string
        #[arg(short, long)]
        connection: Option<String>,

        /// LLM model to use (llama, openai, claude)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Set the default database connection string
    SetDefaultConnection { connection: String },

    /// Set the default LLM model
    SetDefaultModel { model: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .init();
}

fn model_choices() -> String {
    let names: Vec<String> = ModelKind::ALL
        .iter()
        .map(|kind| format!("'{kind}'"))
        .collect();
    match names.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{}, or {}", rest.join(", "), last),
        _ => names.join(""),
    }
}

async fn run_query(
    query: String,
    using: Vec<String>,
    connection: Option<String>,
    model: Option<String>,
) -> Result<()> {
    let store = ConfigStore::default_location();

    let connection = session::resolve_setting(connection, store.get(DEFAULT_CONNECTION))
        .context(
            "No connection string provided or found via config.\n\
             Please set one via set-default-connection or provide one with --connection.",
        )?;
    let model = session::resolve_setting(model, store.get(DEFAULT_MODEL))
        .unwrap_or_else(|| ModelKind::OpenAi.to_string());

    let tables = session::resolve_tables(using, || db::list_tables(&connection)).await?;
    let schema = db::fetch_schema(&connection, &tables).await;
    tracing::debug!(tables = tables.len(), described = schema.tables.len(), %model, "Schema loaded");

    let generator = DispatchGenerator::new(Dispatcher::new(store), tables, schema, model);
    let runner = DatabaseRunner::new(connection);
    let prompter = TerminalPrompter::new()?;

    Session::new(generator, runner, prompter, std::io::stdout())
        .run(&query)
        .await
}

async fn set_default_connection(connection: String) -> Result<()> {
    let store = ConfigStore::default_location();
    store
        .set(DEFAULT_CONNECTION, &connection)
        .context("Failed to save default connection")?;

    println!("Default connection set to: {}", connection);
    println!("Saved to {}", store.path().display());
    println!("Testing connection...");
    match db::list_tables(&connection).await {
        Ok(tables) => println!(
            "Connection successful. Available tables: {}",
            tables.join(", ")
        ),
        Err(e) => println!("Unable to retrieve tables: {}", e),
    }

    Ok(())
}

fn set_default_model(model: String) -> Result<()> {
    if model.parse::<ModelKind>().is_err() {
        anyhow::bail!("Invalid model. Choose from {}.", model_choices());
    }

    let store = ConfigStore::default_location();
    store
        .set(DEFAULT_MODEL, &model)
        .context("Failed to save default model")?;
    println!("Default model set to: {}", model);
    println!("Saved to {}", store.path().display());

    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Query {
            query,
            using,
            connection,
            model,
        } => run_query(query, using, connection, model).await,
        Command::SetDefaultConnection { connection } => set_default_connection(connection).await,
        Command::SetDefaultModel { model } => set_default_model(model),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
