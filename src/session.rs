//! The interactive review loop around a generated query.
//!
//! A session moves through four steps: generate SQL if none is held, show it,
//! wait for the user's choice, and stop. Everything the loop remembers lives
//! in [`SessionState`], and each step is a single call to
//! [`Session::advance`].

use crate::db::{self, QueryRow};
use crate::llm::Dispatcher;
use crate::render;
use crate::schema::Schema;
use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::future::Future;
use std::io::Write;
use tracing::{debug, warn};

const ACTION_PROMPT: &str = "Choose an action: [r]un, [e]dit, [q]uit: ";
const REFINEMENT_PROMPT: &str = "Enter your refinement request: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    GeneratePrompt,
    Display,
    AwaitAction,
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Run,
    /// Regenerate from a natural-language refinement.
    Edit,
    Quit,
    Invalid(String),
}

impl Action {
    pub fn parse(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "r" | "run" => Action::Run,
            "e" | "edit" => Action::Edit,
            "q" | "quit" => Action::Quit,
            other => Action::Invalid(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub original_request: String,
    pub sql: Option<String>,
}

impl SessionState {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            original_request: request.into(),
            sql: None,
        }
    }
}

pub fn refinement_prompt(original_request: &str, previous_sql: &str, refinement: &str) -> String {
    format!(
        "Original request: {original_request}\n\
         Previously generated SQL: {previous_sql}\n\
         Refinement request: {refinement}\n\
         \n\
         Please generate an updated SQL query based on the original request and the refinement."
    )
}

pub trait SqlGenerator {
    fn generate(&self, request: &str) -> impl Future<Output = Result<String>>;
}

pub trait QueryRunner {
    fn run(&self, sql: &str) -> impl Future<Output = Result<Vec<QueryRow>>>;
}

pub trait Prompter {
    fn read_action(&mut self) -> Result<Action>;
    fn read_refinement(&mut self) -> Result<String>;
}

pub struct Session<G, R, P, W> {
    generator: G,
    runner: R,
    prompter: P,
    out: W,
}

impl<G, R, P, W> Session<G, R, P, W> {
    pub fn new(generator: G, runner: R, prompter: P, out: W) -> Self {
        Self {
            generator,
            runner,
            prompter,
            out,
        }
    }

    #[cfg(test)]
    pub fn output(&self) -> &W {
        &self.out
    }
}

impl<G, R, P, W> Session<G, R, P, W>
where
    G: SqlGenerator,
    R: QueryRunner,
    P: Prompter,
    W: Write,
{
    pub async fn run(&mut self, request: &str) -> Result<()> {
        let mut state = SessionState::new(request);
        let mut step = Step::GeneratePrompt;

        while step != Step::Terminal {
            step = self.advance(step, &mut state).await?;
        }

        Ok(())
    }

    /// Performs one step and returns the next. Errors are fatal to the session.
    pub async fn advance(&mut self, step: Step, state: &mut SessionState) -> Result<Step> {
        debug!(?step, "Session step");

        match step {
            Step::GeneratePrompt => {
                if state.sql.is_none() {
                    let sql = self
                        .generator
                        .generate(&state.original_request)
                        .await
                        .context("Error generating SQL")?;
                    state.sql = Some(sql);
                }
                Ok(Step::Display)
            }
            Step::Display => {
                let Some(sql) = state.sql.as_deref() else {
                    return Ok(Step::GeneratePrompt);
                };
                writeln!(self.out, "Generated SQL Query:")?;
                writeln!(self.out, "{sql}")?;
                Ok(Step::AwaitAction)
            }
            Step::AwaitAction => {
                let Some(sql) = state.sql.clone() else {
                    return Ok(Step::GeneratePrompt);
                };
                self.handle_action(&sql, state).await
            }
            Step::Terminal => Ok(Step::Terminal),
        }
    }

    async fn handle_action(&mut self, sql: &str, state: &mut SessionState) -> Result<Step> {
        match self.prompter.read_action()? {
            Action::Run => match self.runner.run(sql).await {
                Ok(rows) => {
                    render::render(&mut self.out, &rows)?;
                    Ok(Step::Terminal)
                }
                Err(e) => {
                    writeln!(self.out, "Query execution failed: {e:#}")?;
                    Ok(Step::Display)
                }
            },
            Action::Edit => {
                let refinement = self.prompter.read_refinement()?;
                let refinement = refinement.trim();
                if refinement.is_empty() {
                    writeln!(self.out, "No refinement given, keeping the current query.")?;
                    return Ok(Step::Display);
                }

                let prompt = refinement_prompt(&state.original_request, sql, refinement);
                match self.generator.generate(&prompt).await {
                    Ok(new_sql) => state.sql = Some(new_sql),
                    Err(e) => writeln!(self.out, "Error generating SQL: {e:#}")?,
                }
                Ok(Step::Display)
            }
            Action::Quit => Ok(Step::Terminal),
            Action::Invalid(input) => {
                debug!(%input, "Invalid action");
                writeln!(self.out, "Invalid action. Please choose 'r', 'e', or 'q'.")?;
                Ok(Step::AwaitAction)
            }
        }
    }
}

/// A set flag wins over the stored default; blank values count as unset.
pub fn resolve_setting(flag: Option<String>, stored: String) -> Option<String> {
    flag.filter(|v| !v.trim().is_empty())
        .or_else(|| Some(stored).filter(|v| !v.trim().is_empty()))
}

/// Uses the explicit table list when one is given, otherwise asks the database.
/// Ending up with no tables is fatal.
pub async fn resolve_tables<F, Fut>(using: Vec<String>, introspect: F) -> Result<Vec<String>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = crate::error::Result<Vec<String>>>,
{
    let tables = if using.is_empty() {
        introspect().await.unwrap_or_else(|e| {
            warn!(error = %e, "Table introspection failed");
            Vec::new()
        })
    } else {
        using
    };

    if tables.is_empty() {
        anyhow::bail!("Unable to retrieve table names. Please check your connection string.");
    }
    Ok(tables)
}

pub struct DispatchGenerator {
    dispatcher: Dispatcher,
    tables: Vec<String>,
    schema: Schema,
    model: String,
}

impl DispatchGenerator {
    pub fn new(dispatcher: Dispatcher, tables: Vec<String>, schema: Schema, model: String) -> Self {
        Self {
            dispatcher,
            tables,
            schema,
            model,
        }
    }
}

impl SqlGenerator for DispatchGenerator {
    async fn generate(&self, request: &str) -> Result<String> {
        Ok(self
            .dispatcher
            .generate(request, &self.tables, &self.schema, &self.model)
            .await?)
    }
}

pub struct DatabaseRunner {
    connection: String,
}

impl DatabaseRunner {
    pub fn new(connection: String) -> Self {
        Self { connection }
    }
}

impl QueryRunner for DatabaseRunner {
    async fn run(&self, sql: &str) -> Result<Vec<QueryRow>> {
        Ok(db::execute(&self.connection, sql).await?)
    }
}

pub struct TerminalPrompter {
    editor: DefaultEditor,
}

impl TerminalPrompter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }

    fn readline(&mut self, prompt: &str) -> Result<Option<String>> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(Some(line)),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Prompter for TerminalPrompter {
    fn read_action(&mut self) -> Result<Action> {
        Ok(match self.readline(ACTION_PROMPT)? {
            Some(line) => Action::parse(&line),
            None => Action::Quit,
        })
    }

    fn read_refinement(&mut self) -> Result<String> {
        Ok(self.readline(REFINEMENT_PROMPT)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;

    #[derive(Default)]
    struct FakeGenerator {
        responses: RefCell<VecDeque<Result<String>>>,
        requests: RefCell<Vec<String>>,
    }

    impl FakeGenerator {
        fn answering(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                requests: RefCell::default(),
            }
        }
    }

    impl SqlGenerator for &FakeGenerator {
        async fn generate(&self, request: &str) -> Result<String> {
            self.requests.borrow_mut().push(request.to_string());
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted response")))
        }
    }

    #[derive(Default)]
    struct FakeRunner {
        results: RefCell<VecDeque<Result<Vec<QueryRow>>>>,
        executed: RefCell<Vec<String>>,
    }

    impl FakeRunner {
        fn returning(results: Vec<Result<Vec<QueryRow>>>) -> Self {
            Self {
                results: RefCell::new(results.into()),
                executed: RefCell::default(),
            }
        }
    }

    impl QueryRunner for &FakeRunner {
        async fn run(&self, sql: &str) -> Result<Vec<QueryRow>> {
            self.executed.borrow_mut().push(sql.to_string());
            self.results
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    struct ScriptedPrompter {
        actions: VecDeque<&'static str>,
        refinements: VecDeque<&'static str>,
    }

    impl ScriptedPrompter {
        fn new(actions: &[&'static str]) -> Self {
            Self {
                actions: actions.iter().copied().collect(),
                refinements: VecDeque::new(),
            }
        }

        fn with_refinements(mut self, refinements: &[&'static str]) -> Self {
            self.refinements = refinements.iter().copied().collect();
            self
        }
    }

    impl Prompter for ScriptedPrompter {
        fn read_action(&mut self) -> Result<Action> {
            // running out of script behaves like end of input
            Ok(self.actions.pop_front().map(Action::parse).unwrap_or(Action::Quit))
        }

        fn read_refinement(&mut self) -> Result<String> {
            Ok(self.refinements.pop_front().unwrap_or_default().to_string())
        }
    }

    fn rows() -> Vec<QueryRow> {
        vec![json!({"count": 3}).as_object().cloned().unwrap()]
    }

    fn output_of<G, R, P>(session: &Session<G, R, P, Vec<u8>>) -> String {
        String::from_utf8(session.output().clone()).unwrap()
    }

    #[test]
    fn parses_actions() {
        assert_eq!(Action::parse("r"), Action::Run);
        assert_eq!(Action::parse(" E \n"), Action::Edit);
        assert_eq!(Action::parse("m"), Action::Invalid("m".to_string()));
        assert_eq!(Action::parse("quit"), Action::Quit);
        assert_eq!(Action::parse("x"), Action::Invalid("x".to_string()));
    }

    #[test]
    fn refinement_prompt_references_request_sql_and_refinement() {
        let prompt = refinement_prompt("count users", "SELECT count(*) FROM users", "only active");
        assert_eq!(
            prompt,
            "Original request: count users\n\
             Previously generated SQL: SELECT count(*) FROM users\n\
             Refinement request: only active\n\
             \n\
             Please generate an updated SQL query based on the original request and the refinement."
        );
    }

    #[tokio::test]
    async fn run_success_renders_and_terminates() {
        let generator = FakeGenerator::answering(vec![Ok("SELECT count(*) FROM users".into())]);
        let runner = FakeRunner::returning(vec![Ok(rows())]);
        let mut session = Session::new(&generator, &runner, ScriptedPrompter::new(&["r"]), Vec::new());

        session.run("how many users").await.unwrap();

        assert_eq!(*generator.requests.borrow(), vec!["how many users".to_string()]);
        assert_eq!(*runner.executed.borrow(), vec!["SELECT count(*) FROM users".to_string()]);
        let output = output_of(&session);
        assert!(output.contains("Generated SQL Query:\nSELECT count(*) FROM users\n"));
        assert!(output.contains("Total rows: 1"));
    }

    #[tokio::test]
    async fn empty_result_prints_notice_without_error() {
        let generator = FakeGenerator::answering(vec![Ok("SELECT 1 WHERE false".into())]);
        let runner = FakeRunner::returning(vec![Ok(Vec::new())]);
        let mut session = Session::new(&generator, &runner, ScriptedPrompter::new(&["r"]), Vec::new());

        session.run("nothing").await.unwrap();

        assert!(output_of(&session).contains("No results to display."));
    }

    #[tokio::test]
    async fn failed_run_keeps_sql_and_redisplays_it() {
        let generator = FakeGenerator::answering(vec![Ok("SELECT * FROM nope".into())]);
        let runner = FakeRunner::returning(vec![Err(anyhow::anyhow!("relation \"nope\" does not exist"))]);
        let mut session =
            Session::new(&generator, &runner, ScriptedPrompter::new(&["r", "q"]), Vec::new());

        session.run("show nope").await.unwrap();

        assert_eq!(generator.requests.borrow().len(), 1);
        let output = output_of(&session);
        assert!(output.contains("Query execution failed: relation \"nope\" does not exist"));
        assert_eq!(output.matches("Generated SQL Query:\nSELECT * FROM nope").count(), 2);
    }

    #[tokio::test]
    async fn edit_regenerates_from_composite_prompt() {
        let generator = FakeGenerator::answering(vec![
            Ok("SELECT * FROM users".into()),
            Ok("SELECT * FROM users WHERE active".into()),
        ]);
        let runner = FakeRunner::default();
        let prompter = ScriptedPrompter::new(&["e", "q"]).with_refinements(&["only active ones"]);
        let mut session = Session::new(&generator, &runner, prompter, Vec::new());

        session.run("list users").await.unwrap();

        let requests = generator.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1],
            refinement_prompt("list users", "SELECT * FROM users", "only active ones")
        );
        assert!(output_of(&session).contains("SELECT * FROM users WHERE active"));
    }

    #[tokio::test]
    async fn later_refinements_reference_the_latest_sql() {
        let generator = FakeGenerator::answering(vec![
            Ok("SELECT 1".into()),
            Ok("SELECT 2".into()),
            Ok("SELECT 3".into()),
        ]);
        let runner = FakeRunner::default();
        let prompter = ScriptedPrompter::new(&["e", "e", "q"]).with_refinements(&["two", "three"]);
        let mut session = Session::new(&generator, &runner, prompter, Vec::new());

        session.run("start").await.unwrap();

        let requests = generator.requests.borrow();
        assert_eq!(requests[2], refinement_prompt("start", "SELECT 2", "three"));
    }

    #[tokio::test]
    async fn failed_refinement_keeps_previous_sql() {
        let generator = FakeGenerator::answering(vec![
            Ok("SELECT 1".into()),
            Err(Error::MissingApiKey.into()),
        ]);
        let runner = FakeRunner::returning(vec![Ok(rows())]);
        let prompter = ScriptedPrompter::new(&["e", "r"]).with_refinements(&["more"]);
        let mut session = Session::new(&generator, &runner, prompter, Vec::new());

        session.run("one").await.unwrap();

        assert_eq!(*runner.executed.borrow(), vec!["SELECT 1".to_string()]);
        assert!(output_of(&session).contains("Error generating SQL: OPENAI_API_KEY not set"));
    }

    #[tokio::test]
    async fn empty_refinement_does_not_regenerate() {
        let generator = FakeGenerator::answering(vec![Ok("SELECT 1".into())]);
        let runner = FakeRunner::default();
        let prompter = ScriptedPrompter::new(&["e", "q"]).with_refinements(&["   "]);
        let mut session = Session::new(&generator, &runner, prompter, Vec::new());

        session.run("one").await.unwrap();

        assert_eq!(generator.requests.borrow().len(), 1);
    }

    #[tokio::test]
    async fn quit_executes_nothing() {
        let generator = FakeGenerator::answering(vec![Ok("DELETE FROM users".into())]);
        let runner = FakeRunner::default();
        let mut session = Session::new(&generator, &runner, ScriptedPrompter::new(&["q"]), Vec::new());

        session.run("remove everyone").await.unwrap();

        assert!(runner.executed.borrow().is_empty());
    }

    #[tokio::test]
    async fn invalid_choice_reprompts_without_regenerating() {
        let generator = FakeGenerator::answering(vec![Ok("SELECT 1".into())]);
        let runner = FakeRunner::default();
        let mut session =
            Session::new(&generator, &runner, ScriptedPrompter::new(&["x", "q"]), Vec::new());
        let mut state = SessionState::new("one");

        assert_eq!(session.advance(Step::GeneratePrompt, &mut state).await.unwrap(), Step::Display);
        assert_eq!(session.advance(Step::Display, &mut state).await.unwrap(), Step::AwaitAction);
        assert_eq!(session.advance(Step::AwaitAction, &mut state).await.unwrap(), Step::AwaitAction);
        assert_eq!(session.advance(Step::AwaitAction, &mut state).await.unwrap(), Step::Terminal);

        assert_eq!(generator.requests.borrow().len(), 1);
        assert!(output_of(&session).contains("Invalid action. Please choose 'r', 'e', or 'q'."));
    }

    #[tokio::test]
    async fn held_sql_skips_generation() {
        let generator = FakeGenerator::default();
        let runner = FakeRunner::default();
        let mut session = Session::new(&generator, &runner, ScriptedPrompter::new(&[]), Vec::new());
        let mut state = SessionState {
            original_request: "one".to_string(),
            sql: Some("SELECT 1".to_string()),
        };

        let next = session.advance(Step::GeneratePrompt, &mut state).await.unwrap();

        assert_eq!(next, Step::Display);
        assert!(generator.requests.borrow().is_empty());
    }

    #[tokio::test]
    async fn initial_generation_failure_is_fatal() {
        let generator = FakeGenerator::answering(vec![Err(Error::UnsupportedModel("gpt-5".into()).into())]);
        let runner = FakeRunner::default();
        let mut session = Session::new(&generator, &runner, ScriptedPrompter::new(&["r"]), Vec::new());

        let err = session.run("anything").await.unwrap_err();

        assert!(format!("{err:#}").contains("unsupported model: gpt-5"));
        assert!(runner.executed.borrow().is_empty());
    }

    #[test]
    fn flag_wins_over_stored_setting() {
        assert_eq!(
            resolve_setting(Some("postgres://flag".into()), "postgres://stored".into()),
            Some("postgres://flag".to_string())
        );
        assert_eq!(
            resolve_setting(None, "postgres://stored".into()),
            Some("postgres://stored".to_string())
        );
        assert_eq!(resolve_setting(Some(String::new()), String::new()), None);
    }

    #[tokio::test]
    async fn explicit_tables_are_used_verbatim() {
        let tables = resolve_tables(vec!["Users".into(), "orders".into()], || async {
            Ok::<_, Error>(vec!["introspected".to_string()])
        })
        .await
        .unwrap();

        assert_eq!(tables, vec!["Users".to_string(), "orders".to_string()]);
    }

    #[tokio::test]
    async fn introspected_tables_are_used_when_none_given() {
        let tables = resolve_tables(Vec::new(), || async { Ok::<_, Error>(vec!["users".to_string()]) })
            .await
            .unwrap();

        assert_eq!(tables, vec!["users".to_string()]);
    }

    #[tokio::test]
    async fn empty_or_failed_introspection_is_fatal() {
        let empty = resolve_tables(Vec::new(), || async { Ok::<_, Error>(Vec::new()) }).await;
        assert!(empty
            .unwrap_err()
            .to_string()
            .contains("Unable to retrieve table names"));

        let failed = resolve_tables(Vec::new(), || async {
            Err::<Vec<String>, _>(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "refused",
            )))
        })
        .await;
        assert!(failed.is_err());
    }
}
