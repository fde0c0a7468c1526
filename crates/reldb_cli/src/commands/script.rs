//! Script command implementation.

use super::output::{print_outputs, StatementOutput};
use super::STORE_URL;
use reldb_core::{parse_script, Config, CoreResult, Engine};
use std::path::Path;
use tracing::info;

/// Runs the script command.
pub fn run(path: &Path, format: &str, echo: bool) -> Result<(), Box<dyn std::error::Error>> {
    info!("Running script {:?}", path);
    let engine = Engine::create(STORE_URL, Config::new().echo(echo))?;
    let outputs = run_file(&engine, path)?;
    print_outputs(&mut std::io::stdout().lock(), &outputs, format)?;
    if format == "text" {
        println!("✓ {} statement(s) committed", outputs.len());
    }
    engine.dispose();
    Ok(())
}

/// Reads and runs a script file.
pub fn run_file(
    engine: &Engine,
    path: &Path,
) -> Result<Vec<StatementOutput>, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read script {}: {e}", path.display()))?;
    Ok(run_script(engine, &text)?)
}

/// Runs every statement of `text` in one transaction scope.
///
/// The whole script is parsed before anything runs. The scope commits
/// after the last statement; any failure rolls back every statement.
pub fn run_script(engine: &Engine, text: &str) -> CoreResult<Vec<StatementOutput>> {
    let statements = parse_script(text)?;
    let mut scope = engine.begin()?;
    let mut outputs = Vec::with_capacity(statements.len());
    for statement in &statements {
        let result = scope.execute_statement(statement, ())?;
        outputs.push(StatementOutput::new(statement, result));
    }
    scope.commit()?;
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reldb_core::ErrorKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SCRIPT: &str = "
        CREATE TABLE some_table (x int, y int);
        INSERT INTO some_table (x, y) VALUES (1, 1);
        INSERT INTO some_table (x, y) VALUES (2, 4);
        UPDATE some_table SET y = 11 WHERE x = 2;
        SELECT x, y FROM some_table ORDER BY x;
    ";

    fn script_file(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn runs_a_file_and_commits() {
        let file = script_file(SCRIPT);
        let engine = Engine::in_memory();
        let outputs = run_file(&engine, file.path()).unwrap();
        assert_eq!(outputs.len(), 5);
        assert_eq!(outputs[3].rows_affected, 1);
        let rows: Vec<String> = outputs[4]
            .rows
            .as_ref()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(rows, vec!["(1, 1)", "(2, 11)"]);
        assert!(engine.has_table("some_table").unwrap());
    }

    #[test]
    fn failing_statement_rolls_back_the_script() {
        let file = script_file(
            "CREATE TABLE t (id int PRIMARY KEY);
             INSERT INTO t (id) VALUES (1);
             INSERT INTO t (id) VALUES (1);",
        );
        let engine = Engine::in_memory();
        let err = run_file(&engine, file.path()).unwrap_err();
        let core = err
            .downcast_ref::<reldb_core::CoreError>()
            .expect("store error");
        assert_eq!(core.kind(), ErrorKind::Constraint);
        assert!(engine.table_names().unwrap().is_empty());
    }

    #[test]
    fn syntax_errors_stop_before_running() {
        let engine = Engine::in_memory();
        let err = run_script(&engine, "CREATE TABLE t (x int); SELECT (1;").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert!(!engine.has_table("t").unwrap());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::in_memory();
        let err = run_file(&engine, &dir.path().join("missing.sql")).unwrap_err();
        assert!(err.to_string().contains("cannot read script"));
    }
}
