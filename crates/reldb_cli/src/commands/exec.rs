//! Exec command implementation.

use super::output::{print_outputs, StatementOutput};
use super::STORE_URL;
use crate::error::CliError;
use reldb_core::{parse_script, Config, CoreResult, Engine, Params, Value};
use std::collections::BTreeMap;
use tracing::info;

/// Parses a `name=value` parameter.
///
/// Values are read as NULL, booleans, integers or reals when they look like
/// one; anything else, or anything in single quotes, is text.
pub fn parse_param(arg: &str) -> Result<(String, Value), CliError> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| CliError::InvalidParam(arg.to_string()))?;
    let name = name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(CliError::InvalidParam(arg.to_string()));
    }
    Ok((name.to_string(), parse_value(value)))
}

fn parse_value(text: &str) -> Value {
    if let Some(quoted) = text
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
    {
        return Value::from(quoted);
    }
    if text.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if text.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(n) = text.parse::<i64>() {
        return Value::Integer(n);
    }
    if let Ok(r) = text.parse::<f64>() {
        if r.is_finite() {
            return Value::Real(r);
        }
    }
    Value::from(text)
}

/// Runs the exec command.
pub fn run(
    sql: &[String],
    params: Vec<(String, Value)>,
    format: &str,
    echo: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut named = BTreeMap::new();
    for (name, value) in params {
        if named.insert(name.clone(), value).is_some() {
            return Err(CliError::DuplicateParam(name).into());
        }
    }
    let params = if named.is_empty() {
        Params::None
    } else {
        Params::Named(named)
    };

    let engine = Engine::create(STORE_URL, Config::new().echo(echo))?;
    info!("Running {} statement argument(s)", sql.len());
    let outputs = execute_all(&engine, sql, &params)?;
    print_outputs(&mut std::io::stdout().lock(), &outputs, format)?;
    engine.dispose();
    Ok(())
}

/// Runs every statement in `sql` on one connection, then commits.
///
/// Each argument may hold several statements separated by semicolons. The
/// same parameters are offered to every statement.
pub fn execute_all(
    engine: &Engine,
    sql: &[String],
    params: &Params,
) -> CoreResult<Vec<StatementOutput>> {
    let mut conn = engine.connect()?;
    let mut outputs = Vec::new();
    for text in sql {
        for statement in parse_script(text)? {
            let result = conn.execute_statement(&statement, params.clone())?;
            outputs.push(StatementOutput::new(&statement, result));
        }
    }
    conn.commit()?;
    conn.close()?;
    Ok(outputs)
}
