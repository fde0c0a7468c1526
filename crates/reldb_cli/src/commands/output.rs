//! Rendering of statement results.

use crate::error::CliError;
use reldb_core::{ResultSet, Row, Statement};
use serde::Serialize;
use std::io::Write;

/// Result of one executed statement.
#[derive(Debug, Serialize)]
pub struct StatementOutput {
    /// Statement as executed.
    pub statement: String,
    /// Column names; empty for writes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    /// Rows returned by a query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    /// Rows changed by a write.
    pub rows_affected: u64,
    /// Key of the last inserted row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}

impl StatementOutput {
    /// Collects a statement's result.
    pub fn new(statement: &Statement, result: ResultSet) -> Self {
        let columns = result.columns().to_vec();
        let rows_affected = result.rows_affected();
        let last_insert_id = result.last_insert_id();
        let rows = result.is_query().then(|| result.all());
        Self {
            statement: statement.to_string(),
            columns,
            rows,
            rows_affected,
            last_insert_id,
        }
    }
}

/// Writes outputs as text or JSON.
pub fn print_outputs(
    out: &mut dyn Write,
    outputs: &[StatementOutput],
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => {
            writeln!(out, "{}", serde_json::to_string_pretty(outputs)?)?;
        }
        "text" => {
            for output in outputs {
                print_text(out, output)?;
            }
        }
        other => return Err(CliError::UnknownFormat(other.to_string()).into()),
    }
    Ok(())
}

fn print_text(out: &mut dyn Write, output: &StatementOutput) -> std::io::Result<()> {
    match &output.rows {
        Some(rows) => {
            writeln!(out, "{}", output.columns.join(" | "))?;
            for row in rows {
                writeln!(out, "{row}")?;
            }
            writeln!(out, "({} row{})", rows.len(), plural(rows.len()))
        }
        None => {
            let affected = usize::try_from(output.rows_affected).unwrap_or(usize::MAX);
            write!(out, "✓ {affected} row{} affected", plural(affected))?;
            if let Some(id) = output.last_insert_id {
                write!(out, ", last insert id {id}")?;
            }
            writeln!(out)
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
