//! Statement execution against a transaction.
//!
//! Every placeholder is bound before anything runs, and every column
//! reference is checked against the target table, so a statement either
//! fails before touching data or runs to completion. Writes go to the
//! transaction and are only visible elsewhere after commit.

mod eval;

use crate::error::{CoreError, CoreResult};
use crate::params::Params;
use crate::result::ResultSet;
use crate::schema::TableSchema;
use crate::transaction::Transaction;
use crate::value::Value;
use eval::{check_columns, eval, reject_aggregates, truth, Bindings, Env};
use reldb_sql::ast::{
    CreateTable, Delete, Expr, FunctionArgs, Insert, Literal, Select, SelectItem, Update,
};
use reldb_sql::{Placeholder, Statement};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// Executes one statement with one parameter set.
///
/// Transaction control statements are handled by the connection and are
/// rejected here.
pub fn execute(
    txn: &mut Transaction,
    statement: &Statement,
    params: &Params,
) -> CoreResult<ResultSet> {
    let bindings = bind(statement, params)?;
    match statement {
        Statement::CreateTable(create) => create_table(txn, create),
        Statement::DropTable { name, if_exists } => {
            if *if_exists && !txn.catalog().contains(name) {
                return Ok(ResultSet::written(0, None));
            }
            txn.drop_table(name)?;
            Ok(ResultSet::written(0, None))
        }
        Statement::Insert(insert) => execute_insert(txn, insert, &bindings),
        Statement::Select(select) => execute_select(txn, select, &bindings),
        Statement::Update(update) => execute_update(txn, update, &bindings),
        Statement::Delete(delete) => execute_delete(txn, delete, &bindings),
        Statement::Begin | Statement::Commit | Statement::Rollback => Err(
            CoreError::invalid_operation(format!("{statement} must be issued on a connection")),
        ),
    }
}

/// Executes a write statement once per parameter set.
///
/// Affected row counts are summed; the last insert ID is the one of the
/// final execution.
pub fn execute_batch(
    txn: &mut Transaction,
    statement: &Statement,
    batch: &[Params],
) -> CoreResult<ResultSet> {
    if statement.is_query() {
        return Err(CoreError::invalid_operation(
            "batch execution is only supported for statements that write",
        ));
    }
    let mut rows_affected = 0;
    let mut last_insert_id = None;
    for params in batch {
        let result = execute(txn, statement, params)?;
        rows_affected += result.rows_affected();
        last_insert_id = result.last_insert_id();
    }
    Ok(ResultSet::written(rows_affected, last_insert_id))
}

fn bind(statement: &Statement, params: &Params) -> CoreResult<Bindings> {
    statement
        .placeholders()
        .into_iter()
        .map(|placeholder| {
            let value = params.resolve(&placeholder)?;
            Ok((placeholder, value))
        })
        .collect()
}

fn schema_of(txn: &Transaction, table: &str) -> CoreResult<Arc<TableSchema>> {
    Ok(Arc::clone(txn.catalog().require(table)?.schema()))
}

fn create_table(txn: &mut Transaction, create: &CreateTable) -> CoreResult<ResultSet> {
    if create.if_not_exists && txn.catalog().contains(&create.name) {
        return Ok(ResultSet::written(0, None));
    }
    let schema = TableSchema::from_create(create, |table| {
        let target = txn.catalog().require(table)?.schema();
        match target.primary_key_columns().as_slice() {
            [single] => Ok((*single).to_string()),
            _ => Err(CoreError::invalid_schema(format!(
                "table {} has no single-column primary key to reference",
                target.name()
            ))),
        }
    })?;
    txn.create_table(schema)?;
    Ok(ResultSet::written(0, None))
}

fn execute_insert(
    txn: &mut Transaction,
    insert: &Insert,
    bindings: &Bindings,
) -> CoreResult<ResultSet> {
    let schema = schema_of(txn, &insert.table)?;
    let targets: Vec<usize> = match &insert.columns {
        Some(names) => {
            let mut seen = HashSet::new();
            let mut targets = Vec::with_capacity(names.len());
            for name in names {
                let index = schema
                    .column_index(name)
                    .ok_or_else(|| CoreError::unknown_column(name.clone()))?;
                if !seen.insert(index) {
                    return Err(CoreError::execution(format!(
                        "column {name} specified more than once"
                    )));
                }
                targets.push(index);
            }
            targets
        }
        None => (0..schema.columns().len()).collect(),
    };

    let env = Env::new(None, bindings);
    let mut rows = Vec::with_capacity(insert.rows.len());
    for exprs in &insert.rows {
        if exprs.len() != targets.len() {
            return Err(CoreError::execution(format!(
                "{} values for {} columns",
                exprs.len(),
                targets.len()
            )));
        }
        let mut row = vec![Value::Null; schema.columns().len()];
        for (&index, expr) in targets.iter().zip(exprs) {
            reject_aggregates(expr, "VALUES")?;
            row[index] = eval(expr, env)?;
        }
        rows.push(row);
    }

    let auto = schema.auto_increment_column();
    let mut last_insert_id = None;
    for mut row in rows {
        if let Some(index) = auto {
            if row[index].is_null() {
                let max = txn
                    .catalog()
                    .require(schema.name())?
                    .max_integer(index)
                    .unwrap_or(0);
                let next = max
                    .checked_add(1)
                    .ok_or_else(|| CoreError::execution("integer primary key is exhausted"))?;
                row[index] = Value::Integer(next);
            }
        }
        let (row_id, stored) = txn.insert(schema.name(), row)?;
        last_insert_id = auto
            .and_then(|index| stored[index].as_i64())
            .or_else(|| i64::try_from(row_id.as_u64()).ok());
    }
    Ok(ResultSet::written(insert.rows.len() as u64, last_insert_id))
}

/// Rows of `table` for which `filter` is true, in row ID order.
fn matching_rows(
    txn: &Transaction,
    schema: &TableSchema,
    filter: Option<&Expr>,
    bindings: &Bindings,
) -> CoreResult<Vec<(crate::types::RowId, Vec<Value>)>> {
    let table = txn.catalog().require(schema.name())?;
    let env = Env::new(Some(schema), bindings);
    let mut out = Vec::new();
    for (id, row) in table.rows() {
        let keep = match filter {
            Some(filter) => truth(&eval(filter, env.with_row(row))?) == Some(true),
            None => true,
        };
        if keep {
            out.push((id, row.to_vec()));
        }
    }
    Ok(out)
}

fn execute_update(
    txn: &mut Transaction,
    update: &Update,
    bindings: &Bindings,
) -> CoreResult<ResultSet> {
    let schema = schema_of(txn, &update.table)?;
    let mut assignments = Vec::with_capacity(update.assignments.len());
    for (name, expr) in &update.assignments {
        let index = schema
            .column_index(name)
            .ok_or_else(|| CoreError::unknown_column(name.clone()))?;
        check_columns(expr, Some(schema.as_ref()))?;
        reject_aggregates(expr, "SET")?;
        assignments.push((index, expr));
    }
    if let Some(filter) = &update.filter {
        check_columns(filter, Some(schema.as_ref()))?;
        reject_aggregates(filter, "WHERE")?;
    }

    let targets = matching_rows(txn, &schema, update.filter.as_ref(), bindings)?;
    let env = Env::new(Some(schema.as_ref()), bindings);
    let mut count = 0u64;
    for (id, old) in targets {
        let mut new = old.clone();
        for (index, expr) in &assignments {
            new[*index] = eval(expr, env.with_row(&old))?;
        }
        txn.update(schema.name(), id, new)?;
        count += 1;
    }
    Ok(ResultSet::written(count, None))
}

fn execute_delete(
    txn: &mut Transaction,
    delete: &Delete,
    bindings: &Bindings,
) -> CoreResult<ResultSet> {
    let schema = schema_of(txn, &delete.table)?;
    if let Some(filter) = &delete.filter {
        check_columns(filter, Some(schema.as_ref()))?;
        reject_aggregates(filter, "WHERE")?;
    }
    let targets = matching_rows(txn, &schema, delete.filter.as_ref(), bindings)?;
    let count = targets.len() as u64;
    for (id, _) in targets {
        txn.delete(schema.name(), id)?;
    }
    Ok(ResultSet::written(count, None))
}

/// One output column of a `SELECT`.
struct Projection {
    label: String,
    expr: Expr,
}

fn projections(select: &Select, source: Option<&TableSchema>) -> CoreResult<Vec<Projection>> {
    let mut out = Vec::new();
    let all_columns = |out: &mut Vec<Projection>, schema: &TableSchema| {
        for column in schema.columns() {
            out.push(Projection {
                label: column.name.clone(),
                expr: Expr::Column(reldb_sql::ast::ColumnRef {
                    table: None,
                    name: column.name.clone(),
                }),
            });
        }
    };
    for item in &select.items {
        match item {
            SelectItem::Wildcard => {
                let schema = source
                    .ok_or_else(|| CoreError::execution("no tables specified for *"))?;
                all_columns(&mut out, schema);
            }
            SelectItem::QualifiedWildcard(table) => match source {
                Some(schema) if schema.name().eq_ignore_ascii_case(table) => {
                    all_columns(&mut out, schema);
                }
                _ => return Err(CoreError::unknown_table(table.clone())),
            },
            SelectItem::Expr { expr, alias } => {
                check_columns(expr, source)?;
                let label = match (alias, expr) {
                    (Some(alias), _) => alias.clone(),
                    (None, Expr::Column(column)) => column.name.clone(),
                    (None, other) => other.to_string(),
                };
                out.push(Projection {
                    label,
                    expr: expr.clone(),
                });
            }
        }
    }
    Ok(out)
}

/// How one `ORDER BY` term finds its key.
enum SortKey<'a> {
    /// Output column by position.
    Output(usize),
    /// Expression over the source row.
    Expr(&'a Expr),
}

fn sort_keys<'a>(
    select: &'a Select,
    projections: &[Projection],
    source: Option<&TableSchema>,
) -> CoreResult<Vec<(SortKey<'a>, bool)>> {
    let mut keys = Vec::with_capacity(select.order_by.len());
    for item in &select.order_by {
        let key = match &item.expr {
            Expr::Literal(Literal::Integer(n)) => {
                let position = usize::try_from(*n)
                    .ok()
                    .filter(|&p| p >= 1 && p <= projections.len())
                    .ok_or_else(|| {
                        CoreError::execution(format!(
                            "ORDER BY term {n} is out of range, expected 1 to {}",
                            projections.len()
                        ))
                    })?;
                SortKey::Output(position - 1)
            }
            Expr::Column(column)
                if column.table.is_none()
                    && projections
                        .iter()
                        .any(|p| p.label.eq_ignore_ascii_case(&column.name)) =>
            {
                let position = projections
                    .iter()
                    .position(|p| p.label.eq_ignore_ascii_case(&column.name))
                    .unwrap_or_default();
                SortKey::Output(position)
            }
            expr => {
                check_columns(expr, source)?;
                reject_aggregates(expr, "ORDER BY")?;
                SortKey::Expr(expr)
            }
        };
        keys.push((key, item.descending));
    }
    Ok(keys)
}

fn limit_value(expr: Option<&Expr>, bindings: &Bindings, clause: &str) -> CoreResult<Option<i64>> {
    let Some(expr) = expr else {
        return Ok(None);
    };
    check_columns(expr, None)?;
    match eval(expr, Env::new(None, bindings))? {
        Value::Null => Ok(None),
        value => value.as_i64().map(Some).ok_or_else(|| {
            CoreError::execution(format!("{clause} requires an integer, got {value}"))
        }),
    }
}

fn execute_select(
    txn: &mut Transaction,
    select: &Select,
    bindings: &Bindings,
) -> CoreResult<ResultSet> {
    let schema = match &select.from {
        Some(table) => Some(schema_of(txn, table)?),
        None => None,
    };
    let source = schema.as_deref();
    let projections = projections(select, source)?;
    if let Some(filter) = &select.filter {
        check_columns(filter, source)?;
        reject_aggregates(filter, "WHERE")?;
    }
    let keys = sort_keys(select, &projections, source)?;
    let limit = limit_value(select.limit.as_ref(), bindings, "LIMIT")?;
    let offset = limit_value(select.offset.as_ref(), bindings, "OFFSET")?;

    let input: Vec<Vec<Value>> = match source {
        Some(schema) => matching_rows(txn, schema, select.filter.as_ref(), bindings)?
            .into_iter()
            .map(|(_, row)| row)
            .collect(),
        None => {
            let keep = match &select.filter {
                Some(filter) => truth(&eval(filter, Env::new(None, bindings))?) == Some(true),
                None => true,
            };
            if keep {
                vec![Vec::new()]
            } else {
                Vec::new()
            }
        }
    };

    let aggregated = projections.iter().any(|p| p.expr.contains_aggregate());
    let mut rows = if aggregated {
        vec![aggregate_row(&projections, source, &input, bindings)?]
    } else {
        let env = Env::new(source, bindings);
        let mut keyed = Vec::with_capacity(input.len());
        for row in &input {
            let env = env.with_row(row);
            let output = projections
                .iter()
                .map(|p| eval(&p.expr, env))
                .collect::<CoreResult<Vec<_>>>()?;
            let sort = keys
                .iter()
                .map(|(key, _)| match key {
                    SortKey::Output(i) => Ok(output[*i].clone()),
                    SortKey::Expr(expr) => eval(expr, env),
                })
                .collect::<CoreResult<Vec<_>>>()?;
            keyed.push((sort, output));
        }
        if !keys.is_empty() {
            keyed.sort_by(|(a, _), (b, _)| {
                a.iter()
                    .zip(b)
                    .zip(&keys)
                    .map(|((a, b), (_, descending))| {
                        let ord = a.cmp(b);
                        if *descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }
        keyed.into_iter().map(|(_, output)| output).collect()
    };

    if select.distinct {
        let mut seen = HashSet::new();
        rows.retain(|row| seen.insert(row.clone()));
    }
    let skip = offset.map_or(0, |o| usize::try_from(o).unwrap_or(0));
    let take = limit
        .and_then(|l| usize::try_from(l).ok())
        .unwrap_or(usize::MAX);
    let rows: Vec<Vec<Value>> = rows.into_iter().skip(skip).take(take).collect();

    let columns = projections.into_iter().map(|p| p.label).collect();
    Ok(ResultSet::rows(columns, rows))
}

/// Evaluates an aggregate projection over all input rows.
///
/// Each aggregate call is computed first and substituted by a synthetic
/// binding; the rest of the expression is then evaluated against the last
/// input row.
fn aggregate_row(
    projections: &[Projection],
    source: Option<&TableSchema>,
    input: &[Vec<Value>],
    bindings: &Bindings,
) -> CoreResult<Vec<Value>> {
    let mut bindings = bindings.clone();
    let mut rewritten = Vec::with_capacity(projections.len());
    let mut counter = 0usize;
    for projection in projections {
        let mut calls = Vec::new();
        let expr = replace_aggregates(&projection.expr, &mut counter, &mut calls);
        for (placeholder, name, arg) in calls {
            let values = match &arg {
                None => vec![Value::Bool(true); input.len()],
                Some(arg) => {
                    reject_aggregates(arg, "aggregate arguments")?;
                    let env = Env::new(source, &bindings);
                    input
                        .iter()
                        .map(|row| eval(arg, env.with_row(row)))
                        .collect::<CoreResult<Vec<_>>>()?
                }
            };
            let value = eval::aggregate(&name, &values)?;
            bindings.insert(placeholder, value);
        }
        rewritten.push(expr);
    }

    let mut env = Env::new(source, &bindings);
    if let Some(last) = input.last() {
        env = env.with_row(last);
    }
    rewritten.iter().map(|expr| eval(expr, env)).collect()
}

type AggregateCall = (Placeholder, String, Option<Expr>);

fn replace_aggregates(expr: &Expr, counter: &mut usize, calls: &mut Vec<AggregateCall>) -> Expr {
    let boxed = |e: &Expr, counter: &mut usize, calls: &mut Vec<AggregateCall>| {
        Box::new(replace_aggregates(e, counter, calls))
    };
    match expr {
        Expr::Function { name, args } if reldb_sql::ast::is_aggregate(name) => {
            let arg = match args {
                FunctionArgs::Star => None,
                FunctionArgs::List(list) if list.len() == 1 => Some(list[0].clone()),
                // Wrong arity; keep the call so evaluation reports it.
                FunctionArgs::List(_) => return expr.clone(),
            };
            let placeholder = Placeholder::Named(format!("#{counter}"));
            *counter += 1;
            calls.push((placeholder.clone(), name.clone(), arg));
            Expr::Placeholder(placeholder)
        }
        Expr::Unary { op, expr } => Expr::Unary {
            op: *op,
            expr: boxed(expr, counter, calls),
        },
        Expr::Binary { left, op, right } => Expr::Binary {
            left: boxed(left, counter, calls),
            op: *op,
            right: boxed(right, counter, calls),
        },
        Expr::IsNull { expr, negated } => Expr::IsNull {
            expr: boxed(expr, counter, calls),
            negated: *negated,
        },
        Expr::Like {
            expr,
            pattern,
            negated,
        } => Expr::Like {
            expr: boxed(expr, counter, calls),
            pattern: boxed(pattern, counter, calls),
            negated: *negated,
        },
        Expr::InList {
            expr,
            list,
            negated,
        } => Expr::InList {
            expr: boxed(expr, counter, calls),
            list: list
                .iter()
                .map(|e| replace_aggregates(e, counter, calls))
                .collect(),
            negated: *negated,
        },
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => Expr::Between {
            expr: boxed(expr, counter, calls),
            low: boxed(low, counter, calls),
            high: boxed(high, counter, calls),
            negated: *negated,
        },
        Expr::Function { name, args } => Expr::Function {
            name: name.clone(),
            args: match args {
                FunctionArgs::Star => FunctionArgs::Star,
                FunctionArgs::List(list) => FunctionArgs::List(
                    list.iter()
                        .map(|e| replace_aggregates(e, counter, calls))
                        .collect(),
                ),
            },
        },
        Expr::Literal(_) | Expr::Column(_) | Expr::Placeholder(_) => expr.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;
    use crate::storage::{Catalog, RowIdAllocator};
    use crate::transaction::Transaction;
    use crate::types::{SequenceNumber, TransactionId};
    use reldb_sql::parse;

    fn txn() -> Transaction {
        Transaction::new(
            TransactionId::new(1),
            SequenceNumber::new(0),
            Arc::new(Catalog::new()),
            RowIdAllocator::new(),
            true,
        )
    }

    fn run(txn: &mut Transaction, sql: &str, params: Params) -> CoreResult<ResultSet> {
        execute(txn, &parse(sql).unwrap(), &params)
    }

    fn rows(txn: &mut Transaction, sql: &str) -> Vec<Vec<Value>> {
        run(txn, sql, Params::None)
            .unwrap()
            .map(|row| row.into_values())
            .collect()
    }

    fn ints(values: &[&[i64]]) -> Vec<Vec<Value>> {
        values
            .iter()
            .map(|row| row.iter().map(|&n| Value::Integer(n)).collect())
            .collect()
    }

    fn some_table() -> Transaction {
        let mut txn = txn();
        run(&mut txn, "CREATE TABLE some_table (x int, y int)", Params::None).unwrap();
        let stmt = parse("INSERT INTO some_table (x, y) VALUES (:x, :y)").unwrap();
        let batch = vec![
            params! { "x" => 1, "y" => 1 },
            params! { "x" => 2, "y" => 4 },
            params! { "x" => 6, "y" => 8 },
            params! { "x" => 9, "y" => 10 },
        ];
        let result = execute_batch(&mut txn, &stmt, &batch).unwrap();
        assert_eq!(result.rows_affected(), 4);
        txn
    }

    #[test]
    fn select_without_from() {
        let mut txn = txn();
        let result = run(&mut txn, "select 'hello world'", Params::None).unwrap();
        assert_eq!(result.columns(), ["'hello world'"]);
        assert_eq!(result.all()[0].values(), [Value::from("hello world")]);
    }

    #[test]
    fn select_in_insertion_order() {
        let mut txn = some_table();
        assert_eq!(
            rows(&mut txn, "SELECT x, y FROM some_table"),
            ints(&[&[1, 1], &[2, 4], &[6, 8], &[9, 10]])
        );
    }

    #[test]
    fn select_with_filter_parameter() {
        let mut txn = some_table();
        let result = run(
            &mut txn,
            "SELECT x, y FROM some_table WHERE y > :y",
            params! { "y" => 6 },
        )
        .unwrap();
        let got: Vec<Vec<Value>> = result.map(|r| r.into_values()).collect();
        assert_eq!(got, ints(&[&[6, 8], &[9, 10]]));
    }

    #[test]
    fn order_by_and_limit() {
        let mut txn = some_table();
        assert_eq!(
            rows(&mut txn, "SELECT x, y FROM some_table ORDER BY x DESC, y LIMIT 2"),
            ints(&[&[9, 10], &[6, 8]])
        );
        assert_eq!(
            rows(&mut txn, "SELECT x AS a FROM some_table ORDER BY a DESC LIMIT 1 OFFSET 1"),
            ints(&[&[6]])
        );
        assert_eq!(
            rows(&mut txn, "SELECT y, x FROM some_table ORDER BY 2 DESC LIMIT 1"),
            ints(&[&[10, 9]])
        );
    }

    #[test]
    fn nulls_sort_first() {
        let mut txn = some_table();
        run(&mut txn, "INSERT INTO some_table (x) VALUES (0)", Params::None).unwrap();
        let got = rows(&mut txn, "SELECT y FROM some_table ORDER BY y");
        assert_eq!(got[0], vec![Value::Null]);
    }

    #[test]
    fn aggregates_over_filtered_rows() {
        let mut txn = some_table();
        let got = rows(
            &mut txn,
            "SELECT count(*), sum(y), max(x), avg(x) FROM some_table WHERE x > 1",
        );
        assert_eq!(
            got,
            vec![vec![
                Value::Integer(3),
                Value::Integer(22),
                Value::Integer(9),
                Value::Real(17.0 / 3.0),
            ]]
        );
        let empty = rows(&mut txn, "SELECT count(*), sum(y) FROM some_table WHERE x > 100");
        assert_eq!(empty, vec![vec![Value::Integer(0), Value::Null]]);
    }

    #[test]
    fn distinct_rows() {
        let mut txn = some_table();
        run(&mut txn, "INSERT INTO some_table VALUES (1, 1)", Params::None).unwrap();
        assert_eq!(rows(&mut txn, "SELECT DISTINCT x FROM some_table").len(), 4);
    }

    #[test]
    fn update_and_delete_report_counts() {
        let mut txn = some_table();
        let result = run(
            &mut txn,
            "UPDATE some_table SET y = :y WHERE x = :x",
            params! { "x" => 9, "y" => 11 },
        )
        .unwrap();
        assert_eq!(result.rows_affected(), 1);
        assert_eq!(
            rows(&mut txn, "SELECT y FROM some_table WHERE x = 9"),
            ints(&[&[11]])
        );

        let result = run(&mut txn, "DELETE FROM some_table WHERE y < 5", Params::None).unwrap();
        assert_eq!(result.rows_affected(), 2);
        assert_eq!(rows(&mut txn, "SELECT * FROM some_table").len(), 2);
    }

    #[test]
    fn update_reads_old_row() {
        let mut txn = some_table();
        run(&mut txn, "UPDATE some_table SET x = y, y = x WHERE x = 2", Params::None).unwrap();
        assert_eq!(
            rows(&mut txn, "SELECT x, y FROM some_table WHERE x = 4"),
            ints(&[&[4, 2]])
        );
    }

    #[test]
    fn integer_primary_key_is_assigned() {
        let mut txn = txn();
        run(
            &mut txn,
            "CREATE TABLE user_account (id INTEGER PRIMARY KEY, name VARCHAR(30) NOT NULL)",
            Params::None,
        )
        .unwrap();
        let first = run(
            &mut txn,
            "INSERT INTO user_account (name) VALUES (?)",
            params!["spongebob"],
        )
        .unwrap();
        assert_eq!(first.last_insert_id(), Some(1));
        let second = run(
            &mut txn,
            "INSERT INTO user_account (id, name) VALUES (10, 'sandy')",
            Params::None,
        )
        .unwrap();
        assert_eq!(second.last_insert_id(), Some(10));
        let third = run(
            &mut txn,
            "INSERT INTO user_account (name) VALUES ('patrick')",
            Params::None,
        )
        .unwrap();
        assert_eq!(third.last_insert_id(), Some(11));
    }

    #[test]
    fn missing_parameter_fails_before_writing() {
        let mut txn = some_table();
        let err = run(
            &mut txn,
            "INSERT INTO some_table (x, y) VALUES (:x, :y)",
            params! { "x" => 1 },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Parameter { .. }));
        assert_eq!(rows(&mut txn, "SELECT * FROM some_table").len(), 4);
    }

    #[test]
    fn unknown_names_are_reported() {
        let mut txn = some_table();
        assert!(matches!(
            run(&mut txn, "SELECT z FROM some_table", Params::None),
            Err(CoreError::UnknownColumn { .. })
        ));
        assert!(matches!(
            run(&mut txn, "SELECT * FROM nothing", Params::None),
            Err(CoreError::UnknownTable { .. })
        ));
        assert!(matches!(
            run(&mut txn, "CREATE TABLE some_table (a int)", Params::None),
            Err(CoreError::TableExists { .. })
        ));
        run(&mut txn, "CREATE TABLE IF NOT EXISTS some_table (a int)", Params::None).unwrap();
        run(&mut txn, "DROP TABLE IF EXISTS nothing", Params::None).unwrap();
    }

    #[test]
    fn value_count_must_match_columns() {
        let mut txn = some_table();
        let err = run(&mut txn, "INSERT INTO some_table (x) VALUES (1, 2)", Params::None)
            .unwrap_err();
        assert!(matches!(err, CoreError::Execution { .. }));
    }

    #[test]
    fn foreign_key_resolves_to_primary_key() {
        let mut txn = txn();
        run(
            &mut txn,
            "CREATE TABLE user_account (id INTEGER PRIMARY KEY, name TEXT)",
            Params::None,
        )
        .unwrap();
        run(
            &mut txn,
            "CREATE TABLE address (id INTEGER PRIMARY KEY, \
             user_id INTEGER NOT NULL REFERENCES user_account)",
            Params::None,
        )
        .unwrap();
        let err = run(
            &mut txn,
            "INSERT INTO address (user_id) VALUES (5)",
            Params::None,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
    }

    #[test]
    fn batch_rejects_queries() {
        let mut txn = some_table();
        let stmt = parse("SELECT * FROM some_table").unwrap();
        assert!(execute_batch(&mut txn, &stmt, &[Params::None]).is_err());
    }
}
