//! Lowering from the sqlparser syntax tree to RelDB's statement tree.
//!
//! sqlparser accepts far more SQL than the executor runs. Everything it
//! parses that has no counterpart in [`crate::ast`] is rejected here with
//! [`SqlError::Unsupported`].

use crate::ast::{
    BinaryOp, ColumnDef, ColumnRef, CreateTable, Delete, Expr, ForeignKeyRef, FunctionArgs,
    Insert, Literal, OrderByItem, Placeholder, Select, SelectItem, Statement, TableConstraint,
    TypeName, UnaryOp, Update,
};
use crate::error::{SqlError, SqlResult};
use sqlparser::ast as sql_ast;

/// Converts one statement at a time, numbering `?` markers in order of
/// appearance and refusing to mix them with `:name` markers.
#[derive(Debug, Default)]
pub(crate) struct Lowering {
    named_seen: bool,
    positional_count: usize,
}

impl Lowering {
    pub(crate) fn statement(mut self, stmt: sql_ast::Statement) -> SqlResult<Statement> {
        match stmt {
            sql_ast::Statement::Query(query) => self.query(*query).map(Statement::Select),
            sql_ast::Statement::Insert {
                or,
                ignore,
                table_name,
                columns,
                source,
                on,
                returning,
                replace_into,
                ..
            } => {
                if or.is_some() || ignore || replace_into || on.is_some() {
                    return Err(SqlError::unsupported("INSERT conflict clauses"));
                }
                if returning.is_some() {
                    return Err(SqlError::unsupported("RETURNING"));
                }
                let table = object_name(&table_name)?;
                let columns = (!columns.is_empty()).then(|| idents(columns));
                let source = source.ok_or_else(|| SqlError::unsupported("INSERT without VALUES"))?;
                Ok(Statement::Insert(self.insert(table, columns, *source)?))
            }
            sql_ast::Statement::Update {
                table,
                assignments,
                from,
                selection,
                returning,
            } => {
                if from.is_some() {
                    return Err(SqlError::unsupported("UPDATE ... FROM"));
                }
                if returning.is_some() {
                    return Err(SqlError::unsupported("RETURNING"));
                }
                let table = single_table(&table)?;
                let mut lowered = Vec::with_capacity(assignments.len());
                for assignment in assignments {
                    let [column]: [sql_ast::Ident; 1] = assignment
                        .id
                        .try_into()
                        .map_err(|_| SqlError::unsupported("qualified assignment targets"))?;
                    lowered.push((column.value, self.expr(assignment.value)?));
                }
                let filter = selection.map(|e| self.expr(e)).transpose()?;
                Ok(Statement::Update(Update {
                    table,
                    assignments: lowered,
                    filter,
                }))
            }
            sql_ast::Statement::Delete {
                tables,
                from,
                using,
                selection,
                returning,
                order_by,
                limit,
            } => {
                if !tables.is_empty() || using.is_some() {
                    return Err(SqlError::unsupported("multi-table DELETE"));
                }
                if returning.is_some() {
                    return Err(SqlError::unsupported("RETURNING"));
                }
                if !order_by.is_empty() || limit.is_some() {
                    return Err(SqlError::unsupported("DELETE with ORDER BY or LIMIT"));
                }
                let [from]: [sql_ast::TableWithJoins; 1] = from
                    .try_into()
                    .map_err(|_| SqlError::unsupported("DELETE from several tables"))?;
                let table = single_table(&from)?;
                let filter = selection.map(|e| self.expr(e)).transpose()?;
                Ok(Statement::Delete(Delete { table, filter }))
            }
            sql_ast::Statement::CreateTable {
                or_replace,
                temporary,
                if_not_exists,
                name,
                columns,
                constraints,
                query,
                like,
                ..
            } => {
                if or_replace || temporary {
                    return Err(SqlError::unsupported("CREATE OR REPLACE / TEMPORARY TABLE"));
                }
                if query.is_some() || like.is_some() {
                    return Err(SqlError::unsupported("CREATE TABLE from another table"));
                }
                Ok(Statement::CreateTable(CreateTable {
                    name: object_name(&name)?,
                    if_not_exists,
                    columns: columns
                        .into_iter()
                        .map(column_def)
                        .collect::<SqlResult<_>>()?,
                    constraints: constraints
                        .into_iter()
                        .map(table_constraint)
                        .collect::<SqlResult<_>>()?,
                }))
            }
            sql_ast::Statement::Drop {
                object_type: sql_ast::ObjectType::Table,
                if_exists,
                names,
                cascade,
                ..
            } => {
                if cascade {
                    return Err(SqlError::unsupported("DROP TABLE ... CASCADE"));
                }
                let [name]: [sql_ast::ObjectName; 1] = names
                    .try_into()
                    .map_err(|_| SqlError::unsupported("dropping several tables at once"))?;
                Ok(Statement::DropTable {
                    name: object_name(&name)?,
                    if_exists,
                })
            }
            sql_ast::Statement::StartTransaction { modes, .. } if modes.is_empty() => {
                Ok(Statement::Begin)
            }
            sql_ast::Statement::Commit { chain: false } => Ok(Statement::Commit),
            sql_ast::Statement::Rollback {
                chain: false,
                savepoint: None,
            } => Ok(Statement::Rollback),
            other => Err(SqlError::unsupported(statement_kind(&other))),
        }
    }

    fn insert(
        &mut self,
        table: String,
        columns: Option<Vec<String>>,
        source: sql_ast::Query,
    ) -> SqlResult<Insert> {
        let sql_ast::Query {
            with,
            body,
            order_by,
            limit,
            offset,
            ..
        } = source;
        if with.is_some() || !order_by.is_empty() || limit.is_some() || offset.is_some() {
            return Err(SqlError::unsupported("INSERT with a query source"));
        }
        let sql_ast::SetExpr::Values(values) = *body else {
            return Err(SqlError::unsupported("INSERT ... SELECT"));
        };
        let mut rows = Vec::with_capacity(values.rows.len());
        for row in values.rows {
            rows.push(self.exprs(row)?);
        }
        Ok(Insert {
            table,
            columns,
            rows,
        })
    }

    fn query(&mut self, query: sql_ast::Query) -> SqlResult<Select> {
        let sql_ast::Query {
            with,
            body,
            order_by: terms,
            limit,
            limit_by,
            offset,
            fetch,
            locks,
            for_clause,
        } = query;
        if with.is_some() {
            return Err(SqlError::unsupported("WITH"));
        }
        if fetch.is_some() || !locks.is_empty() || !limit_by.is_empty() || for_clause.is_some() {
            return Err(SqlError::unsupported("FETCH, LIMIT BY, FOR or locking clauses"));
        }
        let select = match *body {
            sql_ast::SetExpr::Select(select) => *select,
            sql_ast::SetExpr::SetOperation { op, .. } => {
                return Err(SqlError::unsupported(format!("{op}")))
            }
            _ => return Err(SqlError::unsupported("query without SELECT")),
        };
        if select.top.is_some() || select.into.is_some() || !select.lateral_views.is_empty() {
            return Err(SqlError::unsupported("TOP, INTO or LATERAL VIEW"));
        }
        if select.having.is_some() || !grouping_is_empty(&select.group_by) {
            return Err(SqlError::unsupported("GROUP BY"));
        }
        if select.qualify.is_some() || !select.named_window.is_empty() {
            return Err(SqlError::unsupported("window clauses"));
        }
        let distinct = match select.distinct {
            None => false,
            Some(sql_ast::Distinct::Distinct) => true,
            Some(sql_ast::Distinct::On(_)) => {
                return Err(SqlError::unsupported("DISTINCT ON"))
            }
        };

        let mut items = Vec::with_capacity(select.projection.len());
        for item in select.projection {
            items.push(self.select_item(item)?);
        }
        let mut from = select.from;
        let from = match from.len() {
            0 => None,
            1 => Some(single_table(&from.remove(0))?),
            _ => return Err(SqlError::unsupported("selecting from several tables")),
        };
        let filter = select.selection.map(|e| self.expr(e)).transpose()?;

        let mut order_by = Vec::with_capacity(terms.len());
        for term in terms {
            if term.nulls_first.is_some() {
                return Err(SqlError::unsupported("NULLS FIRST / NULLS LAST"));
            }
            order_by.push(OrderByItem {
                expr: self.expr(term.expr)?,
                descending: term.asc == Some(false),
            });
        }
        let limit = limit.map(|e| self.expr(e)).transpose()?;
        let offset = offset.map(|o| self.expr(o.value)).transpose()?;

        Ok(Select {
            distinct,
            items,
            from,
            filter,
            order_by,
            limit,
            offset,
        })
    }

    fn select_item(&mut self, item: sql_ast::SelectItem) -> SqlResult<SelectItem> {
        match item {
            sql_ast::SelectItem::Wildcard(options) => {
                plain_wildcard(&options)?;
                Ok(SelectItem::Wildcard)
            }
            sql_ast::SelectItem::QualifiedWildcard(name, options) => {
                plain_wildcard(&options)?;
                Ok(SelectItem::QualifiedWildcard(object_name(&name)?))
            }
            sql_ast::SelectItem::UnnamedExpr(expr) => Ok(SelectItem::Expr {
                expr: self.expr(expr)?,
                alias: None,
            }),
            sql_ast::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectItem::Expr {
                expr: self.expr(expr)?,
                alias: Some(alias.value),
            }),
        }
    }

    fn exprs(&mut self, exprs: Vec<sql_ast::Expr>) -> SqlResult<Vec<Expr>> {
        exprs.into_iter().map(|e| self.expr(e)).collect()
    }

    fn boxed(&mut self, expr: sql_ast::Expr) -> SqlResult<Box<Expr>> {
        self.expr(expr).map(Box::new)
    }

    fn expr(&mut self, expr: sql_ast::Expr) -> SqlResult<Expr> {
        use sql_ast::Expr as E;

        Ok(match expr {
            E::Identifier(ident) => Expr::Column(ColumnRef {
                table: None,
                name: ident.value,
            }),
            E::CompoundIdentifier(parts) => {
                let [table, name]: [sql_ast::Ident; 2] = parts
                    .try_into()
                    .map_err(|_| SqlError::unsupported("schema-qualified column names"))?;
                Expr::Column(ColumnRef {
                    table: Some(table.value),
                    name: name.value,
                })
            }
            E::Value(value) => self.value(value)?,
            E::Nested(inner) => self.expr(*inner)?,
            E::UnaryOp { op, expr } => Expr::Unary {
                op: match op {
                    sql_ast::UnaryOperator::Minus => UnaryOp::Neg,
                    sql_ast::UnaryOperator::Plus => UnaryOp::Plus,
                    sql_ast::UnaryOperator::Not => UnaryOp::Not,
                    other => return Err(SqlError::unsupported(format!("operator {other}"))),
                },
                expr: self.boxed(*expr)?,
            },
            E::BinaryOp { left, op, right } => {
                let op = binary_op(&op)?;
                Expr::Binary {
                    left: self.boxed(*left)?,
                    op,
                    right: self.boxed(*right)?,
                }
            }
            E::IsNull(expr) => Expr::IsNull {
                expr: self.boxed(*expr)?,
                negated: false,
            },
            E::IsNotNull(expr) => Expr::IsNull {
                expr: self.boxed(*expr)?,
                negated: true,
            },
            E::Like {
                negated,
                expr,
                pattern,
                escape_char,
            } => {
                if escape_char.is_some() {
                    return Err(SqlError::unsupported("LIKE ... ESCAPE"));
                }
                Expr::Like {
                    expr: self.boxed(*expr)?,
                    pattern: self.boxed(*pattern)?,
                    negated,
                }
            }
            E::InList {
                expr,
                list,
                negated,
            } => Expr::InList {
                expr: self.boxed(*expr)?,
                list: self.exprs(list)?,
                negated,
            },
            E::Between {
                expr,
                negated,
                low,
                high,
            } => Expr::Between {
                expr: self.boxed(*expr)?,
                low: self.boxed(*low)?,
                high: self.boxed(*high)?,
                negated,
            },
            E::Function(function) => self.function(function)?,
            other => return Err(SqlError::unsupported(format!("expression {other}"))),
        })
    }

    fn value(&mut self, value: sql_ast::Value) -> SqlResult<Expr> {
        use sql_ast::Value as V;

        let literal = match value {
            V::Null => Literal::Null,
            V::Boolean(b) => Literal::Boolean(b),
            V::SingleQuotedString(s) => Literal::String(s),
            V::Number(text, _) => number(&text)?,
            V::Placeholder(marker) => return self.placeholder(&marker).map(Expr::Placeholder),
            other => return Err(SqlError::unsupported(format!("literal {other}"))),
        };
        Ok(Expr::Literal(literal))
    }

    fn placeholder(&mut self, marker: &str) -> SqlResult<Placeholder> {
        if marker == "?" {
            if self.named_seen {
                return Err(mixed_placeholders());
            }
            let index = self.positional_count;
            self.positional_count += 1;
            return Ok(Placeholder::Positional(index));
        }
        match marker.strip_prefix(':') {
            Some(name) if !name.is_empty() => {
                if self.positional_count > 0 {
                    return Err(mixed_placeholders());
                }
                self.named_seen = true;
                Ok(Placeholder::Named(name.to_string()))
            }
            _ => Err(SqlError::unsupported(format!("parameter marker {marker}"))),
        }
    }

    fn function(&mut self, function: sql_ast::Function) -> SqlResult<Expr> {
        if function.over.is_some() || function.filter.is_some() || function.null_treatment.is_some()
        {
            return Err(SqlError::unsupported("window and filtered aggregates"));
        }
        if function.distinct || !function.order_by.is_empty() {
            return Err(SqlError::unsupported("DISTINCT or ORDER BY inside a function call"));
        }
        let name = object_name(&function.name)?.to_ascii_lowercase();
        let star = matches!(
            function.args.as_slice(),
            [sql_ast::FunctionArg::Unnamed(sql_ast::FunctionArgExpr::Wildcard)]
        );
        let args = if star {
            FunctionArgs::Star
        } else {
            let mut list = Vec::with_capacity(function.args.len());
            for arg in function.args {
                match arg {
                    sql_ast::FunctionArg::Unnamed(sql_ast::FunctionArgExpr::Expr(e)) => {
                        list.push(self.expr(e)?);
                    }
                    other => {
                        return Err(SqlError::unsupported(format!("function argument {other}")))
                    }
                }
            }
            FunctionArgs::List(list)
        };
        Ok(Expr::Function { name, args })
    }
}

fn mixed_placeholders() -> SqlError {
    SqlError::syntax("cannot mix named and positional parameters", 0)
}

/// Integer when the text fits an `i64`, real otherwise.
fn number(text: &str) -> SqlResult<Literal> {
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Literal::Integer(n));
    }
    text.parse::<f64>()
        .map(Literal::Real)
        .map_err(|_| SqlError::syntax(format!("invalid number {text}"), 0))
}

fn binary_op(op: &sql_ast::BinaryOperator) -> SqlResult<BinaryOp> {
    use sql_ast::BinaryOperator as B;

    Ok(match op {
        B::Or => BinaryOp::Or,
        B::And => BinaryOp::And,
        B::Eq => BinaryOp::Eq,
        B::NotEq => BinaryOp::NotEq,
        B::Lt => BinaryOp::Lt,
        B::LtEq => BinaryOp::LtEq,
        B::Gt => BinaryOp::Gt,
        B::GtEq => BinaryOp::GtEq,
        B::Plus => BinaryOp::Add,
        B::Minus => BinaryOp::Sub,
        B::Multiply => BinaryOp::Mul,
        B::Divide => BinaryOp::Div,
        B::Modulo => BinaryOp::Mod,
        B::StringConcat => BinaryOp::Concat,
        other => return Err(SqlError::unsupported(format!("operator {other}"))),
    })
}

fn grouping_is_empty(group_by: &sql_ast::GroupByExpr) -> bool {
    matches!(group_by, sql_ast::GroupByExpr::Expressions(exprs) if exprs.is_empty())
}

fn plain_wildcard(options: &sql_ast::WildcardAdditionalOptions) -> SqlResult<()> {
    if options.opt_exclude.is_some()
        || options.opt_except.is_some()
        || options.opt_rename.is_some()
        || options.opt_replace.is_some()
    {
        return Err(SqlError::unsupported("wildcard modifiers"));
    }
    Ok(())
}

fn idents(idents: Vec<sql_ast::Ident>) -> Vec<String> {
    idents.into_iter().map(|ident| ident.value).collect()
}

/// The single unqualified name of a table or function.
fn object_name(name: &sql_ast::ObjectName) -> SqlResult<String> {
    match name.0.as_slice() {
        [ident] => Ok(ident.value.clone()),
        _ => Err(SqlError::unsupported(format!("qualified name {name}"))),
    }
}

/// Table name of a `FROM` or `UPDATE` target without joins or aliases.
fn single_table(table: &sql_ast::TableWithJoins) -> SqlResult<String> {
    if !table.joins.is_empty() {
        return Err(SqlError::unsupported("joins"));
    }
    match &table.relation {
        sql_ast::TableFactor::Table {
            name,
            alias: None,
            args: None,
            ..
        } => object_name(name),
        sql_ast::TableFactor::Table { .. } => {
            Err(SqlError::unsupported("table aliases or table functions"))
        }
        _ => Err(SqlError::unsupported("subqueries in FROM")),
    }
}

fn foreign_key_ref(
    table: &sql_ast::ObjectName,
    columns: &[sql_ast::Ident],
) -> SqlResult<ForeignKeyRef> {
    let column = match columns {
        [] => None,
        [column] => Some(column.value.clone()),
        _ => return Err(SqlError::unsupported("composite foreign keys")),
    };
    Ok(ForeignKeyRef {
        table: object_name(table)?,
        column,
    })
}

fn column_def(def: sql_ast::ColumnDef) -> SqlResult<ColumnDef> {
    let mut column = ColumnDef {
        name: def.name.value,
        type_name: type_name(&def.data_type)?,
        primary_key: false,
        not_null: false,
        unique: false,
        references: None,
    };
    if def.collation.is_some() {
        return Err(SqlError::unsupported("COLLATE"));
    }
    for option in def.options {
        match option.option {
            sql_ast::ColumnOption::Null => column.not_null = false,
            sql_ast::ColumnOption::NotNull => column.not_null = true,
            sql_ast::ColumnOption::Unique {
                is_primary: true, ..
            } => column.primary_key = true,
            sql_ast::ColumnOption::Unique {
                is_primary: false, ..
            } => column.unique = true,
            sql_ast::ColumnOption::ForeignKey {
                foreign_table,
                referred_columns,
                ..
            } => column.references = Some(foreign_key_ref(&foreign_table, &referred_columns)?),
            sql_ast::ColumnOption::DialectSpecific(tokens)
                if tokens
                    .iter()
                    .all(|t| t.to_string().eq_ignore_ascii_case("AUTOINCREMENT")) => {}
            other => return Err(SqlError::unsupported(format!("column option {other}"))),
        }
    }
    Ok(column)
}

fn table_constraint(constraint: sql_ast::TableConstraint) -> SqlResult<TableConstraint> {
    match constraint {
        sql_ast::TableConstraint::Unique {
            columns,
            is_primary,
            ..
        } => {
            let columns = idents(columns);
            Ok(if is_primary {
                TableConstraint::PrimaryKey(columns)
            } else {
                TableConstraint::Unique(columns)
            })
        }
        sql_ast::TableConstraint::ForeignKey {
            columns,
            foreign_table,
            referred_columns,
            ..
        } => {
            let [column]: [sql_ast::Ident; 1] = columns
                .try_into()
                .map_err(|_| SqlError::unsupported("composite foreign keys"))?;
            Ok(TableConstraint::ForeignKey {
                column: column.value,
                references: foreign_key_ref(&foreign_table, &referred_columns)?,
            })
        }
        other => Err(SqlError::unsupported(format!("table constraint {other}"))),
    }
}

/// Splits a rendered type such as `VARCHAR(30)` into name and arguments.
fn type_name(data_type: &sql_ast::DataType) -> SqlResult<TypeName> {
    if matches!(data_type, sql_ast::DataType::Unspecified) {
        return Err(SqlError::unsupported("columns without a declared type"));
    }
    let text = data_type.to_string();
    let Some((name, rest)) = text.split_once('(') else {
        return Ok(TypeName {
            name: text,
            args: Vec::new(),
        });
    };
    let args = rest
        .strip_suffix(')')
        .unwrap_or(rest)
        .split(',')
        .map(|arg| arg.trim().parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| SqlError::unsupported(format!("type {text}")))?;
    Ok(TypeName {
        name: name.trim().to_string(),
        args,
    })
}

/// Short name of a statement the executor does not run.
fn statement_kind(stmt: &sql_ast::Statement) -> String {
    let text = stmt.to_string();
    let words: Vec<&str> = text.split_whitespace().take(2).collect();
    format!("{} statements", words.join(" "))
}
