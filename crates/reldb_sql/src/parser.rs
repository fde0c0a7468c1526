//! Statement parsing on top of sqlparser's SQLite dialect.

use crate::ast::Statement;
use crate::error::{SqlError, SqlResult};
use crate::lower::Lowering;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::keywords::ALL_KEYWORDS;
use sqlparser::parser::Parser as SqlParser;

/// Returns true for words sqlparser treats as keywords. Identifiers
/// spelled like one are quoted when rendered.
pub(crate) fn is_reserved(word: &str) -> bool {
    ALL_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

fn parse_all(text: &str) -> SqlResult<Vec<sqlparser::ast::Statement>> {
    SqlParser::parse_sql(&SQLiteDialect {}, text).map_err(|e| SqlError::from(e).locate(text))
}

/// Parses exactly one statement. A trailing semicolon is allowed.
///
/// # Errors
///
/// Returns [`SqlError::Empty`] for blank text, [`SqlError::Syntax`] for
/// anything that is not a single well-formed statement and
/// [`SqlError::Unsupported`] for valid SQL the engine does not run.
pub fn parse(text: &str) -> SqlResult<Statement> {
    let mut statements = parse_all(text)?;
    match statements.len() {
        0 => Err(SqlError::Empty),
        1 => Lowering::default().statement(statements.remove(0)),
        n => Err(SqlError::syntax(
            format!("expected a single statement, found {n}"),
            0,
        )),
    }
}

/// Parses a semicolon-separated sequence of statements.
///
/// Blank scripts yield an empty vector. Parameter numbering starts over
/// for every statement.
pub fn parse_script(text: &str) -> SqlResult<Vec<Statement>> {
    parse_all(text)?
        .into_iter()
        .map(|stmt| Lowering::default().statement(stmt))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        BinaryOp, ColumnRef, Expr, ForeignKeyRef, Literal, Placeholder, SelectItem,
        TableConstraint,
    };
    use proptest::prelude::*;

    fn col(name: &str) -> Expr {
        Expr::Column(ColumnRef {
            table: None,
            name: name.into(),
        })
    }

    #[test]
    fn hello_world_without_from() {
        let stmt = parse("SELECT 'Hello World'").unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected select");
        };
        assert!(select.from.is_none());
        assert_eq!(
            select.items,
            vec![SelectItem::Expr {
                expr: Expr::Literal(Literal::String("Hello World".into())),
                alias: None,
            }]
        );
    }

    #[test]
    fn create_table_with_inline_constraints() {
        let stmt = parse(
            "CREATE TABLE address (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES user_account(id),
                email_address VARCHAR(255) NOT NULL
            )",
        )
        .unwrap();
        let Statement::CreateTable(create) = stmt else {
            panic!("expected create table");
        };
        assert_eq!(create.name, "address");
        assert_eq!(create.columns.len(), 3);
        assert!(create.columns[0].primary_key);
        assert!(create.columns[1].not_null);
        assert_eq!(
            create.columns[1].references,
            Some(ForeignKeyRef {
                table: "user_account".into(),
                column: Some("id".into()),
            })
        );
        assert_eq!(create.columns[2].type_name.name, "VARCHAR");
        assert_eq!(create.columns[2].type_name.args, vec![255]);
    }

    #[test]
    fn create_table_with_table_constraints() {
        let stmt = parse(
            "CREATE TABLE IF NOT EXISTS t (a int, b int, PRIMARY KEY (a), \
             FOREIGN KEY (b) REFERENCES other (id))",
        )
        .unwrap();
        let Statement::CreateTable(create) = stmt else {
            panic!("expected create table");
        };
        assert!(create.if_not_exists);
        assert_eq!(
            create.constraints,
            vec![
                TableConstraint::PrimaryKey(vec!["a".into()]),
                TableConstraint::ForeignKey {
                    column: "b".into(),
                    references: ForeignKeyRef {
                        table: "other".into(),
                        column: Some("id".into()),
                    },
                },
            ]
        );
    }

    #[test]
    fn multi_row_insert() {
        let stmt = parse("INSERT INTO some_table (x, y) VALUES (1, 1), (2, 4);").unwrap();
        let Statement::Insert(insert) = stmt else {
            panic!("expected insert");
        };
        assert_eq!(insert.columns, Some(vec!["x".into(), "y".into()]));
        assert_eq!(insert.rows.len(), 2);
    }

    #[test]
    fn select_with_filter_and_order() {
        let stmt = parse("SELECT x, y FROM some_table WHERE y > :y ORDER BY x, y DESC LIMIT 5")
            .unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected select");
        };
        assert_eq!(select.from.as_deref(), Some("some_table"));
        assert_eq!(
            select.filter,
            Some(Expr::Binary {
                left: Box::new(col("y")),
                op: BinaryOp::Gt,
                right: Box::new(Expr::Placeholder(Placeholder::Named("y".into()))),
            })
        );
        assert_eq!(select.order_by.len(), 2);
        assert!(!select.order_by[0].descending);
        assert!(select.order_by[1].descending);
        assert_eq!(select.limit, Some(Expr::Literal(Literal::Integer(5))));
    }

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        let Statement::Select(select) = parse("SELECT * FROM t WHERE a = 1 OR b = 2 AND c = 3")
            .unwrap()
        else {
            panic!("expected select");
        };
        let Some(Expr::Binary { op, right, .. }) = select.filter else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Or);
        assert!(matches!(
            *right,
            Expr::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
    }

    #[test]
    fn update_and_delete() {
        let stmt = parse("UPDATE some_table SET y=:y WHERE x=:x").unwrap();
        assert_eq!(
            stmt.placeholders(),
            vec![
                Placeholder::Named("y".into()),
                Placeholder::Named("x".into())
            ]
        );
        let stmt = parse("DELETE FROM some_table WHERE x IN (1, 2) AND y NOT BETWEEN 3 AND 4")
            .unwrap();
        assert!(matches!(stmt, Statement::Delete(_)));
    }

    #[test]
    fn positional_placeholders_are_numbered() {
        let stmt = parse("INSERT INTO t VALUES (?, ?, ?)").unwrap();
        assert_eq!(
            stmt.placeholders(),
            vec![
                Placeholder::Positional(0),
                Placeholder::Positional(1),
                Placeholder::Positional(2)
            ]
        );
    }

    #[test]
    fn mixed_placeholders_rejected() {
        let err = parse("SELECT * FROM t WHERE a = :a AND b = ?").unwrap_err();
        assert!(matches!(err, SqlError::Syntax { .. }));
        let scripts = parse_script("SELECT * FROM t WHERE a = :a; SELECT * FROM t WHERE b = ?");
        assert_eq!(scripts.unwrap().len(), 2);
    }

    #[test]
    fn malformed_statements_rejected() {
        assert!(matches!(
            parse("SELEC x FROM t"),
            Err(SqlError::Syntax { .. })
        ));
        assert!(matches!(
            parse("SELECT x FROM"),
            Err(SqlError::Syntax { .. })
        ));
        assert!(matches!(
            parse("INSERT INTO t VALUES (1"),
            Err(SqlError::Syntax { .. })
        ));
        assert!(matches!(parse("   ;  "), Err(SqlError::Empty)));
        assert!(matches!(parse(""), Err(SqlError::Empty)));
        assert!(matches!(
            parse("SELECT 1; SELECT 2"),
            Err(SqlError::Syntax { .. })
        ));
    }

    #[test]
    fn syntax_errors_carry_offsets() {
        let err = parse("SELEC x FROM t").unwrap_err();
        assert_eq!(err.position(), Some(0));
        let err = parse_script("SELECT 1;\nSELEC x").unwrap_err();
        assert_eq!(err.position(), Some(10));
    }

    #[test]
    fn valid_sql_outside_the_subset_is_unsupported() {
        for text in [
            "SELECT a FROM t JOIN u ON t.id = u.id",
            "SELECT a FROM t GROUP BY a",
            "SELECT a FROM t UNION SELECT a FROM u",
            "INSERT INTO t SELECT * FROM u",
            "CREATE INDEX i ON t (a)",
            "SELECT a FROM t AS x",
        ] {
            assert!(
                matches!(parse(text), Err(SqlError::Unsupported(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn script_splits_statements() {
        let statements =
            parse_script("CREATE TABLE t (x int); INSERT INTO t VALUES (?); SELECT * FROM t;")
                .unwrap();
        assert_eq!(statements.len(), 3);
        assert!(statements[2].is_query());
        assert!(parse_script(" ; ").unwrap().is_empty());
    }

    #[test]
    fn transaction_control() {
        assert_eq!(parse("BEGIN").unwrap(), Statement::Begin);
        assert_eq!(parse("BEGIN TRANSACTION").unwrap(), Statement::Begin);
        assert_eq!(parse("commit transaction").unwrap(), Statement::Commit);
        assert_eq!(parse("ROLLBACK;").unwrap(), Statement::Rollback);
    }

    #[test]
    fn aggregate_detection() {
        let Statement::Select(select) = parse("SELECT count(*) FROM t").unwrap() else {
            panic!("expected select");
        };
        let SelectItem::Expr { expr, .. } = &select.items[0] else {
            panic!("expected expr");
        };
        assert!(expr.contains_aggregate());
    }

    #[test]
    fn reals_and_oversized_integers_become_reals() {
        let Statement::Select(select) = parse("SELECT 1.5, 99999999999999999999").unwrap() else {
            panic!("expected select");
        };
        assert_eq!(
            select.items[0],
            SelectItem::Expr {
                expr: Expr::Literal(Literal::Real(1.5)),
                alias: None,
            }
        );
        assert!(matches!(
            select.items[1],
            SelectItem::Expr {
                expr: Expr::Literal(Literal::Real(_)),
                ..
            }
        ));
    }

    proptest! {
        #[test]
        fn integer_literals_survive(n in 0i64..i64::MAX) {
            let Statement::Select(select) = parse(&format!("SELECT {n}")).unwrap() else {
                panic!("expected select");
            };
            prop_assert_eq!(
                select.items,
                vec![SelectItem::Expr {
                    expr: Expr::Literal(Literal::Integer(n)),
                    alias: None,
                }]
            );
        }

        #[test]
        fn arbitrary_text_never_panics(text in "\\PC{0,64}") {
            let _ = parse(&text);
            let _ = parse_script(&text);
        }
    }
}
