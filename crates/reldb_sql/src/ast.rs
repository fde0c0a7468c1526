//! Abstract syntax tree for the supported SQL subset.

use std::fmt;

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `CREATE TABLE`
    CreateTable(CreateTable),
    /// `DROP TABLE`
    DropTable {
        /// Table name.
        name: String,
        /// `IF EXISTS` was given.
        if_exists: bool,
    },
    /// `INSERT INTO`
    Insert(Insert),
    /// `SELECT`
    Select(Select),
    /// `UPDATE`
    Update(Update),
    /// `DELETE FROM`
    Delete(Delete),
    /// `BEGIN [TRANSACTION]`
    Begin,
    /// `COMMIT [TRANSACTION]`
    Commit,
    /// `ROLLBACK [TRANSACTION]`
    Rollback,
}

impl Statement {
    /// Returns true if the statement only reads data.
    #[must_use]
    pub fn is_query(&self) -> bool {
        matches!(self, Statement::Select(_))
    }

    /// Returns true for `BEGIN`, `COMMIT` and `ROLLBACK`.
    #[must_use]
    pub fn is_transaction_control(&self) -> bool {
        matches!(
            self,
            Statement::Begin | Statement::Commit | Statement::Rollback
        )
    }

    /// Returns the placeholders referenced by the statement, in order of
    /// first appearance and without duplicates.
    #[must_use]
    pub fn placeholders(&self) -> Vec<Placeholder> {
        let mut out: Vec<Placeholder> = Vec::new();
        self.for_each_expr(&mut |expr| {
            expr.walk(&mut |e| {
                if let Expr::Placeholder(p) = e {
                    if !out.contains(p) {
                        out.push(p.clone());
                    }
                }
            });
        });
        out
    }

    fn for_each_expr(&self, f: &mut dyn FnMut(&Expr)) {
        match self {
            Statement::Insert(insert) => {
                for expr in insert.rows.iter().flatten() {
                    f(expr);
                }
            }
            Statement::Select(select) => {
                for item in &select.items {
                    if let SelectItem::Expr { expr, .. } = item {
                        f(expr);
                    }
                }
                if let Some(filter) = &select.filter {
                    f(filter);
                }
                for order in &select.order_by {
                    f(&order.expr);
                }
                if let Some(limit) = &select.limit {
                    f(limit);
                }
                if let Some(offset) = &select.offset {
                    f(offset);
                }
            }
            Statement::Update(update) => {
                for (_, expr) in &update.assignments {
                    f(expr);
                }
                if let Some(filter) = &update.filter {
                    f(filter);
                }
            }
            Statement::Delete(delete) => {
                if let Some(filter) = &delete.filter {
                    f(filter);
                }
            }
            Statement::CreateTable(_)
            | Statement::DropTable { .. }
            | Statement::Begin
            | Statement::Commit
            | Statement::Rollback => {}
        }
    }
}

/// `CREATE TABLE` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTable {
    /// Table name.
    pub name: String,
    /// `IF NOT EXISTS` was given.
    pub if_not_exists: bool,
    /// Column definitions in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Table-level constraints.
    pub constraints: Vec<TableConstraint>,
}

/// A column definition inside `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub type_name: TypeName,
    /// Inline `PRIMARY KEY`.
    pub primary_key: bool,
    /// Inline `NOT NULL`.
    pub not_null: bool,
    /// Inline `UNIQUE`.
    pub unique: bool,
    /// Inline `REFERENCES table(column)`.
    pub references: Option<ForeignKeyRef>,
}

/// A declared column type such as `VARCHAR(30)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeName {
    /// Type name as written.
    pub name: String,
    /// Numeric arguments, e.g. the length of a `VARCHAR`.
    pub args: Vec<i64>,
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.args.is_empty() {
            let args: Vec<String> = self.args.iter().map(ToString::to_string).collect();
            write!(f, "({})", args.join(", "))?;
        }
        Ok(())
    }
}

/// Target of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    /// Referenced table.
    pub table: String,
    /// Referenced column; `None` means the referenced table's primary key.
    pub column: Option<String>,
}

/// Table-level constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableConstraint {
    /// `PRIMARY KEY (a, b, ...)`
    PrimaryKey(Vec<String>),
    /// `UNIQUE (a, b, ...)`
    Unique(Vec<String>),
    /// `FOREIGN KEY (c) REFERENCES t(k)`
    ForeignKey {
        /// Referencing column.
        column: String,
        /// Referenced target.
        references: ForeignKeyRef,
    },
}

/// `INSERT` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    /// Target table.
    pub table: String,
    /// Explicit column list, if given.
    pub columns: Option<Vec<String>>,
    /// One expression list per row.
    pub rows: Vec<Vec<Expr>>,
}

/// `SELECT` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// `SELECT DISTINCT`
    pub distinct: bool,
    /// Projection.
    pub items: Vec<SelectItem>,
    /// Source table, if any.
    pub from: Option<String>,
    /// `WHERE` clause.
    pub filter: Option<Expr>,
    /// `ORDER BY` terms.
    pub order_by: Vec<OrderByItem>,
    /// `LIMIT` expression.
    pub limit: Option<Expr>,
    /// `OFFSET` expression.
    pub offset: Option<Expr>,
}

/// A single projection item.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// `table.*`
    QualifiedWildcard(String),
    /// `expr [AS alias]`
    Expr {
        /// Projected expression.
        expr: Expr,
        /// Output column name override.
        alias: Option<String>,
    },
}

/// An `ORDER BY` term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    /// Sort key.
    pub expr: Expr,
    /// `DESC` was given.
    pub descending: bool,
}

/// `UPDATE` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Target table.
    pub table: String,
    /// `SET column = expr` pairs.
    pub assignments: Vec<(String, Expr)>,
    /// `WHERE` clause.
    pub filter: Option<Expr>,
}

/// `DELETE` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    /// Target table.
    pub table: String,
    /// `WHERE` clause.
    pub filter: Option<Expr>,
}

/// A literal constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `NULL`
    Null,
    /// Integer literal.
    Integer(i64),
    /// Real literal.
    Real(f64),
    /// String literal.
    String(String),
    /// `TRUE` / `FALSE`
    Boolean(bool),
}

/// A statement parameter marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Placeholder {
    /// `:name`
    Named(String),
    /// `?`, numbered from zero in order of appearance.
    Positional(usize),
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Named(name) => write!(f, ":{name}"),
            Placeholder::Positional(index) => write!(f, "?{}", index + 1),
        }
    }
}

/// A possibly qualified column reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    /// Table qualifier.
    pub table: Option<String>,
    /// Column name.
    pub name: String,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `+`
    Plus,
    /// `NOT`
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `OR`
    Or,
    /// `AND`
    And,
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `||`
    Concat,
}

/// Arguments of a function call.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArgs {
    /// `f(*)`
    Star,
    /// `f(a, b, ...)`
    List(Vec<Expr>),
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant.
    Literal(Literal),
    /// Column reference.
    Column(ColumnRef),
    /// Parameter marker.
    Placeholder(Placeholder),
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        expr: Box<Expr>,
    },
    /// Binary operation.
    Binary {
        /// Left operand.
        left: Box<Expr>,
        /// Operator.
        op: BinaryOp,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `expr IS [NOT] NULL`
    IsNull {
        /// Tested expression.
        expr: Box<Expr>,
        /// `IS NOT NULL`
        negated: bool,
    },
    /// `expr [NOT] LIKE pattern`
    Like {
        /// Tested expression.
        expr: Box<Expr>,
        /// Pattern with `%` and `_` wildcards.
        pattern: Box<Expr>,
        /// `NOT LIKE`
        negated: bool,
    },
    /// `expr [NOT] IN (a, b, ...)`
    InList {
        /// Tested expression.
        expr: Box<Expr>,
        /// Candidates.
        list: Vec<Expr>,
        /// `NOT IN`
        negated: bool,
    },
    /// `expr [NOT] BETWEEN low AND high`
    Between {
        /// Tested expression.
        expr: Box<Expr>,
        /// Lower bound (inclusive).
        low: Box<Expr>,
        /// Upper bound (inclusive).
        high: Box<Expr>,
        /// `NOT BETWEEN`
        negated: bool,
    },
    /// Function call.
    Function {
        /// Lower-cased function name.
        name: String,
        /// Arguments.
        args: FunctionArgs,
    },
}

impl Expr {
    /// Visits this expression and all sub-expressions, parents first.
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Literal(_) | Expr::Column(_) | Expr::Placeholder(_) => {}
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => expr.walk(f),
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Like { expr, pattern, .. } => {
                expr.walk(f);
                pattern.walk(f);
            }
            Expr::InList { expr, list, .. } => {
                expr.walk(f);
                for item in list {
                    item.walk(f);
                }
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.walk(f);
                low.walk(f);
                high.walk(f);
            }
            Expr::Function { args, .. } => {
                if let FunctionArgs::List(list) = args {
                    for item in list {
                        item.walk(f);
                    }
                }
            }
        }
    }

    /// Returns true if the expression contains an aggregate function call.
    #[must_use]
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if let Expr::Function { name, .. } = e {
                if is_aggregate(name) {
                    found = true;
                }
            }
        });
        found
    }
}

/// Returns true for the aggregate function names understood by the executor.
#[must_use]
pub fn is_aggregate(name: &str) -> bool {
    matches!(name, "count" | "sum" | "min" | "max" | "avg" | "total")
}

// ----------------------------------------------------------------------
// Rendering back to SQL text
// ----------------------------------------------------------------------

struct Ident<'a>(&'a str);

impl fmt::Display for Ident<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plain = self
            .0
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && self.0.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !crate::parser::is_reserved(self.0);
        if plain {
            f.write_str(self.0)
        } else {
            write!(f, "\"{}\"", self.0)
        }
    }
}

fn write_list<T>(
    f: &mut fmt::Formatter<'_>,
    items: &[T],
    mut each: impl FnMut(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        each(f, item)?;
    }
    Ok(())
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateTable(create) => create.fmt(f),
            Statement::DropTable { name, if_exists } => {
                f.write_str("DROP TABLE ")?;
                if *if_exists {
                    f.write_str("IF EXISTS ")?;
                }
                Ident(name).fmt(f)
            }
            Statement::Insert(insert) => insert.fmt(f),
            Statement::Select(select) => select.fmt(f),
            Statement::Update(update) => update.fmt(f),
            Statement::Delete(delete) => delete.fmt(f),
            Statement::Begin => f.write_str("BEGIN"),
            Statement::Commit => f.write_str("COMMIT"),
            Statement::Rollback => f.write_str("ROLLBACK"),
        }
    }
}

impl fmt::Display for ForeignKeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Ident(&self.table).fmt(f)?;
        if let Some(column) = &self.column {
            write!(f, " ({})", Ident(column))?;
        }
        Ok(())
    }
}

impl fmt::Display for CreateTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CREATE TABLE ")?;
        if self.if_not_exists {
            f.write_str("IF NOT EXISTS ")?;
        }
        write!(f, "{} (", Ident(&self.name))?;
        write_list(f, &self.columns, |f, column| {
            write!(f, "{} {}", Ident(&column.name), column.type_name)?;
            if column.primary_key {
                f.write_str(" PRIMARY KEY")?;
            }
            if column.not_null {
                f.write_str(" NOT NULL")?;
            }
            if column.unique {
                f.write_str(" UNIQUE")?;
            }
            if let Some(target) = &column.references {
                write!(f, " REFERENCES {target}")?;
            }
            Ok(())
        })?;
        for constraint in &self.constraints {
            f.write_str(", ")?;
            match constraint {
                TableConstraint::PrimaryKey(cols) => {
                    f.write_str("PRIMARY KEY (")?;
                    write_list(f, cols, |f, c| Ident(c).fmt(f))?;
                    f.write_str(")")?;
                }
                TableConstraint::Unique(cols) => {
                    f.write_str("UNIQUE (")?;
                    write_list(f, cols, |f, c| Ident(c).fmt(f))?;
                    f.write_str(")")?;
                }
                TableConstraint::ForeignKey { column, references } => {
                    write!(
                        f,
                        "FOREIGN KEY ({}) REFERENCES {references}",
                        Ident(column)
                    )?;
                }
            }
        }
        f.write_str(")")
    }
}

impl fmt::Display for Insert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "INSERT INTO {}", Ident(&self.table))?;
        if let Some(columns) = &self.columns {
            f.write_str(" (")?;
            write_list(f, columns, |f, c| Ident(c).fmt(f))?;
            f.write_str(")")?;
        }
        f.write_str(" VALUES ")?;
        write_list(f, &self.rows, |f, row| {
            f.write_str("(")?;
            write_list(f, row, |f, e| e.fmt(f))?;
            f.write_str(")")
        })
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        write_list(f, &self.items, |f, item| match item {
            SelectItem::Wildcard => f.write_str("*"),
            SelectItem::QualifiedWildcard(table) => write!(f, "{}.*", Ident(table)),
            SelectItem::Expr { expr, alias } => {
                expr.fmt(f)?;
                if let Some(alias) = alias {
                    write!(f, " AS {}", Ident(alias))?;
                }
                Ok(())
            }
        })?;
        if let Some(from) = &self.from {
            write!(f, " FROM {}", Ident(from))?;
        }
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {filter}")?;
        }
        if !self.order_by.is_empty() {
            f.write_str(" ORDER BY ")?;
            write_list(f, &self.order_by, |f, item| {
                item.expr.fmt(f)?;
                if item.descending {
                    f.write_str(" DESC")?;
                }
                Ok(())
            })?;
        }
        if let Some(limit) = &self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if let Some(offset) = &self.offset {
            write!(f, " OFFSET {offset}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UPDATE {} SET ", Ident(&self.table))?;
        write_list(f, &self.assignments, |f, (column, expr)| {
            write!(f, "{}={expr}", Ident(column))
        })?;
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {filter}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Delete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DELETE FROM {}", Ident(&self.table))?;
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {filter}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("NULL"),
            Literal::Integer(n) => write!(f, "{n}"),
            Literal::Real(r) => write!(f, "{r:?}"),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Boolean(true) => f.write_str("TRUE"),
            Literal::Boolean(false) => f.write_str("FALSE"),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(table) = &self.table {
            write!(f, "{}.", Ident(table))?;
        }
        Ident(&self.name).fmt(f)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Or => "OR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Concat => "||",
        })
    }
}

/// Operand wrapper that parenthesizes compound expressions.
struct Operand<'a>(&'a Expr);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Expr::Literal(_) | Expr::Column(_) | Expr::Placeholder(_) | Expr::Function { .. } => {
                self.0.fmt(f)
            }
            other => write!(f, "({other})"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(literal) => literal.fmt(f),
            Expr::Column(column) => column.fmt(f),
            Expr::Placeholder(Placeholder::Named(name)) => write!(f, ":{name}"),
            Expr::Placeholder(Placeholder::Positional(_)) => f.write_str("?"),
            Expr::Unary { op, expr } => match op {
                UnaryOp::Neg => write!(f, "-{}", Operand(expr)),
                UnaryOp::Plus => write!(f, "+{}", Operand(expr)),
                UnaryOp::Not => write!(f, "NOT {}", Operand(expr)),
            },
            Expr::Binary { left, op, right } => {
                write!(f, "{} {op} {}", Operand(left), Operand(right))
            }
            Expr::IsNull { expr, negated } => {
                let not = if *negated { " NOT" } else { "" };
                write!(f, "{} IS{not} NULL", Operand(expr))
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let not = if *negated { " NOT" } else { "" };
                write!(f, "{}{not} LIKE {}", Operand(expr), Operand(pattern))
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let not = if *negated { " NOT" } else { "" };
                write!(f, "{}{not} IN (", Operand(expr))?;
                write_list(f, list, |f, e| e.fmt(f))?;
                f.write_str(")")
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let not = if *negated { " NOT" } else { "" };
                write!(
                    f,
                    "{}{not} BETWEEN {} AND {}",
                    Operand(expr),
                    Operand(low),
                    Operand(high)
                )
            }
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                match args {
                    FunctionArgs::Star => f.write_str("*")?,
                    FunctionArgs::List(list) => write_list(f, list, |f, e| e.fmt(f))?,
                }
                f.write_str(")")
            }
        }
    }
}
