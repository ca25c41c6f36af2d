//! Statement model and dialect compiler
//!
//! Statements are either raw SQL text, executed verbatim, or built
//! `INSERT`/`SELECT`/`UPDATE`/`DELETE` statements that the dialect compiler
//! renders into SQL plus ordered bind parameters.

use serde::Serialize;
use std::fmt;

/// SQL dialect used when rendering built statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// `?` placeholders
    #[default]
    Sqlite,
    /// `$1`, `$2`, ... placeholders
    Postgres,
}

impl Dialect {
    fn placeholder(&self, index: usize) -> String {
        match self {
            Self::Sqlite => "?".to_string(),
            Self::Postgres => format!("${}", index),
        }
    }
}

/// Bind parameter value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Rendering failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("statement cannot be rendered by the dialect compiler")]
    Unsupported,
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("{0} statement on {1} has no values")]
    EmptyValues(&'static str, String),
}

/// Rendered SQL text with its bind parameters in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Equality filter list shared by select/update/delete
type Filters = Vec<(String, Value)>;

#[derive(Debug, Clone)]
pub struct Insert {
    table: String,
    values: Vec<(String, Value)>,
}

impl Insert {
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct Select {
    table: String,
    columns: Vec<String>,
    filters: Filters,
    order_by: Option<(String, bool)>,
    limit: Option<i64>,
}

impl Select {
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some((column.into(), descending));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Update {
    table: String,
    set: Vec<(String, Value)>,
    filters: Filters,
}

impl Update {
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((column.into(), value.into()));
        self
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct Delete {
    table: String,
    filters: Filters,
}

impl Delete {
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }
}

/// A single executable database operation
#[derive(Debug, Clone)]
pub enum Statement {
    /// Raw SQL, executed as-is
    Text(String),
    Insert(Insert),
    Select(Select),
    Update(Update),
    Delete(Delete),
}

impl Statement {
    pub fn text(sql: impl Into<String>) -> Self {
        Self::Text(sql.into())
    }

    pub fn insert(table: impl Into<String>) -> Insert {
        Insert {
            table: table.into(),
            values: Vec::new(),
        }
    }

    pub fn select(table: impl Into<String>) -> Select {
        Select {
            table: table.into(),
            columns: Vec::new(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn update(table: impl Into<String>) -> Update {
        Update {
            table: table.into(),
            set: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn delete(table: impl Into<String>) -> Delete {
        Delete {
            table: table.into(),
            filters: Vec::new(),
        }
    }

    /// Render the statement for `dialect`
    ///
    /// Raw text is never rendered; callers fall back to its `Display` form.
    pub fn compile(&self, dialect: Dialect) -> Result<CompiledStatement, CompileError> {
        let mut params = Vec::new();
        let sql = match self {
            Self::Text(_) => return Err(CompileError::Unsupported),
            Self::Insert(insert) => {
                if insert.values.is_empty() {
                    return Err(CompileError::EmptyValues("INSERT", insert.table.clone()));
                }
                let mut columns = Vec::with_capacity(insert.values.len());
                let mut placeholders = Vec::with_capacity(insert.values.len());
                for (column, value) in &insert.values {
                    columns.push(quote(column)?);
                    params.push(value.clone());
                    placeholders.push(dialect.placeholder(params.len()));
                }
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote(&insert.table)?,
                    columns.join(", "),
                    placeholders.join(", ")
                )
            }
            Self::Select(select) => {
                let columns = if select.columns.is_empty() {
                    "*".to_string()
                } else {
                    select
                        .columns
                        .iter()
                        .map(|c| quote(c))
                        .collect::<Result<Vec<_>, _>>()?
                        .join(", ")
                };
                let mut sql = format!("SELECT {} FROM {}", columns, quote(&select.table)?);
                sql.push_str(&where_clause(&select.filters, dialect, &mut params)?);
                if let Some((column, descending)) = &select.order_by {
                    sql.push_str(&format!(
                        " ORDER BY {} {}",
                        quote(column)?,
                        if *descending { "DESC" } else { "ASC" }
                    ));
                }
                if let Some(limit) = select.limit {
                    params.push(Value::Integer(limit));
                    sql.push_str(&format!(" LIMIT {}", dialect.placeholder(params.len())));
                }
                sql
            }
            Self::Update(update) => {
                if update.set.is_empty() {
                    return Err(CompileError::EmptyValues("UPDATE", update.table.clone()));
                }
                let mut assignments = Vec::with_capacity(update.set.len());
                for (column, value) in &update.set {
                    params.push(value.clone());
                    assignments.push(format!(
                        "{} = {}",
                        quote(column)?,
                        dialect.placeholder(params.len())
                    ));
                }
                let mut sql = format!(
                    "UPDATE {} SET {}",
                    quote(&update.table)?,
                    assignments.join(", ")
                );
                sql.push_str(&where_clause(&update.filters, dialect, &mut params)?);
                sql
            }
            Self::Delete(delete) => {
                let mut sql = format!("DELETE FROM {}", quote(&delete.table)?);
                sql.push_str(&where_clause(&delete.filters, dialect, &mut params)?);
                sql
            }
        };

        Ok(CompiledStatement { sql, params })
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(sql) => f.write_str(sql),
            Self::Insert(insert) => write!(f, "<insert into {}>", insert.table),
            Self::Select(select) => write!(f, "<select from {}>", select.table),
            Self::Update(update) => write!(f, "<update {}>", update.table),
            Self::Delete(delete) => write!(f, "<delete from {}>", delete.table),
        }
    }
}

impl From<Insert> for Statement {
    fn from(v: Insert) -> Self {
        Self::Insert(v)
    }
}

impl From<Select> for Statement {
    fn from(v: Select) -> Self {
        Self::Select(v)
    }
}

impl From<Update> for Statement {
    fn from(v: Update) -> Self {
        Self::Update(v)
    }
}

impl From<Delete> for Statement {
    fn from(v: Delete) -> Self {
        Self::Delete(v)
    }
}

fn where_clause(
    filters: &[(String, Value)],
    dialect: Dialect,
    params: &mut Vec<Value>,
) -> Result<String, CompileError> {
    if filters.is_empty() {
        return Ok(String::new());
    }

    let mut conditions = Vec::with_capacity(filters.len());
    for (column, value) in filters {
        if *value == Value::Null {
            conditions.push(format!("{} IS NULL", quote(column)?));
        } else {
            params.push(value.clone());
            conditions.push(format!(
                "{} = {}",
                quote(column)?,
                dialect.placeholder(params.len())
            ));
        }
    }

    Ok(format!(" WHERE {}", conditions.join(" AND ")))
}

/// Quote an identifier, rejecting anything outside `[A-Za-z0-9_]`
fn quote(ident: &str) -> Result<String, CompileError> {
    let valid = !ident.is_empty()
        && !ident.starts_with(|c: char| c.is_ascii_digit())
        && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(CompileError::InvalidIdentifier(ident.to_string()));
    }
    Ok(format!("\"{}\"", ident))
}
