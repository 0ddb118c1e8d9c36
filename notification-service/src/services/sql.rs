//! Table schemas and statement building for [`PgStore`](super::PgStore).
//!
//! Every identifier that ends up in SQL text comes from a `'static`
//! [`TableSchema`]; caller-supplied column names are only ever checked
//! against it. Values are always bound as `$n` parameters.

use chrono::NaiveDateTime;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;
use std::collections::BTreeMap;

use super::database::StoreError;

/// Column name to value mapping used for inserted data and for
/// equality-AND conditions.
pub type ColumnValues = BTreeMap<String, SqlValue>;

/// A column of a [`TableSchema`]: its name and the SQL type/constraint text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub definition: &'static str,
}

impl ColumnDef {
    pub const fn new(name: &'static str, definition: &'static str) -> Self {
        Self { name, definition }
    }
}

/// Compile-time description of a table the store may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    /// Extra table-level clauses, e.g. `UNIQUE (a, b)`.
    pub constraints: &'static [&'static str],
}

impl TableSchema {
    /// Resolve a caller-supplied column name to the schema's own identifier.
    pub fn column(&self, name: &str) -> Result<&'static str, StoreError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.name)
            .ok_or_else(|| {
                StoreError::Validation(format!(
                    "Unknown column '{}' for table '{}'",
                    name, self.name
                ))
            })
    }

    fn checked_name(&self) -> Result<&'static str, StoreError> {
        validate_identifier(self.name)?;
        Ok(self.name)
    }
}

/// Accept only `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(ident: &str) -> Result<(), StoreError> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StoreError::Validation(format!(
            "Invalid SQL identifier '{}'",
            ident
        )))
    }
}

/// A value bound to a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    pub(crate) fn bind_to<'q>(
        self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            SqlValue::Null => query.bind(Option::<String>::None),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Int(v) => query.bind(v),
            SqlValue::BigInt(v) => query.bind(v),
            SqlValue::Double(v) => query.bind(v),
            SqlValue::Text(v) => query.bind(v),
            SqlValue::Timestamp(v) => query.bind(v),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::BigInt(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Double(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// SQL text plus its parameters in `$n` order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    fn new(sql: String, params: Vec<SqlValue>) -> Self {
        Self { sql, params }
    }
}

/// Placeholder for `value`, pushing it onto `params`.
///
/// `NULL` is written literally so it is accepted by columns of any type.
fn placeholder(value: &SqlValue, params: &mut Vec<SqlValue>) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        value => {
            params.push(value.clone());
            format!("${}", params.len())
        }
    }
}

/// `a = $n AND b IS NULL ...`, continuing the numbering in `params`.
fn equality_clause(
    schema: &TableSchema,
    conditions: &ColumnValues,
    params: &mut Vec<SqlValue>,
) -> Result<String, StoreError> {
    let mut parts = Vec::with_capacity(conditions.len());
    for (name, value) in conditions {
        let column = schema.column(name)?;
        match value {
            SqlValue::Null => parts.push(format!("{} IS NULL", column)),
            value => parts.push(format!("{} = {}", column, placeholder(value, params))),
        }
    }
    Ok(parts.join(" AND "))
}

pub fn create_table(schema: &TableSchema) -> Result<Statement, StoreError> {
    let table = schema.checked_name()?;
    if schema.columns.is_empty() {
        return Err(StoreError::Validation(format!(
            "Table '{}' defines no columns",
            table
        )));
    }

    let mut definitions = Vec::with_capacity(schema.columns.len() + schema.constraints.len());
    for column in schema.columns {
        validate_identifier(column.name)?;
        definitions.push(format!("{} {}", column.name, column.definition));
    }
    definitions.extend(schema.constraints.iter().map(|c| c.to_string()));

    Ok(Statement::new(
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table,
            definitions.join(", ")
        ),
        Vec::new(),
    ))
}

pub fn insert(schema: &TableSchema, data: &ColumnValues) -> Result<Statement, StoreError> {
    let table = schema.checked_name()?;
    if data.is_empty() {
        return Err(StoreError::Validation(format!(
            "Insert into '{}' requires at least one column",
            table
        )));
    }

    let mut columns = Vec::with_capacity(data.len());
    let mut placeholders = Vec::with_capacity(data.len());
    let mut params = Vec::with_capacity(data.len());
    for (name, value) in data {
        columns.push(schema.column(name)?);
        placeholders.push(placeholder(value, &mut params));
    }

    Ok(Statement::new(
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            table,
            columns.join(", "),
            placeholders.join(", ")
        ),
        params,
    ))
}

/// An empty `fields` slice projects every column.
pub fn select(
    schema: &TableSchema,
    conditions: Option<&ColumnValues>,
    fields: &[&str],
) -> Result<Statement, StoreError> {
    let table = schema.checked_name()?;

    let projection = if fields.is_empty() {
        "*".to_string()
    } else {
        fields
            .iter()
            .map(|f| schema.column(f))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", projection, table);
    let mut params = Vec::new();
    if let Some(conditions) = conditions.filter(|c| !c.is_empty()) {
        let clause = equality_clause(schema, conditions, &mut params)?;
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
    }

    Ok(Statement::new(sql, params))
}

pub fn update(
    schema: &TableSchema,
    data: &ColumnValues,
    conditions: &ColumnValues,
) -> Result<Statement, StoreError> {
    let table = schema.checked_name()?;
    if data.is_empty() {
        return Err(StoreError::Validation(format!(
            "Update of '{}' requires at least one column",
            table
        )));
    }
    if conditions.is_empty() {
        return Err(StoreError::Validation(format!(
            "Update of '{}' requires at least one condition",
            table
        )));
    }

    let mut params = Vec::with_capacity(data.len() + conditions.len());
    let mut assignments = Vec::with_capacity(data.len());
    for (name, value) in data {
        let column = schema.column(name)?;
        assignments.push(format!("{} = {}", column, placeholder(value, &mut params)));
    }
    let clause = equality_clause(schema, conditions, &mut params)?;

    Ok(Statement::new(
        format!(
            "UPDATE {} SET {} WHERE {} RETURNING *",
            table,
            assignments.join(", "),
            clause
        ),
        params,
    ))
}

pub fn delete(schema: &TableSchema, conditions: &ColumnValues) -> Result<Statement, StoreError> {
    let table = schema.checked_name()?;
    if conditions.is_empty() {
        return Err(StoreError::Validation(format!(
            "Delete from '{}' requires at least one condition",
            table
        )));
    }

    let mut params = Vec::with_capacity(conditions.len());
    let clause = equality_clause(schema, conditions, &mut params)?;

    Ok(Statement::new(
        format!("DELETE FROM {} WHERE {}", table, clause),
        params,
    ))
}
