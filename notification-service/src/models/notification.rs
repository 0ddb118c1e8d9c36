use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::services::{ColumnDef, Row, StoreError, TableSchema};

/// Storage layout of the `notifications` table.
pub const NOTIFICATIONS: TableSchema = TableSchema {
    name: "notifications",
    columns: &[
        ColumnDef::new("id", "SERIAL PRIMARY KEY"),
        ColumnDef::new("uid", "VARCHAR(100) NOT NULL"),
        ColumnDef::new("body", "TEXT NOT NULL"),
        ColumnDef::new("created_at", "TIMESTAMP DEFAULT CURRENT_TIMESTAMP"),
    ],
    constraints: &[],
};

/// Columns returned to clients.
pub const NOTIFICATION_FIELDS: &[&str] = &["id", "uid", "body", "created_at"];

/// A message addressed to a user, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i32,
    pub uid: String,
    pub body: String,
    /// `None` only if the column was explicitly cleared; inserts default it.
    pub created_at: Option<NaiveDateTime>,
}

impl TryFrom<Row> for Notification {
    type Error = StoreError;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        serde_json::from_value(serde_json::Value::Object(row)).map_err(|e| {
            StoreError::Database(format!("Unexpected notification row shape: {}", e))
        })
    }
}
