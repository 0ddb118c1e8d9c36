pub mod database;
pub mod metrics;
pub mod sql;

pub use self::database::{PgStore, Row, StoreError};
pub use self::metrics::{get_metrics, init_metrics, record_notification_created};
pub use self::sql::{ColumnDef, ColumnValues, SqlValue, TableSchema};
