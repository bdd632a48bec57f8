pub mod aggregate;
pub mod postgres;
mod row;
pub mod sqlite;
pub mod trait_def;

pub use aggregate::{ActivityGroup, CountDimension, PlaceCount, WidgetTotals};
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};
