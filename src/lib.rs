//! SQLite statement execution for the Runar ecosystem.
//!
//! # Intention
//!
//! - Run pre-built SQL text against a SQLite connection: prepare it into a
//!   handle, bind parameters, step through rows and decode them into typed
//!   objects.
//! - Keep handle lifetimes explicit: handles are checked out of a per-database
//!   pool and released or finalized on every exit path.
//!
//! # Architectural Boundaries
//!
//! - Only statement execution belongs here.
//! - No query building, schema management, migrations or transactions.
//!
//! # Example
//!
//! ```no_run
//! use rust_sqlite_exec::{ColumnType, Database, Property, Result, Row, TableDecodable};
//!
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl TableDecodable for User {
//!     fn properties() -> Vec<Property> {
//!         vec![
//!             Property::of::<User>("id", ColumnType::Integer),
//!             Property::of::<User>("name", ColumnType::Text),
//!         ]
//!     }
//!
//!     fn decode(row: &Row<'_>) -> Result<Self> {
//!         Ok(User { id: row.decode("id")?, name: row.decode("name")? })
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let db = Database::open_path("users.db")?;
//! let mut select = db.prepare_select_of::<User>(
//!     "SELECT id, name FROM users WHERE id > ?",
//!     vec![5.into()],
//! );
//! for user in select.all_objects_of::<User>()? {
//!     println!("{} {}", user.id, user.name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod decoder;
pub mod error;
pub mod handle;
pub mod recyclable;
pub mod select;
pub mod statement;
pub mod update;
pub mod value;

pub use database::{Database, DatabaseConfig, RecyclableHandle, Tag, MEMORY_PATH};
pub use decoder::{AnyObject, ColumnType, Owner, Property, Row, TableDecodable, TableDecoder};
pub use error::{Error, Result};
pub use handle::HandleStatement;
pub use recyclable::Recyclable;
pub use select::SelectSql;
pub use statement::{Statement, StatementKind};
pub use update::UpdateSql;
pub use value::Value;
