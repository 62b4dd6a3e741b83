//! History store implementations for botloom.

mod log;
pub mod in_memory;
pub mod file;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryHistory;
pub use file::FileHistory;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteHistory;
