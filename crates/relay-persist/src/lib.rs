pub mod models;
pub mod store;
pub mod memory;
pub mod dbs;
pub mod error;

pub use models::{ThreadSnapshot, ListQuery, Ttl};
pub use store::ThreadStore;
pub use memory::MemoryStore;
pub use error::{PersistError, Result};

#[cfg(feature = "sqlite")]
pub use dbs::sqlite::SqliteStore;
#[cfg(feature = "mongodb")]
pub use dbs::mongo::MongoThreadStore;
