#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "mongodb")]
pub mod mongo;
