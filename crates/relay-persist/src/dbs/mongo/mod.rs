pub mod models;
pub mod store;

pub use models::MongoThread;
pub use store::MongoThreadStore;
