pub mod catalog_cache;
pub mod db;
pub mod memory;
pub mod store;

pub use catalog_cache::CatalogCache;
pub use db::Db;
pub use memory::MemoryStore;
pub use store::{PgStore, Record, RecordKey, Store, StoreError};
