pub mod memory;
pub mod postgres;
pub mod resource;
pub mod store;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use resource::{Listing, ResourceError, ResourceHandler, WriteTrigger};
pub use store::{CollectionSpec, DatabaseError, Document, DocumentStore};
