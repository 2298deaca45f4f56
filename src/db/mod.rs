//! The data layer: typed entities, per-database key spaces, and the
//! multi-database server behind the engine seam.

pub mod entity;
pub mod keyspace;
pub mod server;

// Re-export commonly used types
pub use entity::DataEntity;
pub use keyspace::KeySpace;
pub use server::{Server, StorageEngine, DEFAULT_DATABASES};
