//! Document store abstraction and its in-process implementation

pub mod memory;
pub mod models;
pub mod traits;

pub use memory::MemoryDocumentStore;
pub use models::{Document, FieldFilter, Fields};
pub use traits::{DocumentStore, LiveQuery};
