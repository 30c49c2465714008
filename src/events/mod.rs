//! Store event system backing live queries
//!
//! This module provides:
//! - `StoreEvent`: a document change or a store fault
//! - `EventBus`: broadcast channel fanning events out to every live query

mod bus;
mod types;

pub use bus::{EventBus, DEFAULT_CAPACITY};
pub use types::{ChangeAction, ChangeEvent, EventEmitter, FaultKind, StoreEvent, StoreFault};
