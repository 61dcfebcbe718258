//! KCI State: durable, mergeable pipeline state
//!
//! Every pipeline stage may run in its own process. This crate is what lets
//! those processes cooperate: it loads what earlier invocations learned,
//! merges it with command-line input and static configuration, and writes new
//! facts back after each stage.
//!
//! ## Layer 0 - Data/Persistence
//!
//! ## Key Components
//!
//! - `State`: the key/value record of pipeline facts
//! - `StateUpdate`: an ordered batch of facts produced by a stage
//! - `RcFile`: read-only static configuration (INI)
//! - `StateStore`: load/merge/persist/clear contract over the state record
//! - `indexed`: `prefix_NN` key families and their reconstruction

mod error;
pub mod indexed;
mod rc;
mod store;
mod value;

pub use error::StateError;
pub use indexed::{indexed_key, CollectionKind, IndexedFamily, FAMILIES};
pub use rc::RcFile;
pub use store::{StateStore, StoreOptions, STATE_SECTION};
pub use value::{State, StateUpdate};

/// Result type for kci-state operations
pub type Result<T> = std::result::Result<T, StateError>;
