//! Run status: data model, merge engine, store and sidebar labels

pub mod label;
pub mod merge;
pub mod store;
pub mod types;

pub use merge::merge;
pub use store::StatusStore;
pub use types::*;
