pub mod bus;
pub mod error;
pub mod report;
pub mod runner;
pub mod status;
pub mod transport;
pub mod utils;

// Re-export common items
pub use bus::{Envelope, MessageBus, Scope, Subscription};
pub use error::{Result, VistestError};
pub use report::generate_report;
pub use runner::{replay_file, Controller};
pub use status::{merge, RunStatus, StatusStore, StatusUpdate};
