pub mod config;
pub mod messages;
pub mod signaling;

pub use config::*;
pub use messages::*;
pub use signaling::*;
