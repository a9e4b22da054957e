//! Shared wire and data types for the Clouseau terminal-session client.

mod frame;
mod history;
mod session;

pub use frame::*;
pub use history::*;
pub use session::*;
