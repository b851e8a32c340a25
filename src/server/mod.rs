//! Server Controller subsystem
//!
//! Owns the lifecycle of the target server process: launch with a bound data
//! directory and port, readiness polling, hard kill, and orderly stop. The
//! hard kill is the single point where the engine's durability guarantees are
//! exercised; nothing here masks or retries a failed kill.

mod controller;
mod handle;

pub use controller::{free_port, ServerCommand, ServerController};
pub use handle::{Lifecycle, ServerHandle};
