//! Process-level wiring: router assembly, health endpoint and shutdown.

mod health;
mod server;
mod shutdown;

pub use health::*;
pub use server::*;
pub use shutdown::*;
