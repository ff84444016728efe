//! Performance reviews and goal tracking service.
//!
//! Exposes review and goal records through a filtered, paginated JSON API,
//! guarded by capability checks on a bearer-token identity.

pub mod core;
pub mod main_module;
pub mod performance;
pub mod security;

pub use crate::core::config::AppConfig;
pub use crate::core::shared::state::AppState;
pub use main_module::{build_router, run_server};
