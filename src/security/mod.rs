pub mod auth;
pub mod capability;

pub use auth::{extract_bearer_token, issue_token, verify_token, Actor, Claims};
pub use capability::{CapabilityChecker, RoleCapabilities, PERFORMANCE_MANAGE, PERFORMANCE_VIEW};
