//! Configuration and policy
//!
//! Policy definition, service configuration loading and startup validation.

pub mod descriptor;
pub mod loader;
pub mod presets;
pub mod types;
pub mod validator;
