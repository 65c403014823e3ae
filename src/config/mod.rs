pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{load_config, load_resolved_config, resolve_config};
pub use models::*;
pub use validation::{
    ApiDefinitionValidator, GatewayConfigValidator, ValidationError, ValidationResult,
};
