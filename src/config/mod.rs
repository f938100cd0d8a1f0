//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → schema.rs apply_defaults (tunables, /32 host routes, SELF)
//!     → validation.rs (semantic checks against the probe registry)
//!     → AnycastConfig (validated, immutable)
//!     → daemon builds healthchecks, filters and route specs from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AnycastConfig, FindKind, HealthCheckConfig, LogFormat, ManageRouteConfig, NodeConfig,
    ObservabilityConfig, RouteTableConfig, RouteTableFind, SELF_INSTANCE,
};
pub use validation::{validate_config, ValidationError};
