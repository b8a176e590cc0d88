//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → apply.rs (create → set → enable through the control surface)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Applying goes through the same control calls a live operator would use

pub mod apply;
pub mod loader;
pub mod schema;
pub mod validation;

pub use apply::apply_config;
pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{ObservabilityConfig, PoolConfig, ProxyConfig, RuntimeConfig, ServiceConfig};
pub use validation::{validate_config, ValidationError};
