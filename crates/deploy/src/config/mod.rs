//! Configuration schema, sources and resolution.
//!
//! Every key is resolved and type-checked up front, so a deployment never reaches a
//! provider with a missing or malformed value.

mod resolver;
pub mod schema;
mod source;

pub use resolver::{ConfigResolver, ResolvedConfig, resolve};
pub use schema::{
    ConfigKey, ConfigSchema, ConfigValue, FeatureGroup, SourcePrecedence, ValueType, features, keys,
};
pub use source::{
    CONTEXT_FILENAME, ConfigSource, ContextSource, EnvSource, NamedEnvironment, RawValue, SourceLayer,
};
