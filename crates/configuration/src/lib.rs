// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use error::ConfigError;
pub use settings::{ApiConfig, ApiKeys, Config, ExecutionSettings};

/// Loads the application configuration from the `config.toml` file.
///
/// This function is the primary entry point for this crate. It reads the
/// configuration file, deserializes it into our strongly-typed `Config`
/// struct, and returns it.
pub fn load_config() -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        // Tells the builder to look for a file named `config.toml`
        .add_source(config::File::with_name("config.toml"))
        // Environment variables override file values, e.g. MERIDIAN_API__TESTNET__KEY.
        .add_source(config::Environment::with_prefix("MERIDIAN").separator("__"))
        .build()?;

    let config = builder.try_deserialize::<Config>()?;

    Ok(config)
}
