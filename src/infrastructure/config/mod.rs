mod settings;

pub use settings::{DatabaseConfig, LogConfig, LogFormat, MissingSettings, OtelConfig, ServerConfig, Settings};
