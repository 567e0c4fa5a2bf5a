/// Errors raised while locating, parsing, or validating a board's
/// configuration record.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] figment::Error),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error("invalid config schema: {0}")]
    InvalidSchema(String),

    #[error("unknown board '{name}'. available: {available:?}")]
    UnknownBoard { name: String, available: Vec<String> },
}
