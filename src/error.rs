use std::path::PathBuf;

use thiserror::Error;

/// Failures while loading, parsing or rendering a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template '{name}' not found")]
    NotFound { name: String },

    #[error("failed to read template '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("syntax error in template '{name}': {message}")]
    Syntax { name: String, message: String },

    #[error("template '{name}' extends too many levels deep")]
    InheritanceTooDeep { name: String },
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("invalid configuration value for {key}: {value:?}")]
    Config { key: String, value: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("template watcher failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("failed to initialise logging: {0}")]
    Logger(#[from] flexi_logger::FlexiLoggerError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
