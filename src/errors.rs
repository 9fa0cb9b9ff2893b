use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid UTF-8 in file {file}")]
    InvalidUtf8 { file: PathBuf },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {file}: {source}")]
    Read { file: PathBuf, source: std::io::Error },
    #[error("Invalid config {file}: {source}")]
    Toml { file: PathBuf, source: toml::de::Error },
}

#[derive(Debug, Error)]
pub enum DiagramError {
    #[error("No module named '{module}' under {root}")]
    ModuleNotFound { module: String, root: PathBuf },

    #[error("Parse error in module {module}: {source}")]
    Parse { module: String, source: ParseError },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Lookup entry {field} points to '{target}', which is not a discovered document class")]
    UnresolvedLookupTarget { field: String, target: String },

    #[error("Visualization error: {0}")]
    Visualization(String),
}
