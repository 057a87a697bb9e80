use reconflow_cloud::CloudError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Manifest not found. Looked in:\n\
        - current directory: reconflow.local.yaml, reconflow.yaml, .reconflow.yaml\n\
        - ./.reconflow/ directory\n\
        - ~/.config/reconflow/reconflow.yaml\n\
        Set RECONFLOW_MANIFEST or pass --manifest to point at one directly"
    )]
    ManifestNotFound,

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Provider '{0}' is declared more than once")]
    DuplicateProvider(String),

    #[error("{identity} refers to unknown provider '{provider}'")]
    UnknownProvider { identity: String, provider: String },

    #[error(transparent)]
    Invalid(#[from] CloudError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
