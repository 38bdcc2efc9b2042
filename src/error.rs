//! Unified error types for nmbridge

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for nmbridge operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Host files (identity, netplan)
    #[error("Failed to read host identity file '{path}': {source}")]
    IdentityRead { path: PathBuf, source: io::Error },

    #[error("Failed to read netplan file '{path}': {source}")]
    NetplanRead { path: PathBuf, source: io::Error },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No ethernet interfaces defined in '{0}'")]
    NoInterfaces(PathBuf),

    // Inventory errors (global, abort before any mutation)
    #[error("Connection inventory unavailable: {0}")]
    InventoryUnavailable(String),

    // Per-profile errors
    #[error("Cannot resolve interface bound to connection '{0}'")]
    InterfaceResolutionFailed(String),

    #[error("Interface '{interface}' of connection '{profile}' is excluded from bridging")]
    MemberExcluded { profile: String, interface: String },

    #[error("No free bridge name left up to '{last}'")]
    BridgeNamesExhausted { last: String },

    #[error("Failed to create bridge '{bridge}': {message}")]
    BridgeCreationFailed { bridge: String, message: String },

    #[error("Failed to attach '{interface}' to bridge '{bridge}': {message}")]
    AttachFailed {
        bridge: String,
        interface: String,
        message: String,
    },

    #[error("Connection '{profile}' failed at transition '{transition}': {message}")]
    TransitionFailed {
        profile: String,
        transition: String,
        message: String,
    },

    // Janitor installation
    #[error("Failed to install janitor job: {0}")]
    JobInstallFailed(String),

    // System errors
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Operation requires root privileges: {0}")]
    NotRoot(String),
}

/// Result type alias for nmbridge operations
pub type Result<T> = std::result::Result<T, Error>;
