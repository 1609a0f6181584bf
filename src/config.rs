//! Server and client configuration
//!
//! Both configs deserialize from TOML with every field optional; the
//! binaries layer command-line flags on top.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::DEFAULT_MAX_FRAME_LEN;

/// Port the server listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 2000;

/// Shortest username the client accepts
pub const MIN_USERNAME_LEN: usize = 3;

/// Longest username the client accepts
pub const MAX_USERNAME_LEN: usize = 10;

/// Errors that can occur when loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for this struct
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Username rejected by the client
    #[error("Invalid username: {0}")]
    InvalidUsername(String),
}

/// Server configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Hand every session the same symmetric key (`true`) or generate one
    /// per connection (`false`)
    #[serde(default = "default_true")]
    pub shared_key_across_sessions: bool,

    /// Largest frame body accepted from a client
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_client_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_server_host(),
            port: default_port(),
            shared_key_across_sessions: true,
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl ServerConfig {
    /// Read a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// `host:port` to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Client configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host
    #[serde(default = "default_client_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Name advertised during the handshake
    #[serde(default)]
    pub username: String,

    /// Largest frame body accepted from the server
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: default_client_host(),
            port: default_port(),
            username: String::new(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl ClientConfig {
    /// Config for `username` against the default server
    pub fn new(username: impl Into<String>) -> Self {
        ClientConfig {
            username: username.into(),
            ..Default::default()
        }
    }

    /// `host:port` to connect to
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Trim and check a username typed by the user
    pub fn validate_username(name: &str) -> Result<String, ConfigError> {
        let name = name.trim();
        let len = name.chars().count();

        if len == 0 {
            return Err(ConfigError::InvalidUsername(
                "username cannot be empty".to_string(),
            ));
        }
        if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
            return Err(ConfigError::InvalidUsername(format!(
                "username must be {} to {} characters",
                MIN_USERNAME_LEN, MAX_USERNAME_LEN
            )));
        }

        Ok(name.to_string())
    }
}
