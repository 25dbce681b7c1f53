use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A single problem found while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Missing { name: &'static str },
    Malformed { name: &'static str, reason: String },
}

impl Violation {
    /// Name of the environment variable this violation is about.
    pub fn name(&self) -> &'static str {
        match self {
            Violation::Missing { name } | Violation::Malformed { name, .. } => name,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Missing { name } => write!(f, "{} missing", name),
            Violation::Malformed { name, reason } => write!(f, "{} invalid: {}", name, reason),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load environment file {}", .path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    #[error("{}", render_violations(.0))]
    Invalid(Vec<Violation>),
}

impl ConfigError {
    /// Violations in the order they were found. Empty for env file failures.
    pub fn violations(&self) -> &[Violation] {
        match self {
            ConfigError::Invalid(violations) => violations,
            ConfigError::EnvFile { .. } => &[],
        }
    }
}

fn render_violations(violations: &[Violation]) -> String {
    let mut message = String::new();
    for violation in violations {
        message.push_str(&violation.to_string());
        message.push('\n');
    }
    message.push_str("| need to be defined in .env or environment variable.");
    message
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token request to {endpoint} failed")]
    TokenRequest {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("cannot build request URL for secret {name}: {reason}")]
    InvalidUrl { name: String, reason: String },
    #[error("request for secret {name} failed")]
    Transport {
        name: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("secret {name} returned {status}: {message}")]
    Status {
        name: String,
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("malformed response for secret {name}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("authentication failed")]
    Auth(#[from] AuthError),
    #[error("failed to write output")]
    Output(#[from] std::io::Error),
}
