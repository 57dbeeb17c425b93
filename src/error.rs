use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeployError>;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("'{description}' failed{}:\n{output}", exit_suffix(.code))]
    CommandFailed {
        description: String,
        code: Option<i32>,
        output: String,
    },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid project layout:\n{}", .0.join("\n"))]
    InvalidLayout(Vec<String>),
    #[error("{0}")]
    Validation(String),
    #[error("{service} stopped right after launch. Check {}", .log.display())]
    ServiceFailed { service: String, log: PathBuf },
    #[error("Aborted: {0}")]
    Aborted(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ini(#[from] ini::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Prompt(#[from] dialoguer::Error),
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {}", code),
        None => String::new(),
    }
}

impl DeployError {
    /// Combined text of the underlying command failure, if any.
    pub fn command_output(&self) -> Option<&str> {
        match self {
            DeployError::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}
