//! File formats for tonegraph.
//!
//! Reads and writes node scripts (`name;type;args...` per line) and TOML
//! project files.

mod node_script;
mod project;

pub use node_script::{
    load_node_script, parse_node_script, parse_node_script_strict, write_node_script, NodeScript,
    ScriptIssue,
};
pub use project::{ProjectFile, SynthEntry};

/// Error type for format parsing.
#[derive(Debug)]
pub enum FormatError {
    /// A malformed line, 1-based
    Parse { line: usize, message: String },
    /// I/O error
    Io(std::io::Error),
    /// TOML syntax or schema error
    Toml(String),
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::Parse { line, message } => write!(f, "line {}: {}", line, message),
            FormatError::Io(e) => write!(f, "I/O error: {}", e),
            FormatError::Toml(msg) => write!(f, "project file: {}", msg),
        }
    }
}

impl std::error::Error for FormatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FormatError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FormatError {
    fn from(e: std::io::Error) -> Self {
        FormatError::Io(e)
    }
}

impl From<toml::de::Error> for FormatError {
    fn from(e: toml::de::Error) -> Self {
        FormatError::Toml(e.to_string())
    }
}

impl From<toml::ser::Error> for FormatError {
    fn from(e: toml::ser::Error) -> Self {
        FormatError::Toml(e.to_string())
    }
}
