//! Channel configuration

use std::collections::HashMap;
use std::path::PathBuf;

/// Configuration for spawning a worker channel
///
/// The command vector is passed verbatim to the platform's process-creation
/// primitive; no shell interpretation happens and argument boundaries are
/// preserved exactly.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Command line: executable followed by its arguments
    pub command: Vec<String>,
    /// Working directory (None = current dir)
    pub working_dir: Option<PathBuf>,
    /// Environment variables (added to parent env)
    pub env: HashMap<String, String>,
}

impl ChannelConfig {
    /// Create a configuration for `program` with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            command: vec![program.into()],
            working_dir: None,
            env: HashMap::new(),
        }
    }

    /// Create a configuration from a full command vector
    ///
    /// An empty vector is accepted here and rejected at spawn time.
    pub fn from_command<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: HashMap::new(),
        }
    }

    /// Append command arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}
