//! Configuration types for the analysis engine

use serde::Deserialize;
use std::collections::HashMap;

/// Analysis engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyzerConfig {
    /// How to launch the engine
    #[serde(default)]
    pub command: EngineCommand,

    /// Model name passed to the engine
    #[serde(default = "default_model")]
    pub model: String,

    /// Upper bound on reasoning turns per analysis
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

fn default_model() -> String {
    "haiku".to_string()
}

fn default_max_turns() -> u32 {
    3
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            command: EngineCommand::default(),
            model: default_model(),
            max_turns: default_max_turns(),
        }
    }
}

/// Engine command in simple or advanced form
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum EngineCommand {
    /// Simple form: a command string split on whitespace
    Simple(String),

    /// Advanced form with explicit arguments and environment
    Advanced {
        /// Program to execute, or a full command line when `args` is empty
        command: String,

        /// Optional separate arguments list
        #[serde(default)]
        args: Vec<String>,

        /// Extra environment variables for the engine process
        #[serde(default)]
        env: HashMap<String, String>,
    },
}

impl Default for EngineCommand {
    fn default() -> Self {
        EngineCommand::Simple("claude".to_string())
    }
}

/// Resolved program, leading arguments and environment for the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInvocation {
    /// Program to execute
    pub program: String,
    /// Arguments placed before the generated ones
    pub args: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
}

fn split_command(command: &str) -> (String, Vec<String>) {
    let parts: Vec<&str> = command.split_whitespace().collect();
    let program = parts
        .first()
        .map_or_else(|| command.to_string(), |p| (*p).to_string());
    let args = parts.iter().skip(1).map(|a| (*a).to_string()).collect();
    (program, args)
}

impl EngineCommand {
    /// Resolve the command into a program and its leading arguments
    #[must_use]
    pub fn invocation(&self) -> EngineInvocation {
        match self {
            EngineCommand::Simple(s) => {
                let (program, args) = split_command(s);
                EngineInvocation {
                    program,
                    args,
                    env: HashMap::new(),
                }
            }
            EngineCommand::Advanced { command, args, env } => {
                if args.is_empty() {
                    let (program, split_args) = split_command(command);
                    EngineInvocation {
                        program,
                        args: split_args,
                        env: env.clone(),
                    }
                } else {
                    EngineInvocation {
                        program: command.clone(),
                        args: args.clone(),
                        env: env.clone(),
                    }
                }
            }
        }
    }
}
