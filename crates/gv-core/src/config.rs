use crate::error::ConfigError;
use crate::gates_exec::GateRunner;
use crate::poll::PollConfig;
use crate::types::ValidationGate;
use gv_agent::AgentConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR: &str = ".grove";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GroveConfig {
    pub agent: AgentSection,
    pub validation: ValidationSection,
    #[serde(rename = "gate")]
    pub gates: Vec<ValidationGate>,
    pub poll: PollSection,
    pub events: EventsSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub program: String,
    /// Extra CLI arguments, split with shell quoting rules.
    pub extra_args: String,
    pub allowed_tools: Vec<String>,
    pub system_prompt: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            extra_args: String::new(),
            allowed_tools: Vec::new(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ValidationSection {
    pub gate_retries: u32,
    pub pipeline_retries: u32,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    pub validate_on_complete: bool,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            gate_retries: 3,
            pipeline_retries: 1,
            timeout_secs: 300,
            max_output_bytes: 10 * 1024 * 1024,
            validate_on_complete: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollSection {
    pub interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    pub max_per_session: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            max_per_session: 1000,
        }
    }
}

impl GroveConfig {
    pub fn path_for(repo_root: &Path) -> PathBuf {
        repo_root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Loads `<repo>/.grove/config.toml`. A missing file yields the defaults.
    pub fn load(repo_root: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_for(repo_root);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    message: err.to_string(),
                });
            }
        };
        Self::parse(&content).map_err(|err| match err {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse {
            path: CONFIG_FILE.to_string(),
            message: err.to_string(),
        })?;
        config.agent_config()?;
        Ok(config)
    }

    pub fn agent_config(&self) -> Result<AgentConfig, ConfigError> {
        let extra_args =
            shell_words::split(&self.agent.extra_args).map_err(|err| ConfigError::InvalidArgs {
                message: err.to_string(),
            })?;
        Ok(AgentConfig {
            program: self.agent.program.clone(),
            extra_args,
            ..AgentConfig::default()
        })
    }

    pub fn gate_runner(&self) -> GateRunner {
        GateRunner::new(
            Duration::from_secs(self.validation.timeout_secs),
            self.validation.max_output_bytes,
            self.validation.gate_retries,
        )
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.poll.interval_ms),
            timeout: Duration::from_secs(self.poll.timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = GroveConfig::load(dir.path()).unwrap();
        assert_eq!(config, GroveConfig::default());
        assert_eq!(config.validation.gate_retries, 3);
        assert_eq!(config.events.max_per_session, 1000);
        assert_eq!(config.poll_config().interval, Duration::from_secs(2));
    }

    #[test]
    fn test_parse_full_file() {
        let config = GroveConfig::parse(
            r#"
[agent]
program = "claude"
extra_args = "--model sonnet --permission-mode 'accept edits'"
allowed_tools = ["Read", "Edit", "Bash"]

[validation]
pipeline_retries = 2
validate_on_complete = false

[[gate]]
name = "install"
command = "pnpm install"

[[gate]]
name = "lint"
command = "pnpm lint"
required = false

[events]
max_per_session = 50
"#,
        )
        .unwrap();

        assert_eq!(config.gates.len(), 2);
        assert!(config.gates[0].required);
        assert!(!config.gates[1].required);
        assert_eq!(config.validation.pipeline_retries, 2);
        assert_eq!(config.validation.gate_retries, 3);
        assert!(!config.validation.validate_on_complete);
        assert_eq!(config.events.max_per_session, 50);

        let agent = config.agent_config().unwrap();
        assert_eq!(
            agent.extra_args,
            vec!["--model", "sonnet", "--permission-mode", "accept edits"]
        );
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = GroveConfig::path_for(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[[gate]]\nname = 3\n").unwrap();
        let err = GroveConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_unbalanced_quotes_in_extra_args() {
        let err = GroveConfig::parse("[agent]\nextra_args = \"--flag 'open\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidArgs { .. }));
    }
}
