use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use datalive_kg::{KgError, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::services::CompletionService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Opus,
    #[default]
    Sonnet,
    Haiku,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Opus => "opus",
            Model::Sonnet => "sonnet",
            Model::Haiku => "haiku",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opus" => Ok(Model::Opus),
            "sonnet" => Ok(Model::Sonnet),
            "haiku" => Ok(Model::Haiku),
            other => Err(format!("unknown model '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CliOutput {
    pub response: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CliOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Text completion through an LLM command line
///
/// Runs `<program> --print --model <model> <prompt>` with stdin closed and
/// returns stdout. The child is killed if the calling future is dropped.
#[derive(Clone)]
pub struct CliCompletion {
    program: PathBuf,
    model: Model,
    system_prompt: Option<String>,
    timeout: Duration,
}

impl CliCompletion {
    pub fn new(program: impl Into<PathBuf>, model: Model) -> Self {
        Self {
            program: program.into(),
            model,
            system_prompt: None,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> Model {
        self.model
    }

    fn command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--print");
        cmd.arg("--model").arg(self.model.as_str());

        if let Some(ref system_prompt) = self.system_prompt {
            cmd.arg("--system-prompt").arg(system_prompt);
        }

        // Prompt is positional and must be last
        cmd.arg(prompt);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run the command line once and capture its output
    pub async fn run(&self, prompt: &str) -> Result<CliOutput> {
        let mut cmd = self.command(prompt);
        tracing::debug!("Running completion CLI: {:?}", self.program);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| KgError::TimeoutError {
                timeout_seconds: self.timeout.as_secs(),
                context: format!("{} did not answer", self.program.display()),
            })?
            .map_err(|e| {
                KgError::CompletionError(format!(
                    "Failed to execute {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !stderr.is_empty() {
            tracing::warn!("completion stderr: {}", stderr.trim());
        }

        Ok(CliOutput {
            response: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[async_trait]
impl CompletionService for CliCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let output = self.run(prompt).await?;
        if !output.success() {
            return Err(KgError::CompletionError(format!(
                "{} exited with code {}: {}",
                self.program.display(),
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let response = output.response.trim();
        if response.is_empty() {
            return Err(KgError::CompletionError("empty completion".to_string()));
        }
        Ok(response.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_as_str() {
        assert_eq!(Model::Opus.as_str(), "opus");
        assert_eq!(Model::Sonnet.as_str(), "sonnet");
        assert_eq!(Model::Haiku.as_str(), "haiku");
        assert_eq!("HAIKU".parse::<Model>().unwrap(), Model::Haiku);
        assert!("gpt".parse::<Model>().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_completion_returns_trimmed_stdout() {
        // `echo` prints its arguments, the prompt included
        let completion = CliCompletion::new("echo", Model::Haiku);
        let answer = completion.complete("hello").await.unwrap();
        assert_eq!(answer, "--print --model haiku hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let completion = CliCompletion::new("false", Model::Sonnet);
        let err = completion.complete("hello").await.unwrap_err();
        assert!(matches!(err, KgError::CompletionError(_)));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let completion = CliCompletion::new("/nonexistent/datalive-llm", Model::Sonnet);
        assert!(completion.complete("hello").await.is_err());
    }
}
