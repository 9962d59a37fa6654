//! Hands stored images to the `claude` CLI.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

const DENYLIST: &[&str] = &["rm -rf", "sudo ", "eval(", "exec(", "$(", "`"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaudeError {
    #[error("claude CLI not found. Please install Claude CLI or check that it's in your PATH")]
    NotAvailable,
    #[error("prompt cannot be empty")]
    EmptyPrompt,
    #[error("at least one image is required")]
    NoImages,
    #[error("prompt contains potentially dangerous content: {0}")]
    Dangerous(String),
    #[error("claude command failed with exit code {0}")]
    Exit(i32),
    #[error("claude command terminated by signal")]
    Killed,
    #[error("failed to execute claude command: {0}")]
    Spawn(String),
}

/// Something that can take a prompt plus image references and analyse them.
#[async_trait]
pub trait AnalysisSink: Send + Sync {
    async fn check_available(&self) -> Result<(), ClaudeError>;
    async fn analyze(
        &self,
        prompt: &str,
        images: &[String],
        continue_session: bool,
    ) -> Result<(), ClaudeError>;
}

/// Rejects empty prompts, empty image sets and shell-looking prompt content.
pub fn validate_input(prompt: &str, images: &[String]) -> Result<(), ClaudeError> {
    if prompt.is_empty() {
        return Err(ClaudeError::EmptyPrompt);
    }
    if images.iter().all(|image| image.is_empty()) {
        return Err(ClaudeError::NoImages);
    }
    let lower = prompt.to_lowercase();
    if let Some(hit) = DENYLIST.iter().find(|pattern| lower.contains(*pattern)) {
        return Err(ClaudeError::Dangerous(hit.to_string()));
    }
    Ok(())
}

pub fn sanitize_prompt(prompt: &str) -> String {
    prompt.replace('\0', "").trim().to_string()
}

/// `[--continue] prompt image...`, skipping empty prompt/images.
pub fn build_args(prompt: &str, images: &[String], continue_session: bool) -> Vec<String> {
    let mut args = Vec::with_capacity(images.len() + 2);
    if continue_session {
        args.push("--continue".to_string());
    }
    if !prompt.is_empty() {
        args.push(prompt.to_string());
    }
    args.extend(images.iter().filter(|image| !image.is_empty()).cloned());
    args
}

#[derive(Debug, Clone)]
pub struct ClaudeCli {
    program: String,
}

impl Default for ClaudeCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeCli {
    pub fn new() -> Self {
        Self::with_program("claude")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl AnalysisSink for ClaudeCli {
    async fn check_available(&self) -> Result<(), ClaudeError> {
        let status = Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(ClaudeError::NotAvailable),
        }
    }

    async fn analyze(
        &self,
        prompt: &str,
        images: &[String],
        continue_session: bool,
    ) -> Result<(), ClaudeError> {
        if prompt.is_empty() {
            return Err(ClaudeError::EmptyPrompt);
        }
        let args = build_args(prompt, images, continue_session);
        debug!(program = %self.program, args = args.len(), "spawning analysis");

        // Arguments go straight to the process; no shell is involved.
        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| ClaudeError::Spawn(e.to_string()))?;

        if status.success() {
            Ok(())
        } else {
            Err(status.code().map_or(ClaudeError::Killed, ClaudeError::Exit))
        }
    }
}
