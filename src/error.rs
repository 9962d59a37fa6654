use crate::claude::ClaudeError;
use crate::github::GithubError;
use crate::storage::StorageError;

const TIMEOUT_SUGGESTION: &str = "Try increasing the timeout with --timeout flag (current default: 15s) or check your network connection. For large images, consider using --max-size to limit file sizes";

const SECURITY_SUGGESTION: &str = "This operation was blocked for security reasons. Review the security warnings and ensure you trust the data being processed";

/// Top-level failure of a run, carrying its process exit code.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Validation { message: String, suggestion: String },
    #[error("{message}: {source}")]
    Network {
        message: String,
        #[source]
        source: GithubError,
    },
    #[error("{message}: {source}")]
    FileSystem {
        message: String,
        #[source]
        source: StorageError,
    },
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Security(String),
    #[error("{message}: {source}")]
    Claude {
        message: String,
        #[source]
        source: ClaudeError,
    },
    #[error("interrupted")]
    Interrupted,
}

impl AppError {
    pub fn validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Classifies a GitHub failure; `context` says what was being fetched.
    pub fn from_github(context: &str, err: GithubError) -> Self {
        match err {
            GithubError::CliMissing | GithubError::NotAuthenticated | GithubError::Auth => {
                AppError::Auth(format!("GitHub CLI not available: {err}"))
            }
            GithubError::Timeout(_) => AppError::Timeout(format!("{context}: {err}")),
            GithubError::Cancelled => AppError::Interrupted,
            other => AppError::Network {
                message: context.to_string(),
                source: other,
            },
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Validation { .. } => 1,
            AppError::Network { .. } => 2,
            AppError::FileSystem { .. } => 3,
            AppError::Auth(_) => 4,
            AppError::Timeout(_) => 5,
            AppError::Security(_) => 6,
            AppError::Claude { .. } => 7,
            AppError::Interrupted => 130,
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            AppError::Validation { suggestion, .. } => suggestion.clone(),
            AppError::Network { source, .. } => network_suggestion(&source.to_string()).to_string(),
            AppError::FileSystem { source, .. } => {
                filesystem_suggestion(&source.to_string()).to_string()
            }
            AppError::Auth(_) => {
                "Please run 'gh auth login' to authenticate with GitHub".to_string()
            }
            AppError::Timeout(_) => TIMEOUT_SUGGESTION.to_string(),
            AppError::Security(_) => SECURITY_SUGGESTION.to_string(),
            AppError::Claude { source, .. } => claude_suggestion(&source.to_string()).to_string(),
            AppError::Interrupted => "Operation cancelled by user".to_string(),
        }
    }

    /// Message plus suggestion, as printed by the binary.
    pub fn report(&self) -> String {
        let suggestion = self.suggestion();
        if suggestion.is_empty() {
            self.to_string()
        } else {
            format!("{self}\nSuggestion: {suggestion}")
        }
    }
}

fn network_suggestion(detail: &str) -> &'static str {
    let detail = detail.to_lowercase();
    if detail.contains("rate limit") {
        "GitHub API rate limit exceeded. Wait a few minutes before retrying, or use a GitHub token with higher limits"
    } else if detail.contains("timeout") || detail.contains("timed out") {
        "Request timed out. Try increasing the timeout with --timeout flag or check your network connection"
    } else if detail.contains("authentication") || detail.contains("401") {
        "Authentication failed. Please run 'gh auth login' to authenticate with GitHub"
    } else if detail.contains("not found") || detail.contains("404") {
        "Resource not found. Check that the repository and issue/PR number are correct and accessible"
    } else if detail.contains("forbidden") || detail.contains("403") {
        "Access forbidden. You may not have permission to access this repository or resource"
    } else {
        "Check your internet connection and try again"
    }
}

fn filesystem_suggestion(detail: &str) -> &'static str {
    let detail = detail.to_lowercase();
    if detail.contains("permission denied") {
        "Permission denied. Check that you have write access to the target directory or run with appropriate permissions"
    } else if detail.contains("no space left") {
        "Insufficient disk space. Free up some space or choose a different output directory"
    } else if detail.contains("already exists") || detail.contains("file exists") {
        "File already exists. Use --force flag to overwrite existing files"
    } else if detail.contains("no such file or directory") {
        "Directory does not exist. Create the directory first or use a valid output path"
    } else if detail.contains("is a directory") {
        "Target is a directory. Specify a file path or use a different name"
    } else {
        "Check file permissions and available disk space"
    }
}

fn claude_suggestion(detail: &str) -> &'static str {
    let detail = detail.to_lowercase();
    if detail.contains("not found") {
        "Claude CLI not found. Install it from https://claude.ai/code or remove the --send flag"
    } else if detail.contains("permission denied") {
        "Permission denied accessing Claude CLI. Check that the claude command is executable"
    } else if detail.contains("authentication") || detail.contains("unauthorized") {
        "Claude authentication failed. Run 'claude auth login' or check your API credentials"
    } else if detail.contains("timeout") {
        "Claude request timed out. The images may be too large or the service may be temporarily unavailable"
    } else if detail.contains("rate limit") {
        "Claude rate limit exceeded. Wait a few minutes before retrying"
    } else {
        "Check that Claude CLI is installed and accessible. Run 'claude --version' to verify installation"
    }
}
