//! GitHub issue/PR lookup through the `gh` CLI.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::{Comment, Issue, Target};
use crate::retry::{Backoff, DEFAULT_MAX_RETRIES};

// ── Lazy static regexes ──────────────────────────────────────────────────────

static SHORT_FORM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z0-9][a-zA-Z0-9\-]{0,38})/([a-zA-Z0-9._\-]+)#(\d+)$").unwrap()
});

static ISSUE_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https://github\.com/([a-zA-Z0-9][a-zA-Z0-9\-]{0,38})/([a-zA-Z0-9._\-]+)/(?:issues|pull)/(\d+)(?:[/?#].*)?$",
    )
    .unwrap()
});

const RETRYABLE_SIGNATURES: &[&str] = &[
    "rate limit",
    "server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "timeout",
    "temporary failure",
];

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("invalid target format. Expected:\n  - OWNER/REPO#NUM\n  - https://github.com/OWNER/REPO/issues/NUM\n  - https://github.com/OWNER/REPO/pull/NUM\nGot: {0}")]
    InvalidTarget(String),
    #[error("{0}")]
    InvalidComponent(String),
    #[error("gh CLI not found. Please install GitHub CLI: https://cli.github.com/")]
    CliMissing,
    #[error("gh CLI not authenticated. Please run 'gh auth login'")]
    NotAuthenticated,
    #[error("issue/PR {number} not found in {owner}/{repo}")]
    NotFound {
        owner: String,
        repo: String,
        number: u64,
    },
    #[error("authentication failed. Please run 'gh auth login'")]
    Auth,
    #[error("GitHub API error after {attempts} attempts: {stderr}")]
    Api { attempts: u32, stderr: String },
    #[error("failed to execute gh command after {attempts} attempts: {message}")]
    Exec { attempts: u32, message: String },
    #[error("gh command timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to parse GitHub API response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("GitHub request cancelled")]
    Cancelled,
}

// ── Target parsing ───────────────────────────────────────────────────────────

/// Parses `OWNER/REPO#NUM` or an issue/pull-request URL on github.com.
pub fn parse_target(input: &str) -> Result<Target, GithubError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(GithubError::InvalidComponent("target cannot be empty".to_string()));
    }

    let caps = SHORT_FORM_RE
        .captures(input)
        .or_else(|| ISSUE_URL_RE.captures(input))
        .ok_or_else(|| GithubError::InvalidTarget(input.to_string()))?;

    let owner = caps[1].to_string();
    let repo = caps[2].to_string();
    let number: u64 = caps[3].parse().map_err(|_| {
        GithubError::InvalidComponent(format!("invalid issue/PR number: {}", &caps[3]))
    })?;

    if number == 0 {
        return Err(GithubError::InvalidComponent(
            "issue/PR number must be positive, got: 0".to_string(),
        ));
    }
    if owner.len() > 39 {
        return Err(GithubError::InvalidComponent(format!(
            "owner name too long (max 39 characters): {owner}"
        )));
    }
    if repo.len() > 100 {
        return Err(GithubError::InvalidComponent(format!(
            "repository name too long (max 100 characters): {repo}"
        )));
    }

    Ok(Target { owner, repo, number })
}

// ── Source abstraction ───────────────────────────────────────────────────────

/// Where issue bodies and comments come from.
#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn check_available(&self) -> Result<(), GithubError>;
    async fn fetch_issue(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<Issue, GithubError>;
    async fn fetch_comments(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<Vec<Comment>, GithubError>;
}

// ── gh CLI client ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GhClient {
    timeout: Duration,
    max_retries: u32,
    backoff: Backoff,
}

impl GhClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::GITHUB,
        }
    }

    async fn api(
        &self,
        args: &[&str],
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, GithubError> {
        let mut attempt: u32 = 0;

        loop {
            let attempts = attempt + 1;
            let retries_left = attempt < self.max_retries;
            debug!(?args, attempt = attempts, "running gh");

            let run = Command::new("gh").args(args).kill_on_drop(true).output();
            let output = tokio::select! {
                _ = cancel.cancelled() => return Err(GithubError::Cancelled),
                output = tokio::time::timeout(self.timeout, run) => output,
            };

            let output = match output {
                Err(_) if retries_left => {
                    self.pause(attempt, cancel).await?;
                    attempt += 1;
                    continue;
                }
                Err(_) => return Err(GithubError::Timeout(self.timeout)),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(GithubError::CliMissing);
                }
                Ok(Err(e)) if retries_left => {
                    debug!(error = %e, "gh failed to start, retrying");
                    self.pause(attempt, cancel).await?;
                    attempt += 1;
                    continue;
                }
                Ok(Err(e)) => {
                    return Err(GithubError::Exec {
                        attempts,
                        message: e.to_string(),
                    })
                }
                Ok(Ok(output)) => output,
            };

            if output.status.success() {
                return Ok(output.stdout);
            }

            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            match classify_stderr(&stderr) {
                GhFailure::NotFound => {
                    return Err(GithubError::NotFound {
                        owner: target.owner.clone(),
                        repo: target.repo.clone(),
                        number: target.number,
                    })
                }
                GhFailure::Auth => return Err(GithubError::Auth),
                GhFailure::Retryable if retries_left => {
                    debug!(stderr = %stderr, "retryable GitHub error");
                    self.pause(attempt, cancel).await?;
                    attempt += 1;
                }
                GhFailure::Retryable | GhFailure::Other => {
                    return Err(GithubError::Api { attempts, stderr });
                }
            }
        }
    }

    async fn pause(&self, attempt: u32, cancel: &CancellationToken) -> Result<(), GithubError> {
        if self.backoff.wait(attempt, cancel).await {
            Ok(())
        } else {
            Err(GithubError::Cancelled)
        }
    }
}

#[async_trait]
impl IssueSource for GhClient {
    async fn check_available(&self) -> Result<(), GithubError> {
        let version = Command::new("gh").arg("--version").output().await;
        if !matches!(version, Ok(ref out) if out.status.success()) {
            return Err(GithubError::CliMissing);
        }
        let auth = Command::new("gh").args(["auth", "status"]).output().await;
        if !matches!(auth, Ok(ref out) if out.status.success()) {
            return Err(GithubError::NotAuthenticated);
        }
        Ok(())
    }

    async fn fetch_issue(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<Issue, GithubError> {
        let path = format!("repos/{}/{}/issues/{}", target.owner, target.repo, target.number);
        let stdout = self.api(&["api", &path], target, cancel).await?;
        Ok(serde_json::from_slice(&stdout)?)
    }

    async fn fetch_comments(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<Vec<Comment>, GithubError> {
        let path = format!(
            "repos/{}/{}/issues/{}/comments",
            target.owner, target.repo, target.number
        );
        let stdout = self.api(&["api", "--paginate", &path], target, cancel).await?;
        parse_comment_pages(&stdout)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum GhFailure {
    NotFound,
    Auth,
    Retryable,
    Other,
}

fn classify_stderr(stderr: &str) -> GhFailure {
    if stderr.contains("Not Found") || stderr.contains("404") {
        return GhFailure::NotFound;
    }
    if stderr.contains("Bad credentials") || stderr.contains("401") {
        return GhFailure::Auth;
    }
    let lower = stderr.to_lowercase();
    if RETRYABLE_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        GhFailure::Retryable
    } else {
        GhFailure::Other
    }
}

/// `gh api --paginate` prints one JSON array per page, back to back.
fn parse_comment_pages(stdout: &[u8]) -> Result<Vec<Comment>, GithubError> {
    let mut comments = Vec::new();
    for page in serde_json::Deserializer::from_slice(stdout).into_iter::<Vec<Comment>>() {
        comments.extend(page?);
    }
    Ok(comments)
}
