//! Command-line flags for the `gh-ccimg` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::fetch::FetchConfig;
use crate::pipeline::PipelineOptions;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Extract images from GitHub issues and pull requests.
#[derive(Parser, Debug)]
#[command(
    name = "gh-ccimg",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Examples:\n  gh-ccimg OWNER/REPO#123\n  gh-ccimg https://github.com/OWNER/REPO/issues/123\n  gh-ccimg OWNER/REPO#123 --out ./images\n  gh-ccimg OWNER/REPO#123 --send \"Analyze these screenshots\""
)]
pub struct Cli {
    /// OWNER/REPO#NUM or an issue/pull request URL.
    pub target: String,

    /// Output directory for images (default: memory mode).
    #[arg(short, long)]
    pub out: Option<String>,

    /// Send images to Claude with this prompt.
    #[arg(long)]
    pub send: Option<String>,

    /// Continue previous Claude session.
    #[arg(long = "continue")]
    pub continue_session: bool,

    /// Maximum image size in MB.
    #[arg(long, env = "GH_CCIMG_MAX_SIZE", default_value_t = 20,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub max_size: u64,

    /// Download timeout in seconds.
    #[arg(long, env = "GH_CCIMG_TIMEOUT", default_value_t = 15,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Parallel downloads.
    #[arg(long, env = "GH_CCIMG_CONCURRENCY", default_value_t = 5,
          value_parser = clap::value_parser!(u64).range(1..=64))]
    pub concurrency: u64,

    /// Retries per download after the first attempt.
    #[arg(long, env = "GH_CCIMG_RETRIES", default_value_t = 3)]
    pub retries: u32,

    /// Overwrite existing files.
    #[arg(long)]
    pub force: bool,

    /// Verbose output.
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Quiet mode (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug mode (detailed troubleshooting info).
    #[arg(long, conflicts_with = "quiet")]
    pub debug: bool,
}

impl Cli {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            "error"
        } else if self.debug {
            "gh_ccimg=trace,info"
        } else if self.verbose {
            "gh_ccimg=debug,info"
        } else {
            "info"
        }
    }

    /// Per-download progress lines instead of a single counter.
    pub fn detailed_progress(&self) -> bool {
        self.verbose || self.debug
    }

    pub fn fetch_config(&self) -> FetchConfig {
        let mut config = FetchConfig::new(
            self.max_size.saturating_mul(BYTES_PER_MB),
            Duration::from_secs(self.timeout),
            self.concurrency as usize,
        );
        config.max_retries = self.retries;
        config
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            out_dir: self.out.clone(),
            output_root: PathBuf::from("."),
            force: self.force,
            send: self.send.clone(),
            continue_session: self.continue_session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_memory_mode() {
        let cli = Cli::try_parse_from(["gh-ccimg", "o/r#1"]).unwrap();
        assert_eq!(cli.target, "o/r#1");
        assert_eq!(cli.out, None);
        assert_eq!(cli.log_filter(), "info");

        let config = cli.fetch_config();
        assert_eq!(config.max_size, 20 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn flags_are_parsed() {
        let cli = Cli::try_parse_from([
            "gh-ccimg", "o/r#1", "-o", "imgs", "--send", "look", "--continue", "--max-size", "2",
            "--timeout", "3", "--concurrency", "8", "--retries", "0", "--force", "--debug",
        ])
        .unwrap();
        let options = cli.pipeline_options();
        assert_eq!(options.out_dir.as_deref(), Some("imgs"));
        assert_eq!(options.send.as_deref(), Some("look"));
        assert!(options.continue_session && options.force);
        assert_eq!(cli.fetch_config().max_size, 2 * 1024 * 1024);
        assert_eq!(cli.fetch_config().max_retries, 0);
        assert_eq!(cli.log_filter(), "gh_ccimg=trace,info");
        assert!(cli.detailed_progress());
    }

    #[test]
    fn invalid_flags_are_rejected() {
        assert!(Cli::try_parse_from(["gh-ccimg"]).is_err());
        assert!(Cli::try_parse_from(["gh-ccimg", "o/r#1", "--concurrency", "0"]).is_err());
        assert!(Cli::try_parse_from(["gh-ccimg", "o/r#1", "-q", "-v"]).is_err());
    }
}
