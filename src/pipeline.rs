//! End-to-end run: issue → URLs → downloads → storage → optional analysis.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::claude::{sanitize_prompt, validate_input, AnalysisSink};
use crate::error::AppError;
use crate::extract::{dedupe_urls, extract_image_urls};
use crate::fetch::{FetchError, FetchResult, FetchedImage, Fetcher};
use crate::github::{parse_target, IssueSource};
use crate::models::Target;
use crate::pathguard::validate_output_path;
use crate::storage::{DiskStorage, ImageStore, MemoryStorage};

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Disk mode when set; relative to `output_root`.
    pub out_dir: Option<String>,
    /// Directory `out_dir` must stay inside.
    pub output_root: PathBuf,
    pub force: bool,
    /// Prompt for the analysis sink.
    pub send: Option<String>,
    pub continue_session: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    Memory,
    Disk(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub target: Target,
    /// Distinct image URLs found in the issue and its comments.
    pub found: usize,
    pub downloaded: usize,
    pub failures: Vec<(String, FetchError)>,
    /// Base64 strings (memory mode) or file paths (disk mode), in URL order.
    pub stored: Vec<String>,
    pub mode: StorageMode,
}

pub struct Pipeline<S, K> {
    source: S,
    sink: K,
    fetcher: Fetcher,
    options: PipelineOptions,
}

impl<S: IssueSource, K: AnalysisSink> Pipeline<S, K> {
    pub fn new(source: S, sink: K, fetcher: Fetcher, options: PipelineOptions) -> Self {
        Self {
            source,
            sink,
            fetcher,
            options,
        }
    }

    pub async fn run(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport, AppError> {
        let target = parse_target(input).map_err(|e| {
            debug!(error = %e, "target parse failed");
            AppError::validation(
                format!("Invalid target format: {input}"),
                "Use format: OWNER/REPO#NUM or https://github.com/OWNER/REPO/issues/NUM",
            )
        })?;
        info!(%target, "processing target");

        let disk_dir = self.check_prerequisites().await?;
        let mode = match &disk_dir {
            Some(dir) => StorageMode::Disk(dir.clone()),
            None => StorageMode::Memory,
        };

        info!("fetching GitHub data");
        let issue = self
            .source
            .fetch_issue(&target, cancel)
            .await
            .map_err(|e| AppError::from_github("Failed to fetch issue/PR data", e))?;
        let comments = self
            .source
            .fetch_comments(&target, cancel)
            .await
            .map_err(|e| AppError::from_github("Failed to fetch comments", e))?;
        debug!(comments = comments.len(), body_len = issue.body().len(), "fetched issue");

        let mut all_urls = extract_image_urls(issue.body());
        debug!(count = all_urls.len(), "urls in issue body");
        for (i, comment) in comments.iter().enumerate() {
            let urls = extract_image_urls(comment.body());
            debug!(comment = i + 1, count = urls.len(), "urls in comment");
            all_urls.extend(urls);
        }
        let urls = dedupe_urls(all_urls);

        if urls.is_empty() {
            warn!("no images found in issue/PR {target}");
            return Ok(PipelineReport {
                target,
                found: 0,
                downloaded: 0,
                failures: Vec::new(),
                stored: Vec::new(),
                mode,
            });
        }
        info!("found {} image URLs", urls.len());

        let results = self.fetcher.fetch_concurrent(cancel, &urls).await;
        if cancel.is_cancelled() {
            return Err(AppError::Interrupted);
        }
        let (successes, failures) = in_input_order(&urls, results);
        for (url, err) in &failures {
            debug!(%url, error = %err, "download failed");
        }

        if successes.is_empty() {
            let max_mb = self.fetcher.config().max_size / (1024 * 1024);
            return Err(AppError::validation(
                "No images could be downloaded",
                format!(
                    "Check that the URLs are accessible and contain valid images. Use --debug for detailed error information. Common issues: network connectivity, rate limiting, invalid URLs, or files too large (current limit: {max_mb}MB)"
                ),
            ));
        }
        info!("downloaded {}/{} images successfully", successes.len(), urls.len());

        let mut store: Box<dyn ImageStore + Send> = match &disk_dir {
            Some(dir) => Box::new(DiskStorage::new(dir, self.options.force).map_err(|source| {
                AppError::FileSystem {
                    message: "Failed to initialize disk storage".to_string(),
                    source,
                }
            })?),
            None => Box::new(MemoryStorage::new()),
        };

        let mut stored = Vec::with_capacity(successes.len());
        for (url, image) in &successes {
            match store.store(&image.data, &image.content_type, url) {
                Ok(handle) => {
                    debug!(%url, size = image.size, "stored image");
                    stored.push(handle);
                }
                Err(e) => warn!("failed to store {url}: {e}"),
            }
        }
        match &mode {
            StorageMode::Disk(dir) => info!("saved {} images to {}", store.count(), dir.display()),
            StorageMode::Memory => info!("encoded {} images to base64", store.count()),
        }
        drop(store);

        if let Some(prompt) = &self.options.send {
            self.send(prompt, &target, &stored).await?;
        }

        Ok(PipelineReport {
            target,
            found: urls.len(),
            downloaded: successes.len(),
            failures,
            stored,
            mode,
        })
    }

    /// Checks collaborators and resolves the output directory, before any network work.
    async fn check_prerequisites(&self) -> Result<Option<PathBuf>, AppError> {
        self.source
            .check_available()
            .await
            .map_err(|e| AppError::from_github("GitHub CLI not available", e))?;

        if self.options.send.is_some() {
            self.sink
                .check_available()
                .await
                .map_err(|source| AppError::Claude {
                    message: "Claude CLI not available".to_string(),
                    source,
                })?;
        }

        match &self.options.out_dir {
            Some(out) => {
                validate_output_path(&self.options.output_root, out)
                    .map_err(|e| AppError::Security(format!("Invalid output directory: {e}")))?;
                Ok(Some(self.options.output_root.join(out)))
            }
            None => Ok(None),
        }
    }

    async fn send(&self, prompt: &str, target: &Target, images: &[String]) -> Result<(), AppError> {
        warn!(
            target = %target,
            images = images.len(),
            "sending image data to Claude; images may contain credentials, internal details or personal information. Review them before proceeding"
        );

        validate_input(prompt, images).map_err(|e| {
            AppError::validation(
                format!("Invalid Claude input: {e}"),
                "Check your prompt and ensure images were downloaded",
            )
        })?;

        let prompt = sanitize_prompt(prompt);
        debug!(prompt_len = prompt.len(), images = images.len(), "executing claude");
        self.sink
            .analyze(&prompt, images, self.options.continue_session)
            .await
            .map_err(|source| AppError::Claude {
                message: "Claude execution failed".to_string(),
                source,
            })?;
        info!("Claude analysis complete");
        Ok(())
    }
}

/// Splits fetch results, restoring the order of `urls`.
fn in_input_order(
    urls: &[String],
    results: Vec<FetchResult>,
) -> (Vec<(String, FetchedImage)>, Vec<(String, FetchError)>) {
    let mut by_url: HashMap<String, Result<FetchedImage, FetchError>> =
        results.into_iter().map(|r| (r.url, r.outcome)).collect();

    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for url in urls {
        match by_url.remove(url) {
            Some(Ok(image)) => successes.push((url.clone(), image)),
            Some(Err(e)) => failures.push((url.clone(), e)),
            None => failures.push((url.clone(), FetchError::WorkerLost)),
        }
    }
    (successes, failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(byte: u8) -> FetchedImage {
        FetchedImage {
            data: vec![byte],
            content_type: "image/png".to_string(),
            size: 1,
        }
    }

    #[test]
    fn results_are_restored_to_url_order() {
        let urls: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let results = vec![
            FetchResult {
                url: "c".into(),
                outcome: Ok(image(3)),
            },
            FetchResult {
                url: "b".into(),
                outcome: Err(FetchError::EmptyBody),
            },
            FetchResult {
                url: "a".into(),
                outcome: Ok(image(1)),
            },
        ];

        let (successes, failures) = in_input_order(&urls, results);
        let ok: Vec<&str> = successes.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(ok, vec!["a", "c"]);
        assert_eq!(successes[0].1.data, vec![1]);
        assert_eq!(
            failures,
            vec![
                ("b".to_string(), FetchError::EmptyBody),
                ("d".to_string(), FetchError::WorkerLost)
            ]
        );
    }
}
