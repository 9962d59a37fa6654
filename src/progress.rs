//! Observational progress hooks for a download batch.

use std::io::Write;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::fetch::FetchError;

/// Receives batch lifecycle callbacks from the fetcher.
///
/// Implementations must not influence the batch; they only observe it.
pub trait ProgressReporter: Send + Sync {
    fn start(&self, total: usize);
    fn update(&self, completed: usize, url: &str, error: Option<&FetchError>);
    fn finish(&self);
}

/// Default reporter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn start(&self, _total: usize) {}
    fn update(&self, _completed: usize, _url: &str, _error: Option<&FetchError>) {}
    fn finish(&self) {}
}

struct ConsoleState<W> {
    writer: W,
    total: usize,
    started: Option<Instant>,
}

/// Human-readable progress lines written to `W` (stderr in the binary).
pub struct ConsoleReporter<W> {
    verbose: bool,
    state: Mutex<ConsoleState<W>>,
}

impl<W: Write + Send> ConsoleReporter<W> {
    pub fn new(writer: W, verbose: bool) -> Self {
        Self {
            verbose,
            state: Mutex::new(ConsoleState {
                writer,
                total: 0,
                started: None,
            }),
        }
    }

    pub fn into_inner(self) -> W {
        self.state.into_inner().writer
    }
}

impl<W: Write + Send> ProgressReporter for ConsoleReporter<W> {
    fn start(&self, total: usize) {
        let mut state = self.state.lock();
        state.total = total;
        state.started = Some(Instant::now());
        // Progress is best effort; a broken stderr must not fail the batch.
        let _ = if self.verbose {
            writeln!(state.writer, "Starting download of {total} images...")
        } else if total > 1 {
            writeln!(state.writer, "Downloading {total} images...")
        } else {
            Ok(())
        };
    }

    fn update(&self, completed: usize, url: &str, error: Option<&FetchError>) {
        let mut state = self.state.lock();
        let total = state.total;
        let _ = match (self.verbose, error) {
            (true, None) => writeln!(state.writer, "✓ [{completed}/{total}] Downloaded: {url}"),
            (true, Some(err)) => {
                writeln!(state.writer, "✗ [{completed}/{total}] Failed: {url} - {err}")
            }
            (false, _) if total > 1 => write!(state.writer, "Progress: {completed}/{total}\r"),
            (false, _) => Ok(()),
        };
        let _ = state.writer.flush();
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        let elapsed = state
            .started
            .map(|started| started.elapsed())
            .unwrap_or_default();
        let elapsed = Duration::from_millis(elapsed.as_millis() as u64);
        let _ = if self.verbose {
            writeln!(state.writer, "Download completed in {elapsed:?}")
        } else if state.total > 1 {
            writeln!(state.writer, "\nCompleted in {elapsed:?}")
        } else {
            Ok(())
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(verbose: bool, total: usize, outcomes: &[Option<FetchError>]) -> String {
        let reporter = ConsoleReporter::new(Vec::new(), verbose);
        reporter.start(total);
        for (i, outcome) in outcomes.iter().enumerate() {
            reporter.update(i + 1, &format!("https://example.com/{i}.png"), outcome.as_ref());
        }
        reporter.finish();
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[test]
    fn verbose_output_lists_every_url() {
        let out = render(true, 2, &[None, Some(FetchError::Cancelled)]);
        assert!(out.starts_with("Starting download of 2 images..."));
        assert!(out.contains("✓ [1/2] Downloaded: https://example.com/0.png"));
        assert!(out.contains("✗ [2/2] Failed: https://example.com/1.png - "));
        assert!(out.contains("Download completed in"));
    }

    #[test]
    fn quiet_single_download_prints_nothing() {
        assert_eq!(render(false, 1, &[None]), "");
    }

    #[test]
    fn compact_output_uses_carriage_returns() {
        let out = render(false, 3, &[None, None, None]);
        assert!(out.starts_with("Downloading 3 images...\n"));
        assert!(out.contains("Progress: 3/3\r"));
        assert!(out.contains("\nCompleted in"));
    }
}
