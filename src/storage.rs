//! Sinks for downloaded image bytes: base64 in memory, or numbered files on disk.
//!
//! Neither backend locks internally. Fetch concurrently, then store from a
//! single task.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::Engine;
use tracing::debug;

use crate::validate::{determine_extension, FALLBACK_EXTENSION};

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("cannot store empty data")]
    EmptyData,
    #[error("output directory cannot be empty")]
    EmptyOutputDir,
    #[error("failed to create output directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("file {} already exists (use --force to overwrite)", path.display())]
    AlreadyExists { path: PathBuf },
    #[error("failed to write file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to stat file {}: {source}", path.display())]
    Stat { path: PathBuf, source: io::Error },
    #[error("cleanup failed with {failures} errors: {first}")]
    Cleanup { failures: usize, first: String },
    #[error("encoded string cannot be empty")]
    EmptyEncoding,
    #[error("failed to decode base64 string: {0}")]
    Decode(#[from] base64::DecodeError),
}

// ── Common interface ─────────────────────────────────────────────────────────

/// Either backend, seen from the pipeline.
pub trait ImageStore {
    /// Stores one image and returns its handle: a base64 string or a file path.
    fn store(
        &mut self,
        data: &[u8],
        content_type: &str,
        source_url: &str,
    ) -> Result<String, StorageError>;

    fn count(&self) -> usize;
}

// ── Naming ───────────────────────────────────────────────────────────────────

/// `img-01.png`, `img-02.jpg`, … for zero-based `index`.
pub fn generate_filename(index: usize, extension: &str) -> String {
    let extension = match extension {
        "" => FALLBACK_EXTENSION.to_string(),
        ext if ext.starts_with('.') => ext.to_string(),
        ext => format!(".{ext}"),
    };
    format!("img-{:02}{}", index + 1, extension)
}

// ── Memory backend ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    images: Vec<String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored encoding, in store order.
    pub fn images(&self) -> Vec<String> {
        self.images.clone()
    }

    pub fn clear(&mut self) {
        self.images.clear();
    }

    /// Approximate original byte size of everything stored.
    pub fn estimate_memory_usage(&self) -> u64 {
        self.images
            .iter()
            .map(|encoded| encoded.len() as u64 * 3 / 4)
            .sum()
    }

    /// Decodes a stored encoding back into bytes.
    pub fn image_data(&self, encoded: &str) -> Result<Vec<u8>, StorageError> {
        if encoded.is_empty() {
            return Err(StorageError::EmptyEncoding);
        }
        Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
    }
}

impl ImageStore for MemoryStorage {
    fn store(
        &mut self,
        data: &[u8],
        _content_type: &str,
        _source_url: &str,
    ) -> Result<String, StorageError> {
        if data.is_empty() {
            return Err(StorageError::EmptyData);
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        self.images.push(encoded.clone());
        Ok(encoded)
    }

    fn count(&self) -> usize {
        self.images.len()
    }
}

// ── Disk backend ─────────────────────────────────────────────────────────────

/// Writes `img-NN.<ext>` files into one flat directory.
///
/// Without `force`, a store never replaces an existing file, whoever created it.
#[derive(Debug)]
pub struct DiskStorage {
    output_dir: PathBuf,
    force: bool,
    next_index: usize,
    files: Vec<PathBuf>,
}

impl DiskStorage {
    /// Creates `output_dir` (and parents) if needed.
    pub fn new(output_dir: impl AsRef<Path>, force: bool) -> Result<Self, StorageError> {
        let output_dir = output_dir.as_ref();
        if output_dir.as_os_str().is_empty() {
            return Err(StorageError::EmptyOutputDir);
        }
        fs::create_dir_all(output_dir).map_err(|source| StorageError::CreateDir {
            path: output_dir.to_path_buf(),
            source,
        })?;

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            force,
            next_index: 0,
            files: Vec::new(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.files.clone()
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.output_dir.join(filename).exists()
    }

    /// Sum of the tracked files' current sizes, read from disk on every call.
    pub fn total_size(&self) -> Result<u64, StorageError> {
        self.files.iter().try_fold(0u64, |total, path| {
            let meta = fs::metadata(path).map_err(|source| StorageError::Stat {
                path: path.clone(),
                source,
            })?;
            Ok(total + meta.len())
        })
    }

    /// Deletes every tracked file and forgets them.
    ///
    /// Every file is attempted; the first failure is reported.
    pub fn cleanup(&mut self) -> Result<(), StorageError> {
        let mut failures = 0usize;
        let mut first: Option<String> = None;

        for path in &self.files {
            if let Err(e) = fs::remove_file(path) {
                failures += 1;
                first.get_or_insert_with(|| format!("failed to remove {}: {}", path.display(), e));
            }
        }

        self.files.clear();
        self.next_index = 0;

        match first {
            Some(first) => Err(StorageError::Cleanup { failures, first }),
            None => Ok(()),
        }
    }
}

impl ImageStore for DiskStorage {
    fn store(
        &mut self,
        data: &[u8],
        content_type: &str,
        source_url: &str,
    ) -> Result<String, StorageError> {
        if data.is_empty() {
            return Err(StorageError::EmptyData);
        }

        let extension = determine_extension(content_type, source_url);
        let path = self
            .output_dir
            .join(generate_filename(self.next_index, extension));

        let written = if self.force {
            fs::write(&path, data)
        } else {
            write_new(&path, data)
        };
        match written {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists { path });
            }
            Err(source) => {
                return Err(StorageError::Write {
                    path: path.clone(),
                    source,
                })
            }
        }
        debug!(path = %path.display(), bytes = data.len(), "image written");

        self.next_index += 1;
        self.files.push(path.clone());
        Ok(path.to_string_lossy().into_owned())
    }

    fn count(&self) -> usize {
        self.files.len()
    }
}

/// Creates `path` and writes `data`, failing if anything already exists there.
fn write_new(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn filenames_are_sequential_and_padded() {
        assert_eq!(generate_filename(0, ".png"), "img-01.png");
        assert_eq!(generate_filename(8, "jpg"), "img-09.jpg");
        assert_eq!(generate_filename(99, ".gif"), "img-100.gif");
        assert_eq!(generate_filename(2, ""), "img-03.bin");
        assert_eq!(generate_filename(4, ".webp"), generate_filename(4, ".webp"));

        let numbers: Vec<usize> = (0..12)
            .map(|i| generate_filename(i, ".png"))
            .map(|name| name["img-".len()..name.len() - ".png".len()].parse().unwrap())
            .collect();
        assert_eq!(numbers, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn memory_store_encodes_and_counts() {
        let mut storage = MemoryStorage::new();
        let encoded = storage.store(b"hello", "image/png", "https://example.com/a.png").unwrap();

        assert_eq!(encoded, "aGVsbG8=");
        assert_eq!(storage.count(), 1);
        assert_eq!(storage.images(), vec!["aGVsbG8=".to_string()]);
        assert_eq!(storage.image_data(&encoded).unwrap(), b"hello");
        assert_eq!(storage.estimate_memory_usage(), 6);
    }

    #[test]
    fn memory_store_rejects_empty_data() {
        let mut storage = MemoryStorage::new();
        assert!(matches!(storage.store(&[], "image/png", ""), Err(StorageError::EmptyData)));
        assert_eq!(storage.count(), 0);
    }

    #[test]
    fn memory_images_are_a_copy() {
        let mut storage = MemoryStorage::new();
        storage.store(b"one", "image/png", "").unwrap();
        let mut copy = storage.images();
        copy.push("tampered".to_string());
        assert_eq!(storage.count(), 1);

        storage.clear();
        assert_eq!(storage.count(), 0);
        assert_eq!(storage.estimate_memory_usage(), 0);
    }

    #[test]
    fn memory_decode_errors() {
        let storage = MemoryStorage::new();
        assert!(matches!(storage.image_data(""), Err(StorageError::EmptyEncoding)));
        assert!(matches!(storage.image_data("not base64!"), Err(StorageError::Decode(_))));
    }

    #[test]
    fn disk_storage_requires_a_directory() {
        assert!(matches!(DiskStorage::new("", false), Err(StorageError::EmptyOutputDir)));
    }

    #[test]
    fn disk_storage_creates_nested_directories() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("a").join("b");
        let storage = DiskStorage::new(&dir, false).unwrap();
        assert!(dir.is_dir());
        assert_eq!(storage.output_dir(), dir.as_path());
    }

    #[test]
    fn disk_store_names_files_in_store_order() {
        let tmp = TempDir::new().unwrap();
        let mut storage = DiskStorage::new(tmp.path(), false).unwrap();

        let first = storage.store(b"png bytes", "image/png", "https://example.com/x").unwrap();
        let second = storage.store(b"jpg", "", "https://example.com/photo.JPG?x=1").unwrap();
        let third = storage
            .store(b"??", "application/octet-stream", "https://example.com/x")
            .unwrap();

        assert_eq!(first, tmp.path().join("img-01.png").to_string_lossy());
        assert_eq!(second, tmp.path().join("img-02.jpg").to_string_lossy());
        assert_eq!(third, tmp.path().join("img-03.bin").to_string_lossy());
        assert_eq!(fs::read(tmp.path().join("img-01.png")).unwrap(), b"png bytes");
        assert_eq!(storage.count(), 3);
        assert!(storage.exists("img-02.jpg"));
    }

    #[test]
    fn disk_store_refuses_to_overwrite_foreign_files() {
        let tmp = TempDir::new().unwrap();
        let mut storage = DiskStorage::new(tmp.path(), false).unwrap();
        storage.store(b"1", "image/png", "").unwrap();
        storage.store(b"2", "image/png", "").unwrap();
        fs::write(tmp.path().join("img-03.png"), b"someone else's").unwrap();

        let err = storage.store(b"3", "image/png", "").unwrap_err();

        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        let message = err.to_string();
        assert!(message.contains("already exists"), "{message}");
        assert!(message.contains("img-03.png"), "{message}");
        assert!(message.contains("--force"), "{message}");
        assert_eq!(storage.count(), 2);
        assert_eq!(fs::read(tmp.path().join("img-03.png")).unwrap(), b"someone else's");
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlinks_are_not_followed() {
        let tmp = TempDir::new().unwrap();
        let elsewhere = tmp.path().join("elsewhere.png");
        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();
        std::os::unix::fs::symlink(&elsewhere, out.join("img-01.png")).unwrap();
        let mut storage = DiskStorage::new(&out, false).unwrap();

        let err = storage.store(b"data", "image/png", "").unwrap_err();

        assert!(matches!(err, StorageError::AlreadyExists { .. }), "{err}");
        assert!(!elsewhere.exists());
        assert_eq!(storage.count(), 0);
    }

    #[test]
    fn force_overwrites_existing_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("img-01.png"), b"old").unwrap();
        let mut storage = DiskStorage::new(tmp.path(), true).unwrap();

        storage.store(b"new", "image/png", "").unwrap();

        assert_eq!(fs::read(tmp.path().join("img-01.png")).unwrap(), b"new");
    }

    #[test]
    fn disk_store_rejects_empty_data() {
        let tmp = TempDir::new().unwrap();
        let mut storage = DiskStorage::new(tmp.path(), false).unwrap();
        assert!(matches!(storage.store(b"", "image/png", ""), Err(StorageError::EmptyData)));
        assert_eq!(storage.count(), 0);
        assert!(!storage.exists("img-01.png"));
    }

    #[test]
    fn total_size_reads_the_filesystem_each_time() {
        let tmp = TempDir::new().unwrap();
        let mut storage = DiskStorage::new(tmp.path(), false).unwrap();
        let path = storage.store(b"12345", "image/png", "").unwrap();
        storage.store(b"123", "image/gif", "").unwrap();
        assert_eq!(storage.total_size().unwrap(), 8);

        fs::write(&path, b"1234567890").unwrap();
        assert_eq!(storage.total_size().unwrap(), 13);

        fs::remove_file(&path).unwrap();
        assert!(matches!(storage.total_size(), Err(StorageError::Stat { .. })));
    }

    #[test]
    fn cleanup_removes_tracked_files_and_reports_first_failure() {
        let tmp = TempDir::new().unwrap();
        let mut storage = DiskStorage::new(tmp.path(), false).unwrap();
        let first = storage.store(b"a", "image/png", "").unwrap();
        storage.store(b"b", "image/png", "").unwrap();
        storage.store(b"c", "image/png", "").unwrap();
        fs::remove_file(&first).unwrap();

        let err = storage.cleanup().unwrap_err();

        match err {
            StorageError::Cleanup { failures, first: message } => {
                assert_eq!(failures, 1);
                assert!(message.contains("img-01.png"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!tmp.path().join("img-02.png").exists());
        assert!(!tmp.path().join("img-03.png").exists());
        assert_eq!(storage.count(), 0);

        // Numbering restarts once the tracked files are gone.
        let again = storage.store(b"d", "image/png", "").unwrap();
        assert!(again.ends_with("img-01.png"));
        assert!(storage.cleanup().is_ok());
    }
}
