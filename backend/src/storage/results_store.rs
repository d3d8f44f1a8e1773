use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use tempfile::NamedTempFile;

const RESULT_PREFIX: &str = "credit_risk_";
const RESULT_SUFFIX: &str = ".csv";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Results file not found")]
    NotFound,
    #[error("Results storage error: {0}")]
    Io(#[from] io::Error),
}

/// Directory of single-use batch result files.
#[derive(Clone, Debug)]
pub struct ResultStore {
    dir: PathBuf,
    ttl: Duration,
}

/// A result file that is deleted on drop unless `persist` is called.
struct PendingResult {
    file: NamedTempFile,
}

impl PendingResult {
    fn writer(&mut self) -> BufWriter<&mut File> {
        BufWriter::new(self.file.as_file_mut())
    }

    /// Keep the file on disk and hand out its reference.
    fn persist(self) -> Result<String, StorageError> {
        self.file.as_file().sync_all()?;
        let (_, path) = self.file.keep().map_err(|e| StorageError::Io(e.error))?;
        let reference = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_owned)
            .ok_or(StorageError::NotFound)?;
        info!("Stored batch results as {}", reference);
        Ok(reference)
    }
}

impl ResultStore {
    pub fn new<P: Into<PathBuf>>(dir: P, ttl: Duration) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, ttl })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn create(&self) -> Result<PendingResult, StorageError> {
        let file = tempfile::Builder::new()
            .prefix(RESULT_PREFIX)
            .suffix(RESULT_SUFFIX)
            .tempfile_in(&self.dir)?;
        debug!("Created pending result file {}", file.path().display());
        Ok(PendingResult { file })
    }

    /// Create a result file, fill it through `write` and return its
    /// reference. If `write` fails the partial file is removed.
    pub fn save<F, E>(&self, write: F) -> Result<String, E>
    where
        F: FnOnce(&mut dyn Write) -> Result<(), E>,
        E: From<StorageError>,
    {
        let mut pending = self.create()?;
        {
            let mut writer = pending.writer();
            write(&mut writer)?;
            writer.flush().map_err(StorageError::Io)?;
        }
        Ok(pending.persist()?)
    }

    pub fn download_link(reference: &str) -> String {
        format!("/download-results?path={}", reference)
    }

    /// Map a client-supplied reference onto a file inside the store.
    /// Anything that is not a bare result file name resolves to nothing.
    fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let name = Path::new(reference).file_name()?.to_str()?;
        if name != reference || !is_result_name(name) {
            return None;
        }
        Some(self.dir.join(name))
    }

    /// Open a result file and unlink it, so each reference can be
    /// downloaded at most once. The returned handle stays readable.
    pub fn claim(&self, reference: &str) -> Result<File, StorageError> {
        let path = self.resolve(reference).ok_or(StorageError::NotFound)?;
        if self.is_expired(&path) {
            remove_if_present(&path)?;
            return Err(StorageError::NotFound);
        }

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StorageError::NotFound),
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Claimed batch results {}", reference);
                Ok(file)
            }
            // Someone else claimed it between our open and unlink.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete result files older than the configured TTL.
    pub fn purge_expired(&self) -> Result<usize, StorageError> {
        let mut purged = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let is_result = entry.file_name().to_str().is_some_and(is_result_name);
            if !is_result {
                continue;
            }
            let path = entry.path();
            if self.is_expired(&path) {
                match remove_if_present(&path) {
                    Ok(()) => purged += 1,
                    Err(e) => warn!("Failed to purge {}: {}", path.display(), e),
                }
            }
        }
        if purged > 0 {
            info!("Purged {} expired result files", purged);
        }
        Ok(purged)
    }

    fn is_expired(&self, path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > self.ttl)
    }
}

fn is_result_name(name: &str) -> bool {
    name.len() > RESULT_PREFIX.len() + RESULT_SUFFIX.len()
        && name.starts_with(RESULT_PREFIX)
        && name.ends_with(RESULT_SUFFIX)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
