use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use instinct_types::Observation;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::paths::StorePaths;

/// Length of the `%Y%m%d-%H%M%S` stamp in archive names
const STAMP_LEN: usize = 15;

/// Default rotation threshold for the active log: 10 MB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Append-only observation log plus its archive directory.
///
/// Every append and rotation holds an exclusive advisory lock on a sidecar
/// lock file, so overlapping capture processes and the daemon never
/// interleave partial lines or append into a file that is being archived.
#[derive(Debug, Clone)]
pub struct ObservationStore {
    log_path: PathBuf,
    archive_dir: PathBuf,
    lock_path: PathBuf,
    max_bytes: u64,
}

impl ObservationStore {
    /// Create a store over the layout in `paths`
    pub fn new(paths: &StorePaths, max_bytes: u64) -> Self {
        Self {
            log_path: paths.observations(),
            archive_dir: paths.archive_dir(),
            lock_path: paths.lock_file(),
            max_bytes,
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Create the root and archive directories if absent
    pub fn ensure_dirs(&self) -> Result<()> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::create_dir_all(&self.archive_dir)
            .with_context(|| format!("Failed to create {}", self.archive_dir.display()))?;
        Ok(())
    }

    /// Append one record as a JSON line.
    ///
    /// If writing the record would push the active log past the threshold,
    /// the log is rotated first.
    pub fn append(&self, observation: &Observation) -> Result<()> {
        let mut line = serde_json::to_string(observation)?;
        line.push('\n');

        self.ensure_dirs()?;
        let _lock = self.lock()?;

        let current = self.size_unlocked()?;
        if current > 0 && current + line.len() as u64 > self.max_bytes {
            self.archive_unlocked()?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open {}", self.log_path.display()))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        Ok(())
    }

    /// Archive the active log if it has grown past the threshold
    pub fn rotate_if_needed(&self) -> Result<Option<PathBuf>> {
        self.ensure_dirs()?;
        let _lock = self.lock()?;

        if self.size_unlocked()? > self.max_bytes {
            self.archive_unlocked()
        } else {
            Ok(None)
        }
    }

    /// Archive the active log regardless of size.
    ///
    /// Returns the archive path, or `None` when there was nothing to archive.
    pub fn rotate(&self) -> Result<Option<PathBuf>> {
        self.ensure_dirs()?;
        let _lock = self.lock()?;
        self.archive_unlocked()
    }

    /// Number of records in the active log
    pub fn line_count(&self) -> Result<usize> {
        let file = match File::open(&self.log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open {}", self.log_path.display()))
            }
        };

        let mut count = 0;
        for line in BufReader::new(file).lines() {
            if !line?.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Size of the active log in bytes
    pub fn size(&self) -> Result<u64> {
        self.size_unlocked()
    }

    /// Archived segments, oldest first
    pub fn archives(&self) -> Result<Vec<PathBuf>> {
        if !self.archive_dir.exists() {
            return Ok(Vec::new());
        }

        let mut archives = Vec::new();
        for entry in fs::read_dir(&self.archive_dir)
            .with_context(|| format!("Failed to read {}", self.archive_dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                archives.push(path);
            }
        }
        archives.sort_by_cached_key(|path| archive_order(path));
        Ok(archives)
    }

    fn lock(&self) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .with_context(|| format!("Failed to open {}", self.lock_path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", self.lock_path.display()))?;
        Ok(file)
    }

    fn size_unlocked(&self) -> Result<u64> {
        match fs::metadata(&self.log_path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e).with_context(|| format!("Failed to stat {}", self.log_path.display())),
        }
    }

    /// Caller must hold the lock
    fn archive_unlocked(&self) -> Result<Option<PathBuf>> {
        if self.size_unlocked()? == 0 {
            return Ok(None);
        }

        let target = self.next_archive_path();
        fs::rename(&self.log_path, &target).with_context(|| {
            format!(
                "Failed to archive {} to {}",
                self.log_path.display(),
                target.display()
            )
        })?;
        File::create(&self.log_path)
            .with_context(|| format!("Failed to recreate {}", self.log_path.display()))?;

        info!(archive = %target.display(), "Archived observation log");
        Ok(Some(target))
    }

    fn next_archive_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let mut candidate = self.archive_dir.join(format!("observations-{}.jsonl", stamp));
        let mut n = 1;
        while candidate.exists() {
            debug!("Archive {} exists, adding suffix", candidate.display());
            candidate = self
                .archive_dir
                .join(format!("observations-{}-{}.jsonl", stamp, n));
            n += 1;
        }
        candidate
    }
}

/// Sort key for `observations-<YYYYMMDD-HHMMSS>[-N].jsonl`: stamp, then suffix
fn archive_order(path: &Path) -> (String, u32) {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let rest = stem.strip_prefix("observations-").unwrap_or(stem);

    match (rest.get(..STAMP_LEN), rest.get(STAMP_LEN..)) {
        (Some(stamp), Some(suffix)) => {
            let n = suffix
                .strip_prefix('-')
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            (stamp.to_string(), n)
        }
        _ => (rest.to_string(), 0),
    }
}
