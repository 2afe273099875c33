//! Screenshot catalog
//!
//! Owns the canonical list of saved screenshots. Views receive value
//! snapshots through [`Catalog::subscribe`] and come back through the catalog
//! for every mutation.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone};
use image::{DynamicImage, ImageEncoder, RgbaImage};
use log::{info, warn};
use tokio::sync::watch;

use crate::types::ImageFormat;

const FILENAME_PREFIX: &str = "Screenshot_";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const JPEG_QUALITY: u8 = 90;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to encode image: {0}")]
    EncodingFailed(String),

    #[error("A file named {0} already exists")]
    FileAlreadyExists(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScreenshotId(pub u64);

/// Value snapshot of one catalog record.
#[derive(Clone, Debug, PartialEq)]
pub struct Screenshot {
    pub id: ScreenshotId,
    pub path: PathBuf,
    pub created_at: DateTime<Local>,
    pub filename: String,
    /// Bumped whenever the pixels on disk are replaced.
    pub revision: u32,
}

impl Screenshot {
    /// File name without its extension.
    pub fn display_name(&self) -> &str {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.filename)
    }

    pub fn formatted_date(&self) -> String {
        self.created_at.format("%b %-d, %Y at %-I:%M:%S %p").to_string()
    }
}

/// `Screenshot_YYYY-MM-DD_HH-MM-SS-mmm.<ext>`
pub fn generate_filename(at: DateTime<Local>, format: ImageFormat) -> String {
    format!(
        "{}{}-{:03}.{}",
        FILENAME_PREFIX,
        at.format(TIMESTAMP_FORMAT),
        at.timestamp_subsec_millis(),
        format.extension()
    )
}

/// Inverse of [`generate_filename`]; `None` for names that do not follow it.
pub fn parse_filename_date(filename: &str) -> Option<DateTime<Local>> {
    let stem = Path::new(filename).file_stem()?.to_str()?;
    let stamp = stem.strip_prefix(FILENAME_PREFIX)?;
    let (seconds, millis) = stamp.rsplit_once('-')?;
    if millis.len() != 3 {
        return None;
    }
    let millis: i64 = millis.parse().ok()?;
    let naive = NaiveDateTime::parse_from_str(seconds, TIMESTAMP_FORMAT).ok()?;
    let local = Local.from_local_datetime(&naive).earliest()?;
    Some(local + Duration::milliseconds(millis))
}

/// Path separators and colons become `-`; the original extension is kept.
pub fn sanitize_name(new_name: &str, ext: &str) -> Result<String, StorageError> {
    let trimmed = new_name.trim();
    if trimmed.is_empty() {
        return Err(StorageError::InvalidName(new_name.to_string()));
    }
    let mut sanitized = trimmed.replace(['/', ':', '\\'], "-");
    if !ext.is_empty() && !sanitized.ends_with(&format!(".{ext}")) {
        sanitized.push('.');
        sanitized.push_str(ext);
    }
    Ok(sanitized)
}

#[derive(Clone, Copy, Debug)]
pub struct CatalogOptions {
    pub format: ImageFormat,
    pub delete_to_trash: bool,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            delete_to_trash: true,
        }
    }
}

struct Inner {
    dir: PathBuf,
    options: CatalogOptions,
    records: Mutex<Vec<Screenshot>>,
    next_id: AtomicU64,
    updates: watch::Sender<Vec<Screenshot>>,
}

#[derive(Clone)]
pub struct Catalog {
    inner: Arc<Inner>,
}

impl Catalog {
    /// Opens (and creates if needed) the storage directory.
    pub fn open(dir: impl Into<PathBuf>, options: CatalogOptions) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!("[catalog] Storing screenshots in {:?}", dir);
        let (updates, _) = watch::channel(Vec::new());
        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                options,
                records: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                updates,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Current list, newest first.
    pub fn snapshot(&self) -> Vec<Screenshot> {
        self.records().clone()
    }

    pub fn get(&self, id: ScreenshotId) -> Option<Screenshot> {
        self.records().iter().find(|s| s.id == id).cloned()
    }

    /// Receives the full list after every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Screenshot>> {
        self.inner.updates.subscribe()
    }

    pub async fn save(&self, image: RgbaImage) -> Result<Screenshot, StorageError> {
        let format = self.inner.options.format;
        let dir = self.inner.dir.clone();
        let (path, filename, created_at) = blocking(move || {
            let (file, path, filename, at) = create_unique(&dir, Local::now(), format)?;
            if let Err(e) = encode_image(file, &image, format) {
                let _ = fs::remove_file(&path);
                return Err(e);
            }
            Ok((path, filename, at))
        })
        .await?;

        let screenshot = Screenshot {
            id: self.next_id(),
            path,
            created_at,
            filename,
            revision: 0,
        };
        self.mutate(|records| records.insert(0, screenshot.clone()));
        Ok(screenshot)
    }

    /// Rescans the directory. Ids of files already known are preserved.
    pub async fn load_all(&self) -> Result<Vec<Screenshot>, StorageError> {
        let dir = self.inner.dir.clone();
        let found = blocking(move || scan_dir(&dir)).await?;

        let known = self.snapshot();
        let mut loaded: Vec<Screenshot> = found
            .into_iter()
            .map(|(path, filename, created_at)| {
                match known.iter().find(|s| s.path == path) {
                    Some(existing) => Screenshot {
                        filename,
                        created_at,
                        ..existing.clone()
                    },
                    None => Screenshot {
                        id: self.next_id(),
                        path,
                        created_at,
                        filename,
                        revision: 0,
                    },
                }
            })
            .collect();
        loaded.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        self.mutate(|records| *records = loaded.clone());
        Ok(loaded)
    }

    pub async fn delete(&self, screenshot: &Screenshot) -> Result<(), StorageError> {
        let path = screenshot.path.clone();
        let to_trash = self.inner.options.delete_to_trash;
        blocking(move || {
            if !path.exists() {
                return Err(StorageError::FileNotFound(path));
            }
            if to_trash {
                trash::delete(&path).map_err(|e| std::io::Error::other(e.to_string()))?;
            } else {
                fs::remove_file(&path)?;
            }
            Ok(())
        })
        .await?;

        let id = screenshot.id;
        self.mutate(|records| records.retain(|s| s.id != id));
        info!("[catalog] Deleted {:?}", screenshot.path);
        Ok(())
    }

    /// Fails with [`StorageError::FileAlreadyExists`] without touching either
    /// file when the target name is taken.
    pub async fn rename(&self, screenshot: &Screenshot, new_name: &str) -> Result<Screenshot, StorageError> {
        let ext = screenshot
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();
        let filename = sanitize_name(new_name, &ext)?;
        let from = screenshot.path.clone();
        let to = from.with_file_name(&filename);

        let target = to.clone();
        let name = filename.clone();
        blocking(move || {
            if !from.exists() {
                return Err(StorageError::FileNotFound(from));
            }
            move_exclusive(&from, &target, &name)
        })
        .await?;

        let renamed = Screenshot {
            path: to,
            filename,
            ..screenshot.clone()
        };
        let updated = renamed.clone();
        self.mutate(|records| replace_record(records, updated));
        info!("[catalog] Renamed {:?} -> {:?}", screenshot.filename, renamed.filename);
        Ok(renamed)
    }

    /// Replaces the pixels of an existing screenshot, keeping its file format.
    pub async fn overwrite(&self, screenshot: &Screenshot, image: RgbaImage) -> Result<Screenshot, StorageError> {
        let format = screenshot
            .path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ImageFormat::from_extension)
            .unwrap_or(ImageFormat::Png);
        let path = screenshot.path.clone();
        blocking(move || write_image(&path, &image, format)).await?;

        let updated = Screenshot {
            revision: screenshot.revision.wrapping_add(1),
            ..screenshot.clone()
        };
        let record = updated.clone();
        self.mutate(|records| replace_record(records, record));
        Ok(updated)
    }

    pub async fn load_image(&self, screenshot: &Screenshot) -> Result<RgbaImage, StorageError> {
        let path = screenshot.path.clone();
        blocking(move || read_image(&path)).await
    }

    fn next_id(&self) -> ScreenshotId {
        ScreenshotId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn records(&self) -> MutexGuard<'_, Vec<Screenshot>> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate(&self, f: impl FnOnce(&mut Vec<Screenshot>)) {
        let published = {
            let mut records = self.records();
            f(&mut records);
            records.clone()
        };
        self.inner.updates.send_replace(published);
    }
}

fn replace_record(records: &mut [Screenshot], updated: Screenshot) {
    if let Some(slot) = records.iter_mut().find(|s| s.id == updated.id) {
        *slot = updated;
    }
}

async fn blocking<T, F>(f: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?
}

pub(crate) fn read_image(path: &Path) -> Result<RgbaImage, StorageError> {
    if !path.exists() {
        return Err(StorageError::FileNotFound(path.to_path_buf()));
    }
    let img = image::open(path).map_err(|e| StorageError::EncodingFailed(e.to_string()))?;
    Ok(img.to_rgba8())
}

/// Exclusively creates the file for `at`, moving forward a millisecond at a
/// time while the name is taken.
fn create_unique(
    dir: &Path,
    mut at: DateTime<Local>,
    format: ImageFormat,
) -> Result<(File, PathBuf, String, DateTime<Local>), StorageError> {
    loop {
        let filename = generate_filename(at, format);
        let path = dir.join(&filename);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path, filename, at)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => at += Duration::milliseconds(1),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Moves `from` to `to` only if `to` does not exist. The link fails atomically
/// on an existing target; filesystems without hard links fall back to a
/// checked rename.
fn move_exclusive(from: &Path, to: &Path, name: &str) -> Result<(), StorageError> {
    match fs::hard_link(from, to) {
        Ok(()) => {
            fs::remove_file(from)?;
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(StorageError::FileAlreadyExists(name.to_string())),
        Err(e) => {
            warn!("[catalog] Hard link unavailable ({}), renaming in place", e);
            if to.exists() {
                return Err(StorageError::FileAlreadyExists(name.to_string()));
            }
            fs::rename(from, to)?;
            Ok(())
        }
    }
}

fn write_image(path: &Path, image: &RgbaImage, format: ImageFormat) -> Result<(), StorageError> {
    encode_image(File::create(path)?, image, format)
}

fn encode_image(file: File, image: &RgbaImage, format: ImageFormat) -> Result<(), StorageError> {
    let writer = BufWriter::new(file);
    let encoded = match format {
        ImageFormat::Png => image::codecs::png::PngEncoder::new(writer).write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        ),
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            image::codecs::jpeg::JpegEncoder::new_with_quality(writer, JPEG_QUALITY).write_image(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                image::ExtendedColorType::Rgb8,
            )
        }
    };
    encoded.map_err(|e| StorageError::EncodingFailed(e.to_string()))
}

fn scan_dir(dir: &Path) -> Result<Vec<(PathBuf, String, DateTime<Local>)>, StorageError> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if filename.starts_with('.') {
            continue;
        }
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ImageFormat::from_extension)
            .is_some();
        if !supported {
            continue;
        }
        let created_at = parse_filename_date(&filename).unwrap_or_else(|| file_time(&entry));
        found.push((path, filename, created_at));
    }
    Ok(found)
}

fn file_time(entry: &fs::DirEntry) -> DateTime<Local> {
    let meta = match entry.metadata() {
        Ok(meta) => meta,
        Err(e) => {
            warn!("[catalog] No metadata for {:?}: {}", entry.path(), e);
            return Local::now();
        }
    };
    let time: SystemTime = meta
        .created()
        .or_else(|_| meta.modified())
        .unwrap_or_else(|_| SystemTime::now());
    DateTime::<Local>::from(time)
}
