//! Image batch nodes
//!
//! `BatchImageLoader` picks one image out of a directory per run;
//! `ImageWithTextSaver` writes an image and its prompt side by side under the
//! next free sequence number.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use image::{DynamicImage, ImageFormat};
use loopstore::{JsonFileStore, LoopState, StateStore, hex_digest};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::node::RecomputeSignal;

/// File name prefix of persisted incremental counters
pub const COUNTER_FILE_PREFIX: &str = "batch_counter_";

/// Patterns tried when the caller's pattern is `*`
pub const IMAGE_PATTERNS: &[&str] = &["*.jpg", "*.jpeg", "*.png", "*.webp", "*.bmp", "*.tga", "*.tif", "*.tiff"];

/// Image node errors
#[derive(Debug, Error)]
pub enum ImageNodeError {
    #[error("Directory not found: {0}")]
    DirNotFound(PathBuf),

    #[error("No files in {dir} match {pattern}")]
    NoMatches { dir: PathBuf, pattern: String },

    #[error("Invalid pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Unknown {kind}: {value}")]
    Unknown { kind: &'static str, value: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How the loader chooses an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// `index mod count`
    Single,
    /// Next image on every call, per label and directory
    #[default]
    Incremental,
    /// Seeded random pick
    Random,
}

impl FromStr for BatchMode {
    type Err = ImageNodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" | "single_image" => Ok(Self::Single),
            "incremental" | "incremental_image" => Ok(Self::Incremental),
            "random" | "randomize" => Ok(Self::Random),
            _ => Err(ImageNodeError::Unknown {
                kind: "batch mode",
                value: s.to_string(),
            }),
        }
    }
}

/// One load request
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub dir: PathBuf,
    pub pattern: String,
    pub mode: BatchMode,
    pub index: u64,
    pub seed: u64,
    pub label: String,
    pub allow_rgba: bool,
}

impl LoadRequest {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pattern: "*".to_string(),
            mode: BatchMode::default(),
            index: 0,
            seed: 0,
            label: "Batch 001".to_string(),
            allow_rgba: false,
        }
    }
}

/// A decoded image and where it came from
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub image: DynamicImage,
    pub path: PathBuf,
    pub filename: String,
    /// Position of `path` in the sorted listing
    pub index: usize,
}

/// Where incremental mode keeps its per label and directory counters
#[derive(Debug)]
enum Counters {
    /// Lives as long as the loader
    Memory(Mutex<HashMap<String, usize>>),
    /// One `LoopState` record per counter under this directory
    Persistent(PathBuf),
}

/// Loads one image per call from a directory
#[derive(Debug)]
pub struct BatchImageLoader {
    counters: Counters,
}

impl Default for BatchImageLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchImageLoader {
    /// Loader whose incremental counters reset with the process
    pub fn new() -> Self {
        Self {
            counters: Counters::Memory(Mutex::new(HashMap::new())),
        }
    }

    /// Loader whose incremental counters survive across processes
    pub fn persistent(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        debug!(?state_dir, "BatchImageLoader::persistent: called");
        Self {
            counters: Counters::Persistent(state_dir),
        }
    }

    /// Sorted files in `dir` matching `pattern`, or any image extension for `*`
    pub fn list(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, ImageNodeError> {
        debug!(?dir, %pattern, "BatchImageLoader::list: called");
        if !dir.is_dir() {
            return Err(ImageNodeError::DirNotFound(dir.to_path_buf()));
        }

        let escaped = glob::Pattern::escape(&dir.to_string_lossy());
        let patterns: Vec<&str> = if pattern == "*" { IMAGE_PATTERNS.to_vec() } else { vec![pattern] };

        let mut paths = Vec::new();
        for p in patterns {
            let full = format!("{}/{}", escaped, p);
            let matches = glob::glob(&full).map_err(|source| ImageNodeError::Pattern {
                pattern: p.to_string(),
                source,
            })?;
            paths.extend(matches.filter_map(Result::ok).filter(|path| path.is_file()));
        }
        paths.sort();
        paths.dedup();

        if paths.is_empty() {
            return Err(ImageNodeError::NoMatches {
                dir: dir.to_path_buf(),
                pattern: pattern.to_string(),
            });
        }
        Ok(paths)
    }

    fn pick(&self, request: &LoadRequest, count: usize) -> usize {
        match request.mode {
            BatchMode::Single => (request.index % count as u64) as usize,
            BatchMode::Incremental => {
                let key = format!("{}_{}", request.label, request.dir.display());
                match &self.counters {
                    Counters::Memory(counters) => {
                        let mut counters = counters.lock().unwrap_or_else(|e| e.into_inner());
                        let next = match counters.get(&key) {
                            Some(previous) => (previous + 1) % count,
                            None => 0,
                        };
                        counters.insert(key, next);
                        next
                    }
                    Counters::Persistent(dir) => Self::advance_persisted(dir, &key, count),
                }
            }
            BatchMode::Random => StdRng::seed_from_u64(request.seed).random_range(0..count),
        }
    }

    /// Store holding the counter for `key` under `dir`
    pub fn counter_store(dir: &Path, key: &str) -> JsonFileStore {
        let digest = hex_digest(key.as_bytes());
        JsonFileStore::in_dir(dir, &format!("{}{}.json", COUNTER_FILE_PREFIX, &digest[..16]))
    }

    fn advance_persisted(dir: &Path, key: &str, count: usize) -> usize {
        let digest = hex_digest(key.as_bytes());
        let store = Self::counter_store(dir, key);
        let previous = store.load();
        let next = if previous.has_input_changed(&digest) {
            0
        } else {
            (previous.global_index as usize + 1) % count
        };

        if let Err(e) = store.save(&LoopState::starting_at(next as u64, digest)) {
            warn!(store = %store.describe(), error = %e, "Failed to save image counter, next run repeats this image");
        }
        next
    }

    pub fn load(&self, request: &LoadRequest) -> Result<LoadedImage, ImageNodeError> {
        debug!(dir = ?request.dir, mode = ?request.mode, index = request.index, "BatchImageLoader::load: called");
        let paths = Self::list(&request.dir, &request.pattern)?;
        let index = self.pick(request, paths.len());
        let path = paths[index].clone();

        let decoded = image::open(&path).map_err(|source| ImageNodeError::Decode {
            path: path.clone(),
            source,
        })?;
        let image = if request.allow_rgba && decoded.color().has_alpha() {
            DynamicImage::ImageRgba8(decoded.to_rgba8())
        } else {
            DynamicImage::ImageRgb8(decoded.to_rgb8())
        };

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(%filename, index, count = paths.len(), "Loaded image");
        Ok(LoadedImage {
            image,
            path,
            filename,
            index,
        })
    }

    /// Directory mtime as a cache key; forces a run when the directory is gone
    pub fn changed_marker(dir: &Path) -> RecomputeSignal {
        match fs::metadata(dir).and_then(|m| m.modified()) {
            Ok(modified) => {
                let secs = modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0);
                RecomputeSignal::Cached(secs.to_string())
            }
            Err(_) => RecomputeSignal::Force,
        }
    }
}

/// Image formats the saver writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveFormat {
    #[default]
    Png,
    Jpg,
    Webp,
    Bmp,
}

impl SaveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpg => ImageFormat::Jpeg,
            Self::Webp => ImageFormat::WebP,
            Self::Bmp => ImageFormat::Bmp,
        }
    }
}

impl FromStr for SaveFormat {
    type Err = ImageNodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "webp" => Ok(Self::Webp),
            "bmp" => Ok(Self::Bmp),
            _ => Err(ImageNodeError::Unknown {
                kind: "image format",
                value: s.to_string(),
            }),
        }
    }
}

/// What one save wrote, and what failed
#[derive(Debug, Clone)]
pub struct SaveReport {
    pub number: u64,
    pub image_path: PathBuf,
    pub text_path: PathBuf,
    pub errors: Vec<String>,
}

impl SaveReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for SaveReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "image: {}, text: {}",
            self.image_path.display(),
            self.text_path.display()
        )?;
        for e in &self.errors {
            write!(f, "\nerror: {}", e)?;
        }
        Ok(())
    }
}

/// Saves an image and a text file under a shared, numbered base name
#[derive(Debug, Clone)]
pub struct ImageWithTextSaver {
    pub output_dir: PathBuf,
    pub prefix: String,
    pub delimiter: String,
    pub padding: usize,
    pub format: SaveFormat,
    pub text_extension: String,
}

impl ImageWithTextSaver {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: "c_output".to_string(),
            delimiter: "-".to_string(),
            padding: 4,
            format: SaveFormat::Png,
            text_extension: ".txt".to_string(),
        }
    }

    /// Highest sequence number already used in the output directory
    pub fn highest_number(&self) -> Result<u64, ImageNodeError> {
        let pattern = format!("^{}{}(\\d+)", regex::escape(&self.prefix), regex::escape(&self.delimiter));
        // Escaped input always forms a valid pattern
        let number_re = Regex::new(&pattern).map_err(|e| ImageNodeError::Unknown {
            kind: "filename prefix",
            value: e.to_string(),
        })?;

        let entries = fs::read_dir(&self.output_dir).map_err(|source| ImageNodeError::Io {
            path: self.output_dir.clone(),
            source,
        })?;

        let highest = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                number_re
                    .captures(&name)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse::<u64>().ok())
            })
            .max()
            .unwrap_or(0);
        Ok(highest)
    }

    pub fn save(&self, image: &DynamicImage, text: &str) -> Result<SaveReport, ImageNodeError> {
        debug!(dir = ?self.output_dir, prefix = %self.prefix, "ImageWithTextSaver::save: called");
        fs::create_dir_all(&self.output_dir).map_err(|source| ImageNodeError::Io {
            path: self.output_dir.clone(),
            source,
        })?;

        let number = self.highest_number()? + 1;
        let base = format!(
            "{}{}{:0width$}",
            self.prefix,
            self.delimiter,
            number,
            width = self.padding
        );
        let image_path = self.output_dir.join(format!("{}.{}", base, self.format.extension()));
        let text_path = self.output_dir.join(format!("{}{}", base, self.text_extension));

        let mut errors = Vec::new();
        match fs::write(&text_path, text.as_bytes()) {
            Ok(()) => info!(path = ?text_path, "Saved text"),
            Err(e) => {
                warn!(path = ?text_path, error = %e, "Failed to save text");
                errors.push(format!("text {}: {}", text_path.display(), e));
            }
        }

        // JPEG has no alpha channel
        let encoded = match self.format {
            SaveFormat::Jpg => DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(&image_path, ImageFormat::Jpeg),
            other => image.save_with_format(&image_path, other.image_format()),
        };
        match encoded {
            Ok(()) => info!(path = ?image_path, "Saved image"),
            Err(e) => {
                warn!(path = ?image_path, error = %e, "Failed to save image");
                errors.push(format!("image {}: {}", image_path.display(), e));
            }
        }

        Ok(SaveReport {
            number,
            image_path,
            text_path,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str, shade: u8) {
        RgbImage::from_pixel(2, 2, Rgb([shade, shade, shade]))
            .save(dir.join(name))
            .unwrap();
    }

    fn fixture() -> TempDir {
        let temp = TempDir::new().unwrap();
        write_png(temp.path(), "b.png", 20);
        write_png(temp.path(), "a.png", 10);
        write_png(temp.path(), "c.png", 30);
        fs::write(temp.path().join("notes.txt"), "not an image").unwrap();
        temp
    }

    #[test]
    fn test_list_sorted_images_only() {
        let temp = fixture();
        let paths = BatchImageLoader::list(temp.path(), "*").unwrap();
        let names: Vec<_> = paths.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn test_list_missing_dir() {
        let temp = TempDir::new().unwrap();
        let err = BatchImageLoader::list(&temp.path().join("nope"), "*").unwrap_err();
        assert!(matches!(err, ImageNodeError::DirNotFound(_)));
    }

    #[test]
    fn test_single_mode_wraps() {
        let temp = fixture();
        let loader = BatchImageLoader::new();
        let mut request = LoadRequest::new(temp.path());
        request.mode = BatchMode::Single;
        request.index = 4;
        let loaded = loader.load(&request).unwrap();
        assert_eq!(loaded.filename, "b.png");
    }

    #[test]
    fn test_incremental_mode_counts_per_label() {
        let temp = fixture();
        let loader = BatchImageLoader::new();
        let request = LoadRequest::new(temp.path());

        let names: Vec<String> = (0..4).map(|_| loader.load(&request).unwrap().filename).collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png", "a.png"]);

        let mut other = request.clone();
        other.label = "Batch 002".to_string();
        assert_eq!(loader.load(&other).unwrap().filename, "a.png");
    }

    #[test]
    fn test_persistent_counter_survives_new_loader() {
        let temp = fixture();
        let state = TempDir::new().unwrap();
        let request = LoadRequest::new(temp.path());

        let names: Vec<String> = (0..4)
            .map(|_| BatchImageLoader::persistent(state.path()).load(&request).unwrap().filename)
            .collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png", "a.png"]);

        let key = format!("{}_{}", request.label, temp.path().display());
        let saved = BatchImageLoader::counter_store(state.path(), &key).try_load().unwrap().unwrap();
        assert_eq!(saved.global_index, 0);
    }

    #[test]
    fn test_persistent_counter_unreadable_restarts() {
        let temp = fixture();
        let state = TempDir::new().unwrap();
        let request = LoadRequest::new(temp.path());
        let key = format!("{}_{}", request.label, temp.path().display());
        let store = BatchImageLoader::counter_store(state.path(), &key);
        fs::write(store.path(), "{ broken").unwrap();

        let loader = BatchImageLoader::persistent(state.path());
        assert_eq!(loader.load(&request).unwrap().filename, "a.png");
        assert_eq!(loader.load(&request).unwrap().filename, "b.png");
    }

    #[test]
    fn test_random_mode_is_seeded() {
        let temp = fixture();
        let loader = BatchImageLoader::new();
        let mut request = LoadRequest::new(temp.path());
        request.mode = BatchMode::Random;
        request.seed = 42;
        let first = loader.load(&request).unwrap().filename;
        let second = loader.load(&request).unwrap().filename;
        assert_eq!(first, second);
    }

    #[test]
    fn test_alpha_dropped_unless_allowed() {
        let temp = TempDir::new().unwrap();
        RgbaImage::from_pixel(1, 1, Rgba([1, 2, 3, 128]))
            .save(temp.path().join("x.png"))
            .unwrap();
        let loader = BatchImageLoader::new();
        let mut request = LoadRequest::new(temp.path());
        assert!(!loader.load(&request).unwrap().image.color().has_alpha());

        request.allow_rgba = true;
        assert!(loader.load(&request).unwrap().image.color().has_alpha());
    }

    #[test]
    fn test_changed_marker() {
        let temp = fixture();
        assert!(!BatchImageLoader::changed_marker(temp.path()).is_forced());
        assert!(BatchImageLoader::changed_marker(&temp.path().join("gone")).is_forced());
    }

    #[test]
    fn test_saver_numbers_past_existing() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("c_output-0007.txt"), "old").unwrap();
        fs::write(temp.path().join("other-0099.txt"), "old").unwrap();

        let saver = ImageWithTextSaver::new(temp.path());
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([0, 0, 0])));
        let report = saver.save(&image, "a cat and red").unwrap();

        assert!(report.is_complete());
        assert_eq!(report.number, 8);
        assert!(temp.path().join("c_output-0008.png").is_file());
        assert_eq!(
            fs::read_to_string(temp.path().join("c_output-0008.txt")).unwrap(),
            "a cat and red"
        );
    }

    #[test]
    fn test_saver_creates_dir_and_formats() {
        let temp = TempDir::new().unwrap();
        let mut saver = ImageWithTextSaver::new(temp.path().join("out"));
        saver.format = "jpg".parse().unwrap();
        saver.padding = 2;
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([5, 5, 5, 5])));

        let report = saver.save(&image, "x").unwrap();
        assert!(report.is_complete());
        assert_eq!(report.image_path, temp.path().join("out").join("c_output-01.jpg"));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(".PNG".parse::<SaveFormat>().unwrap(), SaveFormat::Png);
        assert_eq!("jpeg".parse::<SaveFormat>().unwrap(), SaveFormat::Jpg);
        assert!("gif".parse::<SaveFormat>().is_err());
    }
}
