use std::ffi::OsStr;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use image::ImageReader;
use image::imageops::FilterType;
use log::{debug, warn};
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::config::EsaConfig;
use crate::http::Requester;
use crate::paths::{MAX_SEGMENT_BYTES, sanitize_segment, sanitize_with_limit};

pub const DEFAULT_IMAGE_EXTENSION: &str = "png";
/// Largest side a resize may produce.
pub const MAX_RESIZE_DIMENSION: u32 = 16_384;
/// Largest pixel count a resize may produce.
pub const MAX_RESIZE_PIXELS: u64 = 40_000_000;

/// Downloads single resources into a directory. Failures are logged and
/// reported as `None`/`false`; nothing here propagates an error.
pub struct ResourceFetcher {
    requester: Requester,
}

impl ResourceFetcher {
    pub fn new(requester: Requester) -> Self {
        Self { requester }
    }

    pub fn from_config(config: &EsaConfig) -> Result<Self> {
        Ok(Self::new(Requester::from_config(config)?))
    }

    pub fn request_count(&self) -> usize {
        self.requester.request_count()
    }

    /// Returns the filename written inside `target_dir`.
    pub fn download(&mut self, url: &str, target_dir: &Path) -> Option<String> {
        self.download_reserving(url, target_dir, &[])
    }

    /// Like `download`, but treats `reserved` names in `target_dir` as taken.
    pub fn download_reserving(
        &mut self,
        url: &str,
        target_dir: &Path,
        reserved: &[&str],
    ) -> Option<String> {
        match self.try_download(url, target_dir, reserved) {
            Ok(filename) => {
                debug!("Downloaded image: {filename}");
                Some(filename)
            }
            Err(error) => {
                warn!("Failed to download image {url}: {error:#}");
                None
            }
        }
    }

    pub fn resize(&self, path: &Path, target_width: u32) -> bool {
        match resize_image(path, target_width) {
            Ok((width, height)) => {
                debug!("Resized image {} to {width}x{height}", path.display());
                true
            }
            Err(error) => {
                warn!("Failed to resize image {}: {error:#}", path.display());
                false
            }
        }
    }

    fn try_download(&mut self, url: &str, target_dir: &Path, reserved: &[&str]) -> Result<String> {
        let parsed = Url::parse(url).with_context(|| format!("invalid image URL {url}"))?;
        let bytes = self.requester.get(&parsed, None)?;

        let filename = unique_filename(target_dir, &filename_from_url(url), reserved);
        let path = target_dir.join(&filename);
        fs::write(&path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(filename)
    }
}

/// Last path segment of the URL, or a hash-derived name when it has no
/// usable extension.
pub fn filename_from_url(url: &str) -> String {
    let candidate = Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(str::to_string)
        })
        .unwrap_or_default();
    if candidate.is_empty() || !candidate.contains('.') {
        return hashed_filename(url);
    }
    sanitize_segment(&candidate)
}

pub fn hashed_filename(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut output = String::with_capacity(32);
    output.push_str("image_");
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output.push('.');
    output.push_str(DEFAULT_IMAGE_EXTENSION);
    output
}

/// `name.ext`, then `name_1.ext`, `name_2.ext`, ... until the name is neither
/// in `dir` nor in `reserved`. The stem is shortened so suffixed names still
/// fit in one segment.
pub fn unique_filename(dir: &Path, original: &str, reserved: &[&str]) -> String {
    let as_path = Path::new(original);
    let stem = as_path
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or(original);
    let extension = as_path.extension().and_then(OsStr::to_str);
    let taken = |candidate: &str| reserved.contains(&candidate) || dir.join(candidate).exists();

    let mut candidate = original.to_string();
    let mut counter = 1u32;
    while taken(&candidate) {
        let suffix = format!("_{counter}");
        let extension_len = extension.map_or(0, |extension| extension.len() + 1);
        let budget = MAX_SEGMENT_BYTES.saturating_sub(suffix.len() + extension_len);
        let stem = if stem.len() > budget {
            sanitize_with_limit(stem, budget)
        } else {
            stem.to_string()
        };
        candidate = match extension {
            Some(extension) => format!("{stem}{suffix}.{extension}"),
            None => format!("{stem}{suffix}"),
        };
        counter += 1;
    }
    candidate
}

/// Refuse targets whose pixel buffer would not reasonably fit in memory.
fn check_resize_bounds(width: u32, height: u32) -> Result<()> {
    if width > MAX_RESIZE_DIMENSION || height > MAX_RESIZE_DIMENSION {
        bail!("target size {width}x{height} exceeds {MAX_RESIZE_DIMENSION} pixels per side");
    }
    if u64::from(width) * u64::from(height) > MAX_RESIZE_PIXELS {
        bail!("target size {width}x{height} exceeds {MAX_RESIZE_PIXELS} pixels");
    }
    Ok(())
}

pub fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let scaled = u64::from(target_width) * u64::from(height) / u64::from(width.max(1));
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}

/// Resample in place, keeping the aspect ratio and the original encoding.
fn resize_image(path: &Path, target_width: u32) -> Result<(u32, u32)> {
    if target_width == 0 {
        bail!("target width must be positive");
    }
    check_resize_bounds(target_width, 1)?;
    let reader = ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to read {}", path.display()))?;
    let format = reader
        .format()
        .ok_or_else(|| anyhow!("unrecognized image format: {}", path.display()))?;
    let image = reader
        .decode()
        .with_context(|| format!("failed to decode {}", path.display()))?;

    let target_height = scaled_height(image.width(), image.height(), target_width);
    check_resize_bounds(target_width, target_height)?;
    let resized = image.resize_exact(target_width, target_height, FilterType::Lanczos3);
    resized
        .save_with_format(path, format)
        .with_context(|| format!("failed to save {}", path.display()))?;
    Ok((target_width, target_height))
}
