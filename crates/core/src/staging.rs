//! Image normalization into a job's input directory.
//!
//! Every accepted upload is decoded, shrunk to fit a bounding box (never
//! enlarged), re-encoded as JPEG at a fixed quality, and written as
//! `image_{n}.jpg` where `n` is its 1-based position in the batch. Images
//! are processed concurrently on the blocking pool; file names follow input
//! order regardless of completion order.

use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::intake::UploadedImage;
use crate::layout::input_image_name;

/// Default bounding box edge in pixels.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// Default JPEG quality for staged images.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Suffix for files still being written; renamed away on success.
const PARTIAL_SUFFIX: &str = "part";

/// How staged images are normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
}

impl Default for StagingOptions {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_DIMENSION,
            max_height: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// A normalized image written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedImage {
    /// 1-based position in the original batch.
    pub index: usize,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Failed to stage image {index}: {reason}")]
    StageWriteFailed {
        /// 1-based position of the image that failed.
        index: usize,
        reason: String,
    },
}

/// Normalize and write every image of `images` into `input_dir`.
///
/// `input_dir` must already exist. All conversions run to completion before
/// this returns, so no write is still in flight when a caller cleans up
/// after a failure. The first failure by batch position is reported.
///
/// Conversions run on the blocking pool and are not stopped if this future
/// is dropped early. Callers that may be cancelled must drive it on a task
/// of its own and clean up only after that task finishes.
pub async fn stage_images(
    images: Vec<UploadedImage>,
    input_dir: &Path,
    options: StagingOptions,
) -> Result<Vec<StagedImage>, StagingError> {
    let tasks = images.into_iter().enumerate().map(|(i, image)| {
        let index = i + 1;
        let dest = input_dir.join(input_image_name(index));
        async move {
            let joined = tokio::task::spawn_blocking(move || {
                normalize_to_file(&image.data, &dest, options).map(|(width, height)| {
                    StagedImage {
                        index,
                        path: dest,
                        width,
                        height,
                    }
                })
            })
            .await;

            match joined {
                Ok(result) => {
                    result.map_err(|reason| StagingError::StageWriteFailed { index, reason })
                }
                Err(e) => Err(StagingError::StageWriteFailed {
                    index,
                    reason: format!("conversion task failed: {e}"),
                }),
            }
        }
    });

    futures::future::join_all(tasks)
        .await
        .into_iter()
        .collect()
}

/// Dimensions of a `width`×`height` image scaled to fit inside
/// `max_width`×`max_height`, preserving aspect ratio. Images already inside
/// the box keep their size.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let scale = f64::min(
        f64::from(max_width) / f64::from(width),
        f64::from(max_height) / f64::from(height),
    );
    let w = (f64::from(width) * scale).round() as u32;
    let h = (f64::from(height) * scale).round() as u32;
    (w.clamp(1, max_width), h.clamp(1, max_height))
}

/// Decode, resize, encode, and atomically write one image.
///
/// Returns the final dimensions.
fn normalize_to_file(data: &[u8], dest: &Path, options: StagingOptions) -> Result<(u32, u32), String> {
    let decoded = image::load_from_memory(data).map_err(|e| format!("decode failed: {e}"))?;

    let (width, height) = fit_within(
        decoded.width(),
        decoded.height(),
        options.max_width,
        options.max_height,
    );
    let resized = if (width, height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::Lanczos3)
    };

    // JPEG has no alpha channel.
    let rgb = resized.to_rgb8();
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, options.jpeg_quality)
        .encode_image(&rgb)
        .map_err(|e| format!("encode failed: {e}"))?;

    let partial = dest.with_extension(format!("jpg.{PARTIAL_SUFFIX}"));
    std::fs::write(&partial, &encoded).map_err(|e| format!("write failed: {e}"))?;
    if let Err(e) = std::fs::rename(&partial, dest) {
        let _ = std::fs::remove_file(&partial);
        return Err(format!("rename failed: {e}"));
    }

    Ok((width, height))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
