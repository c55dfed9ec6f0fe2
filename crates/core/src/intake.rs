//! Upload batch validation for the local reconstruction path.
//!
//! A batch is checked against count and size policy before anything is
//! written to disk. Validation short-circuits on the first violated rule,
//! checking the batch size before looking at individual images.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fewest images photogrammetry can reasonably work with.
pub const MIN_IMAGES: usize = 20;

/// Upper bound on images per batch.
pub const MAX_IMAGES: usize = 50;

/// Maximum size of a single uploaded image (10 MiB).
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

const BYTES_PER_MIB: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A single image received from a client, not yet validated.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    /// Client-supplied file name, used only for logging.
    pub file_name: Option<String>,
    /// Declared media type of the part (e.g. `image/jpeg`).
    pub content_type: Option<String>,
    /// Raw file bytes.
    pub data: Vec<u8>,
}

impl UploadedImage {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the declared media type names an image format.
    pub fn has_image_media_type(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
    }
}

/// The specific rule a batch violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeError {
    #[error("Minimum {min} images required")]
    TooFewImages { min: usize, actual: usize },

    #[error("Maximum {max} images allowed")]
    TooManyImages { max: usize, actual: usize },

    #[error("Image size too large (max {}MB)", .max / BYTES_PER_MIB)]
    ImageTooLarge {
        /// 1-based position of the offending image.
        index: usize,
        size: usize,
        max: usize,
    },

    #[error("Invalid file type. Only images are allowed.")]
    InvalidMediaType {
        /// 1-based position of the offending image.
        index: usize,
        content_type: Option<String>,
    },
}

impl From<IntakeError> for CoreError {
    fn from(err: IntakeError) -> Self {
        CoreError::Validation(err.to_string())
    }
}

/// Count and size limits applied to an upload batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakePolicy {
    pub min_images: usize,
    pub max_images: usize,
    pub max_image_bytes: usize,
}

impl Default for IntakePolicy {
    fn default() -> Self {
        Self {
            min_images: MIN_IMAGES,
            max_images: MAX_IMAGES,
            max_image_bytes: MAX_IMAGE_BYTES,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl IntakePolicy {
    /// Validate a batch against this policy.
    ///
    /// Rules, in order:
    /// - At least `min_images` images.
    /// - At most `max_images` images.
    /// - Every image at most `max_image_bytes`.
    /// - Every image declares an `image/*` media type.
    pub fn validate(&self, images: &[UploadedImage]) -> Result<(), IntakeError> {
        let count = images.len();
        if count < self.min_images {
            return Err(IntakeError::TooFewImages {
                min: self.min_images,
                actual: count,
            });
        }
        if count > self.max_images {
            return Err(IntakeError::TooManyImages {
                max: self.max_images,
                actual: count,
            });
        }

        for (i, image) in images.iter().enumerate() {
            if image.size() > self.max_image_bytes {
                return Err(IntakeError::ImageTooLarge {
                    index: i + 1,
                    size: image.size(),
                    max: self.max_image_bytes,
                });
            }
            if !image.has_image_media_type() {
                return Err(IntakeError::InvalidMediaType {
                    index: i + 1,
                    content_type: image.content_type.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Validate a batch against the default policy (20..=50 images, 10 MiB each).
pub fn validate_batch(images: &[UploadedImage]) -> Result<(), IntakeError> {
    IntakePolicy::default().validate(images)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn jpeg(size: usize) -> UploadedImage {
        UploadedImage {
            file_name: Some("photo.jpg".to_string()),
            content_type: Some("image/jpeg".to_string()),
            data: vec![0u8; size],
        }
    }

    fn batch(count: usize) -> Vec<UploadedImage> {
        (0..count).map(|_| jpeg(16)).collect()
    }

    #[test]
    fn accepts_bounds_of_allowed_range() {
        assert!(validate_batch(&batch(MIN_IMAGES)).is_ok());
        assert!(validate_batch(&batch(35)).is_ok());
        assert!(validate_batch(&batch(MAX_IMAGES)).is_ok());
    }

    #[test]
    fn rejects_too_few() {
        for count in [0, 1, 5, MIN_IMAGES - 1] {
            assert_matches!(
                validate_batch(&batch(count)),
                Err(IntakeError::TooFewImages { min: 20, actual }) if actual == count
            );
        }
    }

    #[test]
    fn too_few_message_cites_minimum() {
        let err = validate_batch(&batch(5)).unwrap_err();
        assert_eq!(err.to_string(), "Minimum 20 images required");
    }

    #[test]
    fn rejects_too_many() {
        for count in [MAX_IMAGES + 1, 80] {
            assert_matches!(
                validate_batch(&batch(count)),
                Err(IntakeError::TooManyImages { max: 50, .. })
            );
        }
        assert_eq!(
            validate_batch(&batch(51)).unwrap_err().to_string(),
            "Maximum 50 images allowed"
        );
    }

    #[test]
    fn image_at_size_limit_is_accepted() {
        let mut images = batch(MIN_IMAGES);
        images[3] = jpeg(MAX_IMAGE_BYTES);
        assert!(validate_batch(&images).is_ok());
    }

    #[test]
    fn rejects_oversized_image_with_position() {
        let mut images = batch(MIN_IMAGES);
        images[7] = jpeg(MAX_IMAGE_BYTES + 1);

        let err = validate_batch(&images).unwrap_err();
        assert_matches!(err, IntakeError::ImageTooLarge { index: 8, .. });
        assert_eq!(err.to_string(), "Image size too large (max 10MB)");
    }

    #[test]
    fn rejects_non_image_media_type() {
        let mut images = batch(MIN_IMAGES);
        images[0].content_type = Some("application/pdf".to_string());

        assert_matches!(
            validate_batch(&images),
            Err(IntakeError::InvalidMediaType { index: 1, .. })
        );
    }

    #[test]
    fn rejects_missing_media_type() {
        let mut images = batch(MIN_IMAGES);
        images[19].content_type = None;

        assert_matches!(
            validate_batch(&images),
            Err(IntakeError::InvalidMediaType { index: 20, content_type: None })
        );
    }

    #[test]
    fn media_type_match_ignores_case() {
        let mut image = jpeg(1);
        image.content_type = Some("IMAGE/PNG".to_string());
        assert!(image.has_image_media_type());
    }

    #[test]
    fn count_is_checked_before_per_image_rules() {
        let mut images = batch(3);
        images[0].content_type = Some("text/plain".to_string());
        assert_matches!(
            validate_batch(&images),
            Err(IntakeError::TooFewImages { .. })
        );
    }

    #[test]
    fn custom_policy_limits_apply() {
        let policy = IntakePolicy {
            min_images: 1,
            max_images: 2,
            max_image_bytes: 8,
        };
        assert!(policy.validate(&[jpeg(8)]).is_ok());
        assert!(policy.validate(&[jpeg(4), jpeg(8)]).is_ok());
        assert_matches!(
            policy.validate(&batch(3)),
            Err(IntakeError::TooManyImages { max: 2, actual: 3 })
        );
        assert_matches!(
            policy.validate(&[jpeg(9)]),
            Err(IntakeError::ImageTooLarge { index: 1, size: 9, max: 8 })
        );
    }

    #[test]
    fn converts_to_core_validation_error() {
        let core: CoreError = IntakeError::TooFewImages { min: 20, actual: 2 }.into();
        assert_matches!(core, CoreError::Validation(msg) if msg == "Minimum 20 images required");
    }
}
