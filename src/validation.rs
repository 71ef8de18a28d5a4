//! Input checks that run before anything is sent to the model.
//!
//! Request types in this module can only be built through their validating
//! constructors, so a mediator never sees an empty prompt or an oversized
//! image.

use std::io::Cursor;

use image::ImageReader;
use tracing::debug;

use crate::llm::media::ImageMime;

/// Largest image accepted for analysis (4 MiB).
pub const MAX_IMAGE_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please enter a prompt.")]
    EmptyPrompt,
    #[error("Please enter a search query.")]
    EmptyQuery,
    #[error("Please upload an image and enter a prompt.")]
    IncompleteImageRequest,
    #[error("Image size should be less than 4MB.")]
    ImageTooLarge { size_bytes: u64 },
    #[error("Please upload a PNG, JPEG, or WEBP image.")]
    UnsupportedImageType { mime_type: Option<String> },
    #[error("Failed to read the file.")]
    UnreadableFile,
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Rejects an image by its reported size, before it is downloaded or encoded.
pub fn check_image_size(size_bytes: u64) -> Result<(), ValidationError> {
    if size_bytes > MAX_IMAGE_BYTES {
        return Err(ValidationError::ImageTooLarge { size_bytes });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRequest {
    prompt: String,
}

impl TextRequest {
    pub fn new(prompt: impl Into<String>) -> Result<Self, ValidationError> {
        let prompt = prompt.into();
        if is_blank(&prompt) {
            return Err(ValidationError::EmptyPrompt);
        }
        Ok(Self { prompt })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    query: String,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Result<Self, ValidationError> {
        let query = query.into();
        if is_blank(&query) {
            return Err(ValidationError::EmptyQuery);
        }
        Ok(Self { query })
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

/// Raw image content that passed the size, type and readability checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    bytes: Vec<u8>,
    mime: ImageMime,
}

impl ImageUpload {
    pub fn new(bytes: Vec<u8>, declared_mime: Option<&str>) -> Result<Self, ValidationError> {
        check_image_size(bytes.len() as u64)?;
        if bytes.is_empty() {
            return Err(ValidationError::UnreadableFile);
        }

        let mime = ImageMime::resolve(declared_mime, &bytes).ok_or_else(|| {
            ValidationError::UnsupportedImageType {
                mime_type: declared_mime.map(str::to_string),
            }
        })?;

        let reader = ImageReader::with_format(Cursor::new(bytes.as_slice()), mime.image_format());
        let (width, height) = reader
            .into_dimensions()
            .map_err(|err| {
                debug!("Rejecting unreadable {} upload: {}", mime, err);
                ValidationError::UnreadableFile
            })?;
        debug!(
            "Accepted {} upload: {}x{} ({} bytes)",
            mime,
            width,
            height,
            bytes.len()
        );

        Ok(Self { bytes, mime })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> ImageMime {
        self.mime
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    prompt: String,
    image: ImageUpload,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>, image: ImageUpload) -> Result<Self, ValidationError> {
        let prompt = prompt.into();
        if is_blank(&prompt) {
            return Err(ValidationError::IncompleteImageRequest);
        }
        Ok(Self { prompt, image })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn image(&self) -> &ImageUpload {
        &self.image
    }
}
