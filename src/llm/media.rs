use std::fmt;

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| kind.mime_type().to_string())
}

/// Lowercases, strips parameters and folds common aliases.
pub fn normalize_mime_type(mime_type: &str) -> String {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-png" => "image/png".to_string(),
        _ => essence,
    }
}

/// Image formats the vision model accepts from this front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Png,
    Jpeg,
    Webp,
}

impl ImageMime {
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        match normalize_mime_type(mime_type).as_str() {
            "image/png" => Some(ImageMime::Png),
            "image/jpeg" => Some(ImageMime::Jpeg),
            "image/webp" => Some(ImageMime::Webp),
            _ => None,
        }
    }

    /// Trusts the content over the declared type.
    ///
    /// The declared type is only consulted when the bytes are not recognised.
    pub fn resolve(declared: Option<&str>, bytes: &[u8]) -> Option<Self> {
        match detect_mime_type(bytes) {
            Some(detected) => Self::from_mime(&detected),
            None => declared.and_then(Self::from_mime),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageMime::Png => "image/png",
            ImageMime::Jpeg => "image/jpeg",
            ImageMime::Webp => "image/webp",
        }
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            ImageMime::Png => image::ImageFormat::Png,
            ImageMime::Jpeg => image::ImageFormat::Jpeg,
            ImageMime::Webp => image::ImageFormat::WebP,
        }
    }
}

impl fmt::Display for ImageMime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
