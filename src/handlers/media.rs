use anyhow::{anyhow, Result};
use reqwest::Client;
use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::{debug, warn};

use crate::validation::{check_image_size, ImageRequest, ImageUpload, ValidationError};

/// An image the user attached, described by Telegram metadata only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub file_id: FileId,
    pub size_bytes: u64,
    pub declared_mime: Option<String>,
}

fn attachment_in(message: &Message) -> Option<ImageAttachment> {
    if let Some(photo) = message.photo().and_then(|sizes| sizes.last()) {
        // Telegram re-encodes photos as JPEG.
        return Some(ImageAttachment {
            file_id: photo.file.id.clone(),
            size_bytes: u64::from(photo.file.size),
            declared_mime: Some("image/jpeg".to_string()),
        });
    }

    if let Some(document) = message.document() {
        return Some(ImageAttachment {
            file_id: document.file.id.clone(),
            size_bytes: u64::from(document.file.size),
            declared_mime: document
                .mime_type
                .as_ref()
                .map(|mime| mime.essence_str().to_string()),
        });
    }

    None
}

/// Looks at the message itself first, then at the message it replies to.
pub fn find_image_attachment(message: &Message) -> Option<ImageAttachment> {
    attachment_in(message).or_else(|| message.reply_to_message().and_then(attachment_in))
}

pub async fn download_telegram_file(bot: &Bot, http: &Client, file_id: &FileId) -> Result<Vec<u8>> {
    let file = bot.get_file(file_id.clone()).await?;
    let url = format!(
        "https://api.telegram.org/file/bot{}/{}",
        bot.token(),
        file.path
    );

    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|err| anyhow!("Telegram file download failed: {}", err.without_url()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("Telegram file download failed with status {status}"));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|err| anyhow!("Failed to read Telegram file body: {}", err.without_url()))?;
    Ok(bytes.to_vec())
}

/// Checks that can be answered from Telegram metadata alone.
///
/// The reported size is checked first, so an oversized file is reported as
/// such even when the prompt is missing.
pub fn check_image_attachment<'a>(
    attachment: Option<&'a ImageAttachment>,
    prompt: &str,
) -> Result<&'a ImageAttachment, ValidationError> {
    let Some(attachment) = attachment else {
        return Err(ValidationError::IncompleteImageRequest);
    };
    check_image_size(attachment.size_bytes)?;
    if prompt.trim().is_empty() {
        return Err(ValidationError::IncompleteImageRequest);
    }
    Ok(attachment)
}

/// Validates and fetches the image for an `/image` command.
///
/// Nothing is downloaded unless the metadata checks pass.
pub async fn prepare_image_request(
    bot: &Bot,
    http: &Client,
    message: &Message,
    prompt: &str,
) -> Result<ImageRequest, ValidationError> {
    let attachment = find_image_attachment(message);
    let attachment = check_image_attachment(attachment.as_ref(), prompt)?;

    let bytes = match download_telegram_file(bot, http, &attachment.file_id).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("Failed to download image attachment: {err}");
            return Err(ValidationError::UnreadableFile);
        }
    };
    debug!(
        "Downloaded image attachment ({} bytes, declared {:?})",
        bytes.len(),
        attachment.declared_mime
    );

    let upload = ImageUpload::new(bytes, attachment.declared_mime.as_deref())?;
    ImageRequest::new(prompt, upload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::MAX_IMAGE_BYTES;

    fn attachment(size_bytes: u64) -> ImageAttachment {
        ImageAttachment {
            file_id: FileId("document".to_string()),
            size_bytes,
            declared_mime: Some("image/png".to_string()),
        }
    }

    #[test]
    fn missing_attachment_asks_for_image_and_prompt() {
        assert_eq!(
            check_image_attachment(None, "describe"),
            Err(ValidationError::IncompleteImageRequest)
        );
    }

    #[test]
    fn oversized_attachment_wins_over_missing_prompt() {
        let big = attachment(5 * 1024 * 1024);
        let err = check_image_attachment(Some(&big), "  ").unwrap_err();
        assert_eq!(err.to_string(), "Image size should be less than 4MB.");
    }

    #[test]
    fn blank_prompt_with_valid_attachment_is_incomplete() {
        let ok = attachment(1024);
        assert_eq!(
            check_image_attachment(Some(&ok), ""),
            Err(ValidationError::IncompleteImageRequest)
        );
    }

    #[test]
    fn attachment_at_the_limit_passes() {
        let edge = attachment(MAX_IMAGE_BYTES);
        assert_eq!(check_image_attachment(Some(&edge), "what is this?"), Ok(&edge));
    }
}
