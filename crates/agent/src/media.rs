use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media processing failed: {0}")]
    Processing(String),
}

/// Turns attachments into text the classifier can read.
///
/// `Ok(None)` means the processor had nothing to add, which is not an error.
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    async fn describe_image(&self, attachments: &[String]) -> Result<Option<String>, MediaError>;

    async fn transcribe_audio(&self, attachments: &[String])
        -> Result<Option<String>, MediaError>;

    /// Pulls booking details out of text produced by the other two steps.
    async fn parse_ticket(&self, media_text: &str) -> Result<Option<String>, MediaError>;
}

#[derive(Clone, Debug, Default)]
pub struct NoopMediaProcessor;

#[async_trait]
impl MediaProcessor for NoopMediaProcessor {
    async fn describe_image(&self, _attachments: &[String]) -> Result<Option<String>, MediaError> {
        Ok(None)
    }

    async fn transcribe_audio(
        &self,
        _attachments: &[String],
    ) -> Result<Option<String>, MediaError> {
        Ok(None)
    }

    async fn parse_ticket(&self, _media_text: &str) -> Result<Option<String>, MediaError> {
        Ok(None)
    }
}

/// Joins the user's message with media text, skipping empty parts.
pub fn merge_media_text(message: &str, media_text: Option<&str>) -> String {
    let message = message.trim();
    match media_text.map(str::trim).filter(|text| !text.is_empty()) {
        Some(text) if message.is_empty() => text.to_string(),
        Some(text) => format!("{message}\n{text}"),
        None => message.to_string(),
    }
}
