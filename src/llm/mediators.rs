//! The three operations the bot offers: text analysis, image analysis and
//! grounded web search. Each one shapes a single `generateContent` call and
//! collapses every failure into one message for the user.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use tracing::{debug, error};

use crate::config::Config;
use crate::llm::gemini::{GeminiError, GenerateRequest, Part, RemoteModel, Tool};
use crate::validation::{ImageRequest, SearchRequest, TextRequest};

pub const TEXT_FAILURE_MESSAGE: &str = "Failed to get response from Gemini API.";
pub const IMAGE_FAILURE_MESSAGE: &str =
    "Failed to get response from Gemini API for image analysis.";
pub const SEARCH_FAILURE_MESSAGE: &str = "Failed to get response from Gemini API for web search.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteServiceError {
    message: &'static str,
}

impl RemoteServiceError {
    fn wrap(operation: &str, message: &'static str, cause: GeminiError) -> Self {
        error!(
            "Error in {}: {} (retryable={})",
            operation,
            cause,
            cause.is_retryable()
        );
        Self { message }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationRecord {
    pub uri: Option<String>,
    pub title: Option<String>,
}

impl CitationRecord {
    /// Title when present, otherwise the URI.
    pub fn label(&self) -> Option<&str> {
        self.title
            .as_deref()
            .filter(|title| !title.trim().is_empty())
            .or_else(|| self.uri.as_deref().filter(|uri| !uri.trim().is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub text: String,
    pub sources: Vec<CitationRecord>,
}

/// Model identifiers per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoster {
    pub text: String,
    pub vision: String,
    pub search: String,
}

impl ModelRoster {
    pub fn from_config(config: &Config) -> Self {
        Self {
            text: config.gemini_text_model.clone(),
            vision: config.gemini_vision_model.clone(),
            search: config.gemini_search_model.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Mediators {
    remote: Arc<dyn RemoteModel>,
    models: ModelRoster,
}

impl Mediators {
    pub fn new(remote: Arc<dyn RemoteModel>, models: ModelRoster) -> Self {
        Self { remote, models }
    }

    pub fn models(&self) -> &ModelRoster {
        &self.models
    }

    pub async fn analyze_text(&self, request: &TextRequest) -> Result<String, RemoteServiceError> {
        let call = GenerateRequest::new(
            self.models.text.clone(),
            "analyze_text",
            vec![Part::Text(request.prompt().to_string())],
        );

        let response = self
            .remote
            .generate_content(&call)
            .await
            .map_err(|err| RemoteServiceError::wrap("analyze_text", TEXT_FAILURE_MESSAGE, err))?;
        Ok(response.text())
    }

    pub async fn analyze_image(
        &self,
        request: &ImageRequest,
    ) -> Result<String, RemoteServiceError> {
        let image = request.image();
        debug!(
            "Encoding {} image ({} bytes) for analysis",
            image.mime(),
            image.size_bytes()
        );
        let call = GenerateRequest::new(
            self.models.vision.clone(),
            "analyze_image",
            vec![
                Part::InlineData {
                    mime_type: image.mime().as_str().to_string(),
                    data: general_purpose::STANDARD.encode(image.bytes()),
                },
                Part::Text(request.prompt().to_string()),
            ],
        );

        let response = self.remote.generate_content(&call).await.map_err(|err| {
            RemoteServiceError::wrap("analyze_image", IMAGE_FAILURE_MESSAGE, err)
        })?;
        Ok(response.text())
    }

    pub async fn search_web(
        &self,
        request: &SearchRequest,
    ) -> Result<SearchResult, RemoteServiceError> {
        let call = GenerateRequest::new(
            self.models.search.clone(),
            "search_web",
            vec![Part::Text(request.query().to_string())],
        )
        .with_tool(Tool::GoogleSearch);

        let response = self
            .remote
            .generate_content(&call)
            .await
            .map_err(|err| RemoteServiceError::wrap("search_web", SEARCH_FAILURE_MESSAGE, err))?;

        let sources = response
            .grounding_chunks()
            .iter()
            .map(|chunk| CitationRecord {
                uri: chunk.web.as_ref().and_then(|web| web.uri.clone()),
                title: chunk.web.as_ref().and_then(|web| web.title.clone()),
            })
            .collect();

        Ok(SearchResult {
            text: response.text(),
            sources,
        })
    }
}
