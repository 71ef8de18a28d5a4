use std::sync::Arc;

use anyhow::Result;
use reqwest::Client;

use crate::config::Config;
use crate::llm::{Mediators, SearchResult};
use crate::submission::SubmissionBoard;
use crate::utils::http::build_http_client;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub mediators: Mediators,
    pub downloads: Client,
    pub text_submissions: SubmissionBoard<String>,
    pub image_submissions: SubmissionBoard<String>,
    pub search_submissions: SubmissionBoard<SearchResult>,
}

impl AppState {
    pub fn new(config: Arc<Config>, mediators: Mediators) -> Result<Self> {
        let downloads = build_http_client(config.media_download_timeout)?;
        Ok(AppState {
            config,
            mediators,
            downloads,
            text_submissions: SubmissionBoard::new(),
            image_submissions: SubmissionBoard::new(),
            search_submissions: SubmissionBoard::new(),
        })
    }
}
