use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .context("Failed to build HTTP client")
}
