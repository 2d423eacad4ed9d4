//! Raw HTTP client for the content platform.
//!
//! Speaks plain authenticated HTTP and classifies failures into
//! [`PlatformApiError`]; credential refresh, quota accounting and retry
//! policy all live one layer up in the gateway.

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::rotation::error::PlatformApiError;
use crate::rotation::types::ItemMetrics;

#[derive(Clone)]
pub struct PlatformClient {
    base_url: String,
    http: Client,
}

#[derive(Serialize)]
struct TitleUpdateBody<'a> {
    title: &'a str,
}

impl PlatformClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            http: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the live title of `item_id`. Costs one write unit of the
    /// platform's daily quota.
    pub async fn update_item_title(
        &self,
        access_token: &str,
        item_id: &str,
        title: &str,
    ) -> Result<(), PlatformApiError> {
        let url = format!("{}/items/{}/title", self.base_url, item_id);

        let response = self
            .http
            .put(&url)
            .bearer_auth(access_token)
            .json(&TitleUpdateBody { title })
            .send()
            .await
            .map_err(|err| PlatformApiError::network(err.to_string()))?;

        classify_status(response.status())
    }

    /// Fetch item performance figures accumulated since `since`.
    pub async fn fetch_item_metrics(
        &self,
        access_token: &str,
        item_id: &str,
        since: DateTime<Utc>,
    ) -> Result<ItemMetrics, PlatformApiError> {
        let url = format!(
            "{}/items/{}/metrics?since={}",
            self.base_url,
            item_id,
            since.to_rfc3339()
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| PlatformApiError::network(err.to_string()))?;

        classify_status(response.status())?;

        response
            .json::<ItemMetrics>()
            .await
            .map_err(|err| PlatformApiError::parse(err.to_string()))
    }
}

fn classify_status(status: StatusCode) -> Result<(), PlatformApiError> {
    if status.is_success() {
        return Ok(());
    }
    match status.as_u16() {
        401 | 403 => Err(PlatformApiError::Unauthorized),
        429 => Err(PlatformApiError::RateLimited),
        code => Err(PlatformApiError::Server { status: code }),
    }
}
