use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::config::StorefrontConfig;
use crate::models::tenant::StorefrontCredentials;
use crate::services::ingest_error::{is_transient_status, IngestError, Result};
use crate::utils::log_sanitizer::sanitize_for_log;

/// Pull side of the storefront Admin API. Each call returns one bounded
/// page of raw records in the platform's own format.
#[async_trait]
pub trait StorefrontApi: Send + Sync {
    async fn fetch_customers(&self, credentials: &StorefrontCredentials) -> Result<Vec<Value>>;

    async fn fetch_products(&self, credentials: &StorefrontCredentials) -> Result<Vec<Value>>;

    async fn fetch_orders(&self, credentials: &StorefrontCredentials) -> Result<Vec<Value>>;

    async fn fetch_abandoned_checkouts(&self, credentials: &StorefrontCredentials) -> Result<Vec<Value>>;
}

pub struct ShopifyClient {
    config: StorefrontConfig,
    http_client: reqwest::Client,
}

impl ShopifyClient {
    pub fn new(config: StorefrontConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { config, http_client })
    }

    fn resource_url(
        &self,
        credentials: &StorefrontCredentials,
        resource: &str,
        extra_query: &[(&str, &str)],
    ) -> Result<Url> {
        let base = match &self.config.api_base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}", credentials.shop_domain),
        };

        let mut url = Url::parse(&format!(
            "{}/admin/api/{}/{}.json",
            base, self.config.api_version, resource
        ))
        .map_err(|e| {
            IngestError::validation(format!(
                "invalid storefront url for shop {}: {}",
                sanitize_for_log(&credentials.shop_domain),
                e
            ))
        })?;

        {
            let mut query = url.query_pairs_mut();
            for (key, value) in extra_query {
                query.append_pair(key, value);
            }
            query.append_pair("limit", &self.config.page_limit.to_string());
        }

        Ok(url)
    }

    /// GET one page of `resource` and return the array under `resource` in the body.
    async fn fetch_page(
        &self,
        credentials: &StorefrontCredentials,
        resource: &str,
        extra_query: &[(&str, &str)],
    ) -> Result<Vec<Value>> {
        let url = self.resource_url(credentials, resource, extra_query)?;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.retry_delay(attempt);
                tracing::warn!(
                    "Retrying {} for shop {} (attempt {}) after {:?}",
                    resource,
                    sanitize_for_log(&credentials.shop_domain),
                    attempt + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .http_client
                .get(url.clone())
                .header("X-Shopify-Access-Token", &credentials.access_token)
                .header("Content-Type", "application/json")
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(IngestError::from(e));
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = sanitize_for_log(&body);
                if is_transient_status(status) {
                    last_error = Some(IngestError::TransientIo(format!(
                        "storefront returned {} for {}: {}",
                        status, resource, message
                    )));
                    continue;
                }
                return Err(IngestError::Upstream { status, message });
            }

            let mut body: Value = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    last_error = Some(IngestError::TransientIo(format!(
                        "unreadable {} response: {}",
                        resource, e
                    )));
                    continue;
                }
            };

            return match body.get_mut(resource).map(Value::take) {
                Some(Value::Array(records)) => Ok(records),
                Some(Value::Null) | None => {
                    tracing::warn!(
                        "Storefront response for {} has no '{}' array, treating as empty",
                        sanitize_for_log(&credentials.shop_domain),
                        resource
                    );
                    Ok(Vec::new())
                }
                Some(other) => Err(IngestError::validation(format!(
                    "'{}' in storefront response is not an array: {}",
                    resource,
                    sanitize_for_log(&other.to_string())
                ))),
            };
        }

        Err(last_error.unwrap_or_else(|| {
            IngestError::TransientIo(format!("{} fetch exhausted retries", resource))
        }))
    }
}

#[async_trait]
impl StorefrontApi for ShopifyClient {
    async fn fetch_customers(&self, credentials: &StorefrontCredentials) -> Result<Vec<Value>> {
        self.fetch_page(credentials, "customers", &[]).await
    }

    async fn fetch_products(&self, credentials: &StorefrontCredentials) -> Result<Vec<Value>> {
        self.fetch_page(credentials, "products", &[]).await
    }

    async fn fetch_orders(&self, credentials: &StorefrontCredentials) -> Result<Vec<Value>> {
        self.fetch_page(credentials, "orders", &[("status", "any")]).await
    }

    async fn fetch_abandoned_checkouts(&self, credentials: &StorefrontCredentials) -> Result<Vec<Value>> {
        self.fetch_page(credentials, "checkouts", &[]).await
    }
}
