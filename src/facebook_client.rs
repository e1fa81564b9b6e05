use crate::credentials::{Secret, TokenVerifier};
use crate::errors::AppError;
use crate::extractor::LeadSource;
use crate::models::{LeadForm, LeadRecord, Selection};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;

const LEAD_FIELDS: &str =
    "id,created_time,ad_id,ad_name,campaign_id,campaign_name,form_id,field_data,is_organic,platform";
const PAGE_LIMIT: &str = "100";

/// One page of a Graph API edge.
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenExchange {
    access_token: String,
}

fn build_http_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::ExternalApi(format!("Failed to create Graph API client: {}", e)))
}

fn endpoint(graph_url: &str, path: &str, params: &[(&str, &str)]) -> Result<Url, AppError> {
    Url::parse_with_params(&format!("{}/{}", graph_url, path), params)
        .map_err(|e| AppError::ExternalApi(format!("Failed to build Graph API URL: {}", e)))
}

/// Auth failures (expired or revoked token) are reported as credential errors.
async fn graph_error(response: reqwest::Response) -> AppError {
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || error_text.contains("OAuthException")
    {
        AppError::credential("facebook", format!("Graph API rejected token ({}): {}", status, error_text))
    } else {
        AppError::ExternalApi(format!("Graph API returned {}: {}", status, error_text))
    }
}

/// Checks Facebook access tokens against `/me`, and exchanges freshly
/// entered tokens for long-lived ones when app credentials are configured.
#[derive(Clone)]
pub struct FacebookTokenVerifier {
    client: Client,
    graph_url: String,
    app_id: Option<String>,
    app_secret: Option<String>,
}

impl FacebookTokenVerifier {
    pub fn new(
        graph_url: String,
        app_id: Option<String>,
        app_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            graph_url,
            app_id,
            app_secret,
        })
    }
}

#[async_trait]
impl TokenVerifier for FacebookTokenVerifier {
    async fn check(&self, secret: &str) -> Result<bool, AppError> {
        let url = endpoint(&self.graph_url, "me", &[("fields", "id"), ("access_token", secret)])?;
        tracing::debug!("Verifying Facebook token at {}/me?access_token=[REDACTED]", self.graph_url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ExternalApi(format!("Graph API request failed: {}", e)))?;

        if response.status().is_success() {
            return Ok(true);
        }
        match graph_error(response).await {
            AppError::Credential { .. } => Ok(false),
            other => Err(other),
        }
    }

    async fn finalize(&self, secret: String) -> Result<String, AppError> {
        let (Some(app_id), Some(app_secret)) = (&self.app_id, &self.app_secret) else {
            return Ok(secret);
        };

        let url = endpoint(
            &self.graph_url,
            "oauth/access_token",
            &[
                ("grant_type", "fb_exchange_token"),
                ("client_id", app_id),
                ("client_secret", app_secret),
                ("fb_exchange_token", &secret),
            ],
        )?;
        tracing::info!("Exchanging Facebook token for a long-lived token");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ExternalApi(format!("Token exchange request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(graph_error(response).await);
        }

        let exchanged: TokenExchange = response.json().await.map_err(|e| {
            AppError::ExternalApi(format!("Failed to parse token exchange response: {}", e))
        })?;
        Ok(exchanged.access_token)
    }
}

/// Lead listing client for the Facebook Graph API.
#[derive(Clone)]
pub struct FacebookLeadsClient {
    client: Client,
    graph_url: String,
    token: Secret,
    page_id: Option<String>,
}

impl FacebookLeadsClient {
    pub fn new(
        graph_url: String,
        token: Secret,
        page_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            graph_url,
            token,
            page_id,
        })
    }

    /// Follows `paging.next` until the edge is exhausted.
    async fn get_all<T: DeserializeOwned>(&self, first: Url) -> Result<Vec<T>, AppError> {
        let mut items = Vec::new();
        let mut next = Some(first);

        while let Some(url) = next.take() {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| AppError::ExternalApi(format!("Graph API request failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(graph_error(response).await);
            }

            let page: Page<T> = response.json().await.map_err(|e| {
                AppError::ExternalApi(format!("Failed to parse Graph API response: {}", e))
            })?;
            items.extend(page.data);

            next = match page.paging.and_then(|p| p.next) {
                Some(link) => Some(Url::parse(&link).map_err(|e| {
                    AppError::ExternalApi(format!("Invalid pagination link: {}", e))
                })?),
                None => None,
            };
        }

        Ok(items)
    }

    async fn leads_for(&self, object_id: &str, filtering: Option<&str>) -> Result<Vec<LeadRecord>, AppError> {
        let mut params = vec![
            ("fields", LEAD_FIELDS),
            ("limit", PAGE_LIMIT),
            ("access_token", self.token.expose()),
        ];
        if let Some(filter) = filtering {
            params.push(("filtering", filter));
        }
        let url = endpoint(&self.graph_url, &format!("{}/leads", object_id), &params)?;
        let leads = self.get_all::<LeadRecord>(url).await?;
        tracing::info!("Fetched {} leads from {}", leads.len(), object_id);
        Ok(leads)
    }
}

#[async_trait]
impl LeadSource for FacebookLeadsClient {
    async fn list_forms(&self) -> Result<Vec<LeadForm>, AppError> {
        let page_id = self.page_id.as_deref().ok_or_else(|| {
            AppError::Configuration(
                "FACEBOOK_PAGE_ID is required to list lead forms when no form or ad ids are configured"
                    .to_string(),
            )
        })?;

        let url = endpoint(
            &self.graph_url,
            &format!("{}/leadgen_forms", page_id),
            &[
                ("fields", "id,name,status"),
                ("limit", PAGE_LIMIT),
                ("access_token", self.token.expose()),
            ],
        )?;
        tracing::info!("Listing lead forms for page {}", page_id);
        self.get_all(url).await
    }

    async fn fetch_leads(
        &self,
        selection: &Selection,
        lookback_days: u32,
    ) -> Result<Vec<LeadRecord>, AppError> {
        // A zero-day lookback means "no lower bound".
        let filtering = (lookback_days > 0).then(|| {
            let since = Utc::now() - ChronoDuration::days(i64::from(lookback_days));
            json!([{
                "field": "time_created",
                "operator": "GREATER_THAN",
                "value": since.timestamp()
            }])
            .to_string()
        });

        let mut seen = HashSet::new();
        let mut leads = Vec::new();

        for object_id in selection.form_ids.iter().chain(selection.ad_ids.iter()) {
            for lead in self.leads_for(object_id, filtering.as_deref()).await? {
                if seen.insert(lead.id.clone()) {
                    leads.push(lead);
                }
            }
        }

        Ok(leads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = FacebookLeadsClient::new(
            "https://graph.facebook.com/v19.0".to_string(),
            Secret::new("token"),
            None,
            Duration::from_secs(5),
        );
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_list_forms_requires_page_id() {
        let client = FacebookLeadsClient::new(
            "https://graph.facebook.com/v19.0".to_string(),
            Secret::new("token"),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        let err = client.list_forms().await.unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_page_without_paging() {
        let page: Page<LeadForm> =
            serde_json::from_str(r#"{"data": [{"id": "1", "name": "Form"}]}"#).unwrap();
        assert_eq!(page.data.len(), 1);
        assert!(page.paging.is_none());
    }
}
