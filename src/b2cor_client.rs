use crate::contact::Contact;
use crate::credentials::{Secret, TokenVerifier};
use crate::delivery_ledger::DeliveryLedger;
use crate::errors::AppError;
use crate::models::{DeliveryOptions, DeliveryStatus, LeadRecord};
use crate::sender::LeadSink;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn build_http_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::ExternalApi(format!("Failed to create B2Cor client: {}", e)))
}

async fn error_text(response: reqwest::Response) -> (StatusCode, String) {
    let status = response.status();
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    (status, text)
}

/// Checks B2Cor API keys with a lightweight authenticated GET.
#[derive(Clone)]
pub struct B2CorKeyVerifier {
    client: Client,
    base_url: String,
}

impl B2CorKeyVerifier {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            base_url,
        })
    }
}

#[async_trait]
impl TokenVerifier for B2CorKeyVerifier {
    async fn check(&self, secret: &str) -> Result<bool, AppError> {
        let url = format!("{}/me", self.base_url);
        tracing::debug!("Verifying B2Cor API key at {}", url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", secret))
            .send()
            .await
            .map_err(|e| AppError::ExternalApi(format!("B2Cor request failed: {}", e)))?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            _ => {
                let (status, text) = error_text(response).await;
                Err(AppError::ExternalApi(format!(
                    "B2Cor returned {}: {}",
                    status, text
                )))
            }
        }
    }
}

/// Defaults applied by the optional per-lead side effects.
#[derive(Debug, Clone, Default)]
pub struct B2CorDefaults {
    pub funnel_id: Option<String>,
    pub owner_id: Option<String>,
    pub history_text: String,
}

/// Client for writing leads into the B2Cor CRM.
#[derive(Clone)]
pub struct B2CorClient {
    client: Client,
    base_url: String,
    api_key: Secret,
    defaults: B2CorDefaults,
    delivered: Arc<DeliveryLedger>,
}

impl B2CorClient {
    pub fn new(
        base_url: String,
        api_key: Secret,
        defaults: B2CorDefaults,
        delivered: Arc<DeliveryLedger>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            base_url,
            api_key,
            defaults,
            delivered,
        })
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &Value,
    ) -> Result<Value, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApi(format!("B2Cor request to {} failed: {}", path, e)))?;

        if !response.status().is_success() {
            let (status, text) = error_text(response).await;
            if status == StatusCode::UNAUTHORIZED {
                return Err(AppError::credential(
                    "b2cor",
                    format!("API key rejected on {}: {}", path, text),
                ));
            }
            return Err(AppError::ExternalApi(format!(
                "B2Cor {} returned {}: {}",
                path, status, text
            )));
        }

        // Some endpoints answer 204 with no body.
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            AppError::ExternalApi(format!("Failed to parse B2Cor response from {}: {}", path, e))
        })
    }

    /// Creates the lead and returns its CRM id.
    pub async fn create_lead(&self, lead: &LeadRecord, contact: &Contact) -> Result<String, AppError> {
        let mut attributes = serde_json::Map::new();
        attributes.insert(
            "name".to_string(),
            json!(lead.get_name().unwrap_or_else(|| "Lead Facebook Ads".to_string())),
        );
        attributes.insert("source".to_string(), json!("Facebook Ads"));
        attributes.insert("external_id".to_string(), json!(lead.id));
        if let Some(email) = &contact.email {
            attributes.insert("email".to_string(), json!(email));
        }
        if let Some(phone) = &contact.phone {
            attributes.insert("phone".to_string(), json!(phone));
        }
        if let Some(city) = lead.get_city() {
            attributes.insert("city".to_string(), json!(city));
        }
        if let Some(campaign) = &lead.campaign_name {
            attributes.insert("campaign".to_string(), json!(campaign));
        }

        let response = self
            .send_json(reqwest::Method::POST, "/leads", &Value::Object(attributes))
            .await?;

        extract_id(&response).ok_or_else(|| {
            tracing::warn!("Unexpected B2Cor response format: {:?}", response);
            AppError::ExternalApi("Lead creation response missing 'id' field".to_string())
        })
    }

    pub async fn add_to_funnel(&self, crm_id: &str) -> Result<(), AppError> {
        let funnel_id = self.defaults.funnel_id.as_deref().ok_or_else(|| {
            AppError::Configuration("B2COR_FUNNEL_ID is not set".to_string())
        })?;
        let body = json!({ "funnel_id": funnel_id });
        self.send_json(reqwest::Method::POST, &format!("/leads/{}/funnel", crm_id), &body)
            .await
            .map(|_| ())
    }

    pub async fn change_owner(&self, crm_id: &str) -> Result<(), AppError> {
        let owner_id = self.defaults.owner_id.as_deref().ok_or_else(|| {
            AppError::Configuration("B2COR_OWNER_ID is not set".to_string())
        })?;
        let body = json!({ "user_id": owner_id });
        self.send_json(reqwest::Method::PUT, &format!("/leads/{}/owner", crm_id), &body)
            .await
            .map(|_| ())
    }

    pub async fn add_history(&self, crm_id: &str, lead: &LeadRecord) -> Result<(), AppError> {
        let body = json!({
            "title": self.defaults.history_text,
            "description": lead.format_description(),
        });
        self.send_json(reqwest::Method::POST, &format!("/leads/{}/history", crm_id), &body)
            .await
            .map(|_| ())
    }
}

/// Reads the created id from the shapes B2Cor has been seen to return.
fn extract_id(response: &Value) -> Option<String> {
    let candidates = [
        response.get("data").and_then(|d| d.get("id")),
        response.get("id"),
        response.get("lead_id"),
    ];
    candidates.into_iter().flatten().find_map(|value| match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[async_trait]
impl LeadSink for B2CorClient {
    async fn deliver(
        &self,
        lead: &LeadRecord,
        options: DeliveryOptions,
    ) -> Result<DeliveryStatus, AppError> {
        if let Some(entry) = self.delivered.get(&lead.id) {
            return Ok(DeliveryStatus::Skipped {
                reason: format!("already delivered as {}", entry.crm_id),
            });
        }

        let contact = Contact::from_raw(lead.get_email().as_deref(), lead.get_phone().as_deref());
        if !contact.is_reachable() {
            return Ok(DeliveryStatus::Skipped {
                reason: "no valid e-mail or phone".to_string(),
            });
        }

        let crm_id = self.create_lead(lead, &contact).await?;
        // Remember the id as soon as the record exists, even if a follow-up step fails.
        if let Err(e) = self.delivered.record(&lead.id, &crm_id) {
            tracing::warn!(lead_id = %lead.id, error = %e, "Failed to persist delivery ledger");
        }
        tracing::info!("✓ Lead {} created in B2Cor as {}", lead.id, crm_id);

        let follow_up = async {
            if options.add_to_funnel {
                if self.defaults.funnel_id.is_some() {
                    self.add_to_funnel(&crm_id).await?;
                } else {
                    tracing::warn!(lead_id = %lead.id, "No funnel id configured, skipping funnel assignment");
                }
            }
            if options.change_owner {
                if self.defaults.owner_id.is_some() {
                    self.change_owner(&crm_id).await?;
                } else {
                    tracing::warn!(lead_id = %lead.id, "No owner id configured, skipping owner change");
                }
            }
            if options.add_history {
                self.add_history(&crm_id, lead).await?;
            }
            Ok::<(), AppError>(())
        };

        follow_up.await.map_err(|e| AppError::Delivery {
            lead_id: lead.id.clone(),
            message: format!("created as {} but follow-up failed: {}", crm_id, e),
        })?;

        Ok(DeliveryStatus::Delivered { crm_id })
    }
}
