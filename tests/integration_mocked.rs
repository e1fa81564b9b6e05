/// Integration tests with mocked external APIs
/// Exercises the Graph API and B2Cor clients without hitting real services
use lead_sync::core::errors::AppError;
use lead_sync::core::extractor::LeadSource;
use lead_sync::core::models::{DeliveryOptions, DeliveryStatus, LeadRecord, Selection};
use lead_sync::core::sender::LeadSink;
use lead_sync::integrations::b2cor_client::{B2CorClient, B2CorDefaults, B2CorKeyVerifier};
use lead_sync::integrations::credentials::{Secret, TokenVerifier};
use lead_sync::integrations::delivery_ledger::DeliveryLedger;
use lead_sync::integrations::facebook_client::{FacebookLeadsClient, FacebookTokenVerifier};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn leads_client(server: &MockServer, page_id: Option<&str>) -> FacebookLeadsClient {
    FacebookLeadsClient::new(
        server.uri(),
        Secret::new("fb-token"),
        page_id.map(str::to_string),
        TIMEOUT,
    )
    .unwrap()
}

fn configured_defaults() -> B2CorDefaults {
    B2CorDefaults {
        funnel_id: Some("funnel-1".to_string()),
        owner_id: Some("owner-9".to_string()),
        history_text: "Lead importado do Facebook Ads".to_string(),
    }
}

fn b2cor_client_with(
    server: &MockServer,
    defaults: B2CorDefaults,
    ledger: DeliveryLedger,
) -> B2CorClient {
    B2CorClient::new(
        server.uri(),
        Secret::new("crm-key"),
        defaults,
        Arc::new(ledger),
        TIMEOUT,
    )
    .unwrap()
}

fn b2cor_client(server: &MockServer) -> B2CorClient {
    b2cor_client_with(server, configured_defaults(), DeliveryLedger::in_memory(None))
}

fn ledger_at(path: &Path) -> DeliveryLedger {
    DeliveryLedger::open(path, DeliveryLedger::retention_for(30))
}

fn reachable_lead(id: &str) -> LeadRecord {
    LeadRecord::new(
        id,
        &[
            ("full_name", "João Silva"),
            ("email", "joao@example.com"),
            ("phone_number", "+5511987654321"),
        ],
    )
}

#[tokio::test]
async fn test_facebook_token_verification() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .and(query_param("access_token", "good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(query_param("access_token", "expired"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {"type": "OAuthException", "message": "Session has expired"}
        })))
        .mount(&server)
        .await;

    let verifier = FacebookTokenVerifier::new(server.uri(), None, None, TIMEOUT).unwrap();
    assert!(verifier.check("good").await.unwrap());
    assert!(!verifier.check("expired").await.unwrap());
}

#[tokio::test]
async fn test_facebook_short_token_exchanged_when_app_configured() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/oauth/access_token"))
        .and(query_param("grant_type", "fb_exchange_token"))
        .and(query_param("fb_exchange_token", "short"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "long-lived",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let verifier = FacebookTokenVerifier::new(
        server.uri(),
        Some("app".to_string()),
        Some("secret".to_string()),
        TIMEOUT,
    )
    .unwrap();
    assert_eq!(verifier.finalize("short".to_string()).await.unwrap(), "long-lived");

    let without_app = FacebookTokenVerifier::new(server.uri(), None, None, TIMEOUT).unwrap();
    assert_eq!(without_app.finalize("short".to_string()).await.unwrap(), "short");
}

#[tokio::test]
async fn test_facebook_leads_follow_pagination() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/777/leads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {"id": "L1", "form_id": "777", "field_data": [{"name": "email", "values": ["a@example.com"]}]},
                {"id": "L2", "form_id": "777", "field_data": []}
            ],
            "paging": {"next": format!("{}/777/leads-page-2", server.uri())}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/777/leads-page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"id": "L3", "form_id": "777", "field_data": []}]
        })))
        .mount(&server)
        .await;

    let client = leads_client(&server, None);
    let selection = Selection::new(vec!["777".to_string()], vec![]);
    let leads = client.fetch_leads(&selection, 30).await.unwrap();

    let ids: Vec<&str> = leads.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["L1", "L2", "L3"]);
}

#[tokio::test]
async fn test_facebook_same_lead_from_form_and_ad_is_deduplicated() {
    let server = MockServer::start().await;
    let body = serde_json::json!({"data": [{"id": "L1", "field_data": []}]});

    Mock::given(method("GET"))
        .and(path("/777/leads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/555/leads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let client = leads_client(&server, None);
    let selection = Selection::new(vec!["777".to_string()], vec!["555".to_string()]);
    let leads = client.fetch_leads(&selection, 0).await.unwrap();
    assert_eq!(leads.len(), 1);
}

#[tokio::test]
async fn test_facebook_lists_page_forms() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/page-1/leadgen_forms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {"id": "F1", "name": "Contato", "status": "ACTIVE"},
                {"id": "F2", "name": "Orçamento", "status": "ARCHIVED"}
            ]
        })))
        .mount(&server)
        .await;

    let forms = leads_client(&server, Some("page-1")).list_forms().await.unwrap();
    assert_eq!(forms.len(), 2);
    assert_eq!(forms[1].name.as_deref(), Some("Orçamento"));
}

#[tokio::test]
async fn test_facebook_revoked_token_is_credential_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/777/leads"))
        .respond_with(ResponseTemplate::new(401).set_body_string("revoked"))
        .mount(&server)
        .await;

    let client = leads_client(&server, None);
    let selection = Selection::new(vec!["777".to_string()], vec![]);
    let err = client.fetch_leads(&selection, 30).await.unwrap_err();
    assert!(matches!(err, AppError::Credential { which: "facebook", .. }));
}

#[tokio::test]
async fn test_b2cor_key_verification() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("Authorization", "Bearer valid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("Authorization", "Bearer wrong"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let verifier = B2CorKeyVerifier::new(server.uri(), TIMEOUT).unwrap();
    assert!(verifier.check("valid").await.unwrap());
    assert!(!verifier.check("wrong").await.unwrap());
}

#[tokio::test]
async fn test_b2cor_creates_lead_and_applies_follow_ups() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/leads"))
        .and(header("Authorization", "Bearer crm-key"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"data": {"id": "crm-42"}})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/leads/crm-42/funnel"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/leads/crm-42/owner"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/leads/crm-42/history"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = b2cor_client(&server);
    let status = client
        .deliver(&reachable_lead("L1"), DeliveryOptions::default())
        .await
        .unwrap();
    assert_eq!(
        status,
        DeliveryStatus::Delivered {
            crm_id: "crm-42".to_string()
        }
    );
}

#[tokio::test]
async fn test_b2cor_disabled_side_effects_are_not_called() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/leads"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 7})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/leads/7/funnel"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/leads/7/history"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let options = DeliveryOptions {
        add_to_funnel: false,
        change_owner: false,
        add_history: false,
    };
    let status = b2cor_client(&server)
        .deliver(&reachable_lead("L1"), options)
        .await
        .unwrap();
    assert_eq!(status, DeliveryStatus::Delivered { crm_id: "7".to_string() });
}

#[tokio::test]
async fn test_b2cor_redelivery_is_skipped() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/leads"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "crm-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = b2cor_client(&server);
    let options = DeliveryOptions {
        add_to_funnel: false,
        change_owner: false,
        add_history: false,
    };
    let lead = reachable_lead("L1");

    let first = client.deliver(&lead, options).await.unwrap();
    let second = client.deliver(&lead, options).await.unwrap();
    assert!(matches!(first, DeliveryStatus::Delivered { .. }));
    assert!(matches!(second, DeliveryStatus::Skipped { .. }));
}

#[tokio::test]
async fn test_b2cor_delivered_lead_is_not_recreated_after_restart() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/leads"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "crm-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("b2cor_delivered.json");
    let options = DeliveryOptions {
        add_to_funnel: false,
        change_owner: false,
        add_history: false,
    };
    let lead = reachable_lead("L1");

    let first_run = b2cor_client_with(&server, configured_defaults(), ledger_at(&ledger_path));
    let first = first_run.deliver(&lead, options).await.unwrap();
    drop(first_run);

    let second_run = b2cor_client_with(&server, configured_defaults(), ledger_at(&ledger_path));
    let second = second_run.deliver(&lead, options).await.unwrap();

    assert!(matches!(first, DeliveryStatus::Delivered { .. }));
    assert_eq!(
        second,
        DeliveryStatus::Skipped {
            reason: "already delivered as crm-1".to_string()
        }
    );
}

#[tokio::test]
async fn test_b2cor_unset_funnel_and_owner_are_skipped() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/leads"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "crm-3"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/leads/crm-3/funnel"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/leads/crm-3/owner"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/leads/crm-3/history"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let defaults = B2CorDefaults {
        funnel_id: None,
        owner_id: None,
        history_text: "Lead importado do Facebook Ads".to_string(),
    };
    let client = b2cor_client_with(&server, defaults, DeliveryLedger::in_memory(None));
    let status = client
        .deliver(&reachable_lead("L3"), DeliveryOptions::default())
        .await
        .unwrap();
    assert_eq!(status, DeliveryStatus::Delivered { crm_id: "crm-3".to_string() });
}

#[tokio::test]
async fn test_b2cor_follow_up_failure_is_delivery_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/leads"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "crm-5"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/leads/crm-5/funnel"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = b2cor_client(&server)
        .deliver(&reachable_lead("L9"), DeliveryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Delivery { ref lead_id, .. } if lead_id == "L9"));
}

#[tokio::test]
async fn test_b2cor_rejected_key_is_credential_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/leads"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .mount(&server)
        .await;

    let err = b2cor_client(&server)
        .deliver(&reachable_lead("L1"), DeliveryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Credential { which: "b2cor", .. }));
}
