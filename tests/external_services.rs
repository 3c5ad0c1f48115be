//! Integration tests for the outbound HTTP clients, against wiremock.
//!
//! These tests verify:
//! 1. The Appwrite store speaks the REST contract (paths, headers, queries, bodies)
//! 2. Webhook deliveries are signed and retried
//! 3. The budget sweeper notifies webhook targets when it switches ads off

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param_contains};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vecivendo_ads::jobs::budget_sweeper::BudgetSweeper;
use vecivendo_ads::middleware::metrics::AdsMetrics;
use vecivendo_ads::models::collections;
use vecivendo_ads::notification::webhook::{WebhookEvent, WebhookNotifier};
use vecivendo_ads::store::appwrite::{AppwriteSettings, AppwriteStore};
use vecivendo_ads::store::memory::MemoryStore;
use vecivendo_ads::store::{DocumentStore, Query, StoreError};

mod appwrite_store_tests {
    use super::*;

    const DOCS: &str = "/v1/databases/vecivendo/collections/anuncios_pago/documents";

    fn store(server: &MockServer) -> AppwriteStore {
        AppwriteStore::new(&AppwriteSettings {
            endpoint: format!("{}/v1", server.uri()),
            project_id: "proj".into(),
            api_key: "secret-key".into(),
            database_id: "vecivendo".into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_sends_queries_and_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DOCS))
            .and(header("x-appwrite-project", "proj"))
            .and(header("x-appwrite-key", "secret-key"))
            .and(query_param_contains("queries[]", r#""method":"equal""#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 1,
                "documents": [{ "$id": "ad1", "creditos": 10 }],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let list = store(&server)
            .list(collections::PAID_ADS, &[Query::equal("active", true)])
            .await
            .unwrap();
        assert_eq!(list.total, 1);
        assert_eq!(list.documents[0]["$id"], "ad1");
    }

    #[tokio::test]
    async fn test_get_missing_document_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/ghost", DOCS)))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "Document with the requested ID could not be found.",
                "code": 404,
            })))
            .mount(&server)
            .await;

        let err = store(&server)
            .get(collections::PAID_ADS, "ghost")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_and_update_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DOCS))
            .and(body_partial_json(json!({ "documentId": "new1", "data": { "titulo": "x" } })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "$id": "new1", "titulo": "x" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(format!("{}/new1", DOCS)))
            .and(body_partial_json(json!({ "data": { "active": false } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "$id": "new1", "active": false })))
            .expect(1)
            .mount(&server)
            .await;

        let s = store(&server);
        let created = s
            .create(collections::PAID_ADS, "new1", json!({ "titulo": "x" }))
            .await
            .unwrap();
        assert_eq!(created["$id"], "new1");
        let updated = s
            .update(collections::PAID_ADS, "new1", json!({ "active": false }))
            .await
            .unwrap();
        assert_eq!(updated["active"], false);
    }

    #[tokio::test]
    async fn test_rejection_carries_store_message() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(format!("{}/ad1", DOCS)))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "message": "Invalid document structure: Unknown attribute: \"foo\"",
                "code": 400,
            })))
            .mount(&server)
            .await;

        let err = store(&server)
            .update(collections::PAID_ADS, "ad1", json!({ "foo": 1 }))
            .await
            .unwrap_err();
        match err {
            StoreError::Rejected { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("Unknown attribute"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

mod webhook_tests {
    use super::*;

    #[tokio::test]
    async fn test_delivery_is_signed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks"))
            .and(header("x-vecivendo-event", "ad_deactivated"))
            .and(header_exists("x-vecivendo-delivery-id"))
            .and(header_exists("x-vecivendo-signature"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(vec![], Some("whsec".into()));
        let event = WebhookEvent::ad_deactivated("ad1", "credits_exhausted", 0.0);
        notifier
            .send(&format!("{}/hooks", server.uri()), &event)
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        let req = &received[0];
        let mut mac = Hmac::<Sha256>::new_from_slice(b"whsec").unwrap();
        mac.update(&req.body);
        let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        assert_eq!(
            req.headers.get("x-vecivendo-signature").unwrap().to_str().unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn test_failed_delivery_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(vec![], None)
            .with_backoff(vec![Duration::ZERO, Duration::from_millis(10)]);
        let event = WebhookEvent::campaign_expired("ad1", "2026-01-01T00:00:00.000Z");
        notifier
            .send(&format!("{}/flaky", server.uri()), &event)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_notifies_each_target() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/a"))
            .and(header("x-vecivendo-event", "ad_deactivated"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/b"))
            .and(header("x-vecivendo-event", "ad_deactivated"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.insert(
            collections::PAID_ADS,
            json!({ "$id": "broke", "active": true, "creditos": 0 }),
        );
        let notifier = WebhookNotifier::new(
            vec![format!("{}/a", server.uri()), format!("{}/b", server.uri())],
            None,
        );
        let sweeper = BudgetSweeper::new(store, notifier, Arc::new(AdsMetrics::new().unwrap()));
        let report = sweeper.run_once(chrono::Utc::now()).await.unwrap();
        assert_eq!(report.exhausted, 1);
    }
}
