//! End-to-end WhatsApp delivery through the real Meta sender
//!
//! The Graph API is replaced by a mock server via the `base_url` setting.

use std::sync::Arc;
use std::time::Duration;

use admitflow::models::{Channel, ChannelOutcome, DeliveryStatus, ErrorClass};
use admitflow::services::{NotificationDispatcher, SenderRegistry};
use admitflow::store::{MemoryStore, RecordStore};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{new_enquiry, notification_config, save_provider};

async fn setup(server: &MockServer) -> (Arc<MemoryStore>, NotificationDispatcher) {
    let store = Arc::new(MemoryStore::new());
    let uri = server.uri();
    save_provider(
        store.as_ref(),
        1,
        Channel::Whatsapp,
        "meta",
        &[
            ("access_token", "EAAG-token"),
            ("phone_number_id", "1055"),
            ("template_name", "admission_confirmation"),
            ("institution_name", "Green Valley School"),
            ("base_url", uri.as_str()),
        ],
    )
    .await;

    let mut config = notification_config();
    config.enabled_channels = vec![Channel::Whatsapp];
    config.backoff_base = Duration::from_millis(5);
    config.backoff_max = Duration::from_millis(20);

    let senders = SenderRegistry::with_defaults(Duration::from_secs(5));
    let dispatcher = NotificationDispatcher::new(store.clone(), senders, &config);
    (store, dispatcher)
}

#[tokio::test]
async fn test_template_message_is_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v21.0/1055/messages"))
        .and(header("Authorization", "Bearer EAAG-token"))
        .and(body_partial_json(json!({
            "messaging_product": "whatsapp",
            "to": "919876543210",
            "type": "template",
            "template": {
                "name": "admission_confirmation",
                "language": { "code": "en" }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messaging_product": "whatsapp",
            "contacts": [{ "input": "919876543210", "wa_id": "919876543210" }],
            "messages": [{ "id": "wamid.123" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (store, dispatcher) = setup(&server).await;
    let enquiry = store
        .create_enquiry(new_enquiry(1, "ENQ2025001"))
        .await
        .unwrap();

    let report = dispatcher.dispatch(enquiry.id).await.unwrap();
    assert_eq!(
        report[&Channel::Whatsapp],
        ChannelOutcome::Sent {
            provider: "meta".to_string(),
            message_id: Some("wamid.123".to_string()),
            attempts: 1,
        }
    );

    let stored = store.get_enquiry(enquiry.id).await.unwrap();
    assert!(stored.whatsapp_sent);
    assert!(!stored.email_sent);

    let log = store.list_delivery_log(enquiry.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, DeliveryStatus::Sent);
    assert_eq!(log[0].provider_message_id.as_deref(), Some("wamid.123"));
    assert_eq!(log[0].http_status, Some(200));
}

#[tokio::test]
async fn test_invalid_phone_fails_without_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (store, dispatcher) = setup(&server).await;
    let mut input = new_enquiry(1, "ENQ2025002");
    input.fields.insert("phone".to_string(), "12ab".to_string());
    let enquiry = store.create_enquiry(input).await.unwrap();

    let report = dispatcher.dispatch(enquiry.id).await.unwrap();
    match &report[&Channel::Whatsapp] {
        ChannelOutcome::Failed { error, attempts, .. } => {
            assert_eq!(error.class, ErrorClass::Validation);
            assert_eq!(*attempts, 1);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!store.get_enquiry(enquiry.id).await.unwrap().whatsapp_sent);
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "message": "(#130429) Rate limit hit", "code": 130429 }
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "messages": [{ "id": "wamid.456" }] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (store, dispatcher) = setup(&server).await;
    let enquiry = store
        .create_enquiry(new_enquiry(1, "ENQ2025003"))
        .await
        .unwrap();

    let report = dispatcher.dispatch(enquiry.id).await.unwrap();
    let outcome = &report[&Channel::Whatsapp];
    assert!(outcome.is_sent());
    assert_eq!(outcome.attempts(), 2);

    let log = store.list_delivery_log(enquiry.id).await.unwrap();
    assert_eq!(log[0].error_class, Some(ErrorClass::Transient));
    assert_eq!(log[0].http_status, Some(429));
}
