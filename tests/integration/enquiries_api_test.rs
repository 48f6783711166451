//! Integration tests for the Enquiries API
//!
//! Runs the full route set over the in-memory store with scripted senders.

use actix_web::{test, App};
use admitflow::models::{Channel, ErrorClass};
use admitflow::services::SenderRegistry;
use admitflow::store::RecordStore;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::common::{bearer, configure_all_channels, new_enquiry, MockSender, Reply, TestApp};

fn scripted_senders() -> SenderRegistry {
    SenderRegistry::new()
        .register(
            Channel::Email,
            "zeptomail",
            MockSender::new(Channel::Email, "zeptomail", Reply::Sent("zepto-1")).arc(),
        )
        .register(
            Channel::Whatsapp,
            "meta",
            MockSender::new(Channel::Whatsapp, "meta", Reply::Sent("wamid.123")).arc(),
        )
        .register(
            Channel::Sms,
            "msg91",
            MockSender::new(Channel::Sms, "msg91", Reply::Fail(ErrorClass::Permanent)).arc(),
        )
}

// =============================================================================
// Authentication
// =============================================================================

#[actix_web::test]
async fn test_missing_token_is_rejected() {
    let state = TestApp::new(SenderRegistry::new());
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::get().uri("/api/enquiries/1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "Unauthorized");
}

#[actix_web::test]
async fn test_wrong_token_is_rejected() {
    let state = TestApp::new(SenderRegistry::new());
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::get()
        .uri("/api/enquiries/1")
        .insert_header(("Authorization", "Bearer not-the-token"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn test_api_disabled_without_configured_token() {
    let state = TestApp::new(SenderRegistry::new()).without_token();
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::get()
        .uri("/api/enquiries/1")
        .insert_header(bearer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

// =============================================================================
// Create / Get / Status
// =============================================================================

#[actix_web::test]
async fn test_create_and_get_enquiry() {
    let state = TestApp::new(SenderRegistry::new());
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::post()
        .uri("/api/enquiries")
        .insert_header(bearer())
        .set_json(json!({
            "site_id": 1,
            "enquiry_number": "ENQ2025001",
            "fields": { "parent_name": "Asha", "phone": "9876543210" },
            "attribution": { "utm_source": "google" }
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["enquiry_number"], "ENQ2025001");
    assert_eq!(created["status"], "pending");
    assert_eq!(created["fields"]["parent_name"], "Asha");
    assert_eq!(created["email_sent"], false);

    let id = created["id"].as_i64().unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/api/enquiries/{}", id))
        .insert_header(bearer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let fetched: Value = test::read_body_json(resp).await;
    assert_eq!(fetched["id"], id);
    assert_eq!(fetched["attribution"]["utm_source"], "google");
}

#[actix_web::test]
async fn test_create_rejects_blank_enquiry_number() {
    let state = TestApp::new(SenderRegistry::new());
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::post()
        .uri("/api/enquiries")
        .insert_header(bearer())
        .set_json(json!({ "site_id": 1, "enquiry_number": "  " }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_duplicate_enquiry_number_is_a_conflict() {
    let state = TestApp::new(SenderRegistry::new());
    state
        .store
        .create_enquiry(new_enquiry(1, "ENQ2025001"))
        .await
        .unwrap();
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::post()
        .uri("/api/enquiries")
        .insert_header(bearer())
        .set_json(json!({ "site_id": 1, "enquiry_number": "ENQ2025001" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "Conflict");
}

#[actix_web::test]
async fn test_get_unknown_enquiry_is_not_found() {
    let state = TestApp::new(SenderRegistry::new());
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::get()
        .uri("/api/enquiries/999")
        .insert_header(bearer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "NotFound");
}

#[actix_web::test]
async fn test_update_status() {
    let state = TestApp::new(SenderRegistry::new());
    let enquiry = state
        .store
        .create_enquiry(new_enquiry(1, "ENQ2025001"))
        .await
        .unwrap();
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::patch()
        .uri(&format!("/api/enquiries/{}/status", enquiry.id))
        .insert_header(bearer())
        .set_json(json!({ "status": "contacted" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "contacted");
}

// =============================================================================
// Dispatch and Delivery Log
// =============================================================================

#[actix_web::test]
async fn test_dispatch_reports_each_channel() {
    let state = TestApp::new(scripted_senders());
    configure_all_channels(state.store.as_ref(), 1).await;
    let enquiry = state
        .store
        .create_enquiry(new_enquiry(1, "ENQ2025001"))
        .await
        .unwrap();
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::post()
        .uri(&format!("/api/enquiries/{}/dispatch", enquiry.id))
        .insert_header(bearer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["enquiry_id"], enquiry.id);

    let outcomes = &body["outcomes"];
    assert_eq!(outcomes["whatsapp"]["state"], "sent");
    assert_eq!(outcomes["whatsapp"]["message_id"], "wamid.123");
    assert_eq!(outcomes["email"]["state"], "sent");
    assert_eq!(outcomes["sms"]["state"], "failed");
    assert_eq!(outcomes["sms"]["error"]["class"], "permanent");
    assert_eq!(outcomes["sms"]["attempts"], 1);

    // A second dispatch skips what was sent and retries nothing already final
    let req = test::TestRequest::post()
        .uri(&format!("/api/enquiries/{}/dispatch", enquiry.id))
        .insert_header(bearer())
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["outcomes"]["whatsapp"]["state"], "skipped");
    assert_eq!(body["outcomes"]["whatsapp"]["reason"], "already_sent");

    let req = test::TestRequest::get()
        .uri(&format!("/api/enquiries/{}/deliveries", enquiry.id))
        .insert_header(bearer())
        .to_request();
    let log: Vec<Value> = test::call_and_read_body_json(&app, req).await;

    // email + whatsapp once, sms once per dispatch
    assert_eq!(log.len(), 4);
    assert!(log
        .iter()
        .any(|e| e["channel"] == "whatsapp" && e["provider_message_id"] == "wamid.123"));
}

#[actix_web::test]
async fn test_dispatch_unknown_enquiry_is_not_found() {
    let state = TestApp::new(scripted_senders());
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::post()
        .uri("/api/enquiries/42/dispatch")
        .insert_header(bearer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn test_deliveries_for_unknown_enquiry_is_not_found() {
    let state = TestApp::new(SenderRegistry::new());
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::get()
        .uri("/api/enquiries/42/deliveries")
        .insert_header(bearer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

// =============================================================================
// MCB Sync
// =============================================================================

#[actix_web::test]
async fn test_sync_without_mcb_config_logs_failure() {
    let state = TestApp::new(SenderRegistry::new());
    let enquiry = state
        .store
        .create_enquiry(new_enquiry(1, "ENQ2025001"))
        .await
        .unwrap();
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::post()
        .uri(&format!("/api/enquiries/{}/sync", enquiry.id))
        .insert_header(bearer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let entry: Value = test::read_body_json(resp).await;
    assert_eq!(entry["success"], false);
    assert_eq!(entry["error_message"], "MCB sync is not configured");

    let req = test::TestRequest::get()
        .uri(&format!("/api/enquiries/{}/sync-log", enquiry.id))
        .insert_header(bearer())
        .to_request();
    let log: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(log.len(), 1);
}
