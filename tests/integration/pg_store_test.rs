//! PostgreSQL record store tests against a real database container
//!
//! Run with `--ignored` on a machine with Docker.

use std::sync::Arc;
use std::time::Duration;

use admitflow::error::AppError;
use admitflow::models::{
    Channel, DeliveryResult, EnquiryStatus, NewDeliveryLogEntry, NewSyncLogEntry,
    SaveProviderConfig, SyncStatus,
};
use admitflow::store::{ClaimScope, PgStore, RecordStore};
use pretty_assertions::assert_eq;

use crate::common::{new_enquiry, settings, TestDb};

async fn store() -> (TestDb, Arc<PgStore>) {
    let db = TestDb::new().await;
    let store = Arc::new(PgStore::new(db.pool.clone()));
    (db, store)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_enquiry_lifecycle() {
    let (_db, store) = store().await;

    let enquiry = store
        .create_enquiry(new_enquiry(1, "ENQ2025001"))
        .await
        .unwrap();
    assert_eq!(enquiry.status, EnquiryStatus::Pending);
    assert_eq!(enquiry.fields.get("parent_name").map(String::as_str), Some("Asha"));
    assert_eq!(enquiry.sync_status, None);

    let duplicate = store.create_enquiry(new_enquiry(1, "ENQ2025001")).await;
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));

    let updated = store
        .update_status(enquiry.id, EnquiryStatus::Converted)
        .await
        .unwrap();
    assert_eq!(updated.status, EnquiryStatus::Converted);

    assert!(matches!(
        store.get_enquiry(enquiry.id + 100).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_delivery_flags_are_independent_and_monotonic() {
    let (_db, store) = store().await;
    let enquiry = store
        .create_enquiry(new_enquiry(1, "ENQ2025001"))
        .await
        .unwrap();

    assert!(store
        .update_delivery_flag(enquiry.id, Channel::Whatsapp, true)
        .await
        .unwrap());
    // Already set
    assert!(!store
        .update_delivery_flag(enquiry.id, Channel::Whatsapp, true)
        .await
        .unwrap());
    // Never cleared
    assert!(!store
        .update_delivery_flag(enquiry.id, Channel::Whatsapp, false)
        .await
        .unwrap());

    let stored = store.get_enquiry(enquiry.id).await.unwrap();
    assert!(stored.whatsapp_sent);
    assert!(!stored.email_sent);
    assert!(!stored.sms_sent);
    assert!(store.delivery_flag(enquiry.id, Channel::Whatsapp).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_claims_are_exclusive_per_scope() {
    let (_db, store) = store().await;
    let lease = Duration::from_secs(60);
    let email = ClaimScope::Delivery(Channel::Email);

    let held = store.claim(7, email, lease).await.unwrap().unwrap();
    assert!(store.claim(7, email, lease).await.unwrap().is_none());

    // Another channel of the same enquiry is not blocked
    assert!(store
        .claim(7, ClaimScope::Delivery(Channel::Sms), lease)
        .await
        .unwrap()
        .is_some());

    store.release(&held).await.unwrap();
    assert!(store.claim(7, email, lease).await.unwrap().is_some());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_expired_claim_can_be_taken_over() {
    let (_db, store) = store().await;

    let stale = store
        .claim(7, ClaimScope::Sync, Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let current = store
        .claim(7, ClaimScope::Sync, Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    assert!(current.expires_at > stale.expires_at);

    // The old holder cannot release the new claim
    store.release(&stale).await.unwrap();
    assert!(store
        .claim(7, ClaimScope::Sync, Duration::from_secs(60))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_claims_do_not_hold_pool_connections() {
    let (db, store) = store().await;
    let max = db.pool.options().get_max_connections() as i64;

    // More outstanding claims than the pool has connections
    let mut claims = Vec::new();
    for id in 0..(max * 2) {
        for channel in Channel::ALL {
            let claim = store
                .claim(id, ClaimScope::Delivery(channel), Duration::from_secs(60))
                .await
                .unwrap()
                .unwrap();
            claims.push(claim);
        }
    }

    // Flag and log operations still get a connection while the claims are out
    let enquiry = store
        .create_enquiry(new_enquiry(1, "ENQ2025001"))
        .await
        .unwrap();
    assert!(!store.delivery_flag(enquiry.id, Channel::Email).await.unwrap());

    for claim in &claims {
        store.release(claim).await.unwrap();
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_provider_config_activation() {
    let (_db, store) = store().await;

    for provider in ["sendgrid", "zeptomail"] {
        store
            .save_provider_config(
                1,
                Channel::Email,
                SaveProviderConfig {
                    provider: provider.to_string(),
                    settings: settings(&[("api_key", "k"), ("from_address", "a@school.in")]),
                    is_active: true,
                },
            )
            .await
            .unwrap();
    }

    let active = store
        .active_provider_config(1, Channel::Email)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.provider, "zeptomail");
    assert_eq!(active.setting("api_key"), Some("k"));

    store
        .save_provider_config(
            1,
            Channel::Email,
            SaveProviderConfig {
                provider: "zeptomail".to_string(),
                settings: Default::default(),
                is_active: false,
            },
        )
        .await
        .unwrap();

    assert!(store
        .active_provider_config(1, Channel::Email)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_legacy_settings_and_logs() {
    let (_db, store) = store().await;

    store.set_legacy_setting(1, "sms_api_key", "a").await.unwrap();
    store.set_legacy_setting(1, "sms_api_key", "b").await.unwrap();
    store.set_legacy_setting(1, "email_api_key", "c").await.unwrap();

    let sms = store.legacy_settings(1, "sms_").await.unwrap();
    assert_eq!(sms, settings(&[("api_key", "b")]));

    let enquiry = store
        .create_enquiry(new_enquiry(1, "ENQ2025001"))
        .await
        .unwrap();

    let result = DeliveryResult::sent(Channel::Email, "zeptomail", Some("req-1".to_string()))
        .with_status(201);
    store
        .append_delivery_log(NewDeliveryLogEntry::from_result(enquiry.id, 1, &result))
        .await
        .unwrap();
    let deliveries = store.list_delivery_log(enquiry.id).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].provider_message_id.as_deref(), Some("req-1"));
    assert_eq!(deliveries[0].http_status, Some(201));

    store
        .append_sync_log(NewSyncLogEntry {
            enquiry_id: enquiry.id,
            success: true,
            external_id: Some("MCB-1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .update_sync_status(enquiry.id, SyncStatus::Synced, Some("MCB-1"))
        .await
        .unwrap();
    // A later failure keeps the external id
    store
        .update_sync_status(enquiry.id, SyncStatus::Failed, None)
        .await
        .unwrap();

    let stored = store.get_enquiry(enquiry.id).await.unwrap();
    assert_eq!(stored.sync_status, Some(SyncStatus::Failed));
    assert_eq!(stored.external_id.as_deref(), Some("MCB-1"));
    assert_eq!(store.list_sync_log(enquiry.id).await.unwrap().len(), 1);
}
