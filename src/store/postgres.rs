//! PostgreSQL record store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{Claim, ClaimScope, RecordStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    Channel, DeliveryLogEntry, EnquiryRecord, EnquiryStatus, NewDeliveryLogEntry, NewEnquiry,
    NewSyncLogEntry, ProviderConfig, SaveProviderConfig, SyncLogEntry, SyncStatus,
};

const ENQUIRY_COLUMNS: &str = r#"
    id, site_id, enquiry_number, fields, attribution, status,
    email_sent, whatsapp_sent, sms_sent, sync_status, external_id,
    created_at, updated_at
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn ping(&self) -> bool {
        crate::db::health_check(&self.pool).await
    }

    async fn create_enquiry(&self, input: NewEnquiry) -> AppResult<EnquiryRecord> {
        if input.enquiry_number.trim().is_empty() {
            return Err(AppError::Validation(
                "Enquiry number is required".to_string(),
            ));
        }

        let sql = format!(
            r#"
            INSERT INTO enquiries (site_id, enquiry_number, fields, attribution)
            VALUES ($1, $2, $3, $4)
            RETURNING {ENQUIRY_COLUMNS}
            "#
        );

        let enquiry = sqlx::query_as::<_, EnquiryRecord>(&sql)
            .bind(input.site_id)
            .bind(input.enquiry_number.trim())
            .bind(Json(&input.fields))
            .bind(Json(&input.attribution))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(format!(
                        "Enquiry {} already exists for site {}",
                        input.enquiry_number, input.site_id
                    ))
                }
                other => AppError::Database(other),
            })?;

        Ok(enquiry)
    }

    async fn get_enquiry(&self, id: i64) -> AppResult<EnquiryRecord> {
        let sql = format!("SELECT {ENQUIRY_COLUMNS} FROM enquiries WHERE id = $1");

        sqlx::query_as::<_, EnquiryRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Enquiry {} not found", id)))
    }

    async fn update_status(&self, id: i64, status: EnquiryStatus) -> AppResult<EnquiryRecord> {
        let sql = format!(
            r#"
            UPDATE enquiries SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {ENQUIRY_COLUMNS}
            "#
        );

        sqlx::query_as::<_, EnquiryRecord>(&sql)
            .bind(id)
            .bind(status)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Enquiry {} not found", id)))
    }

    async fn delivery_flag(&self, id: i64, channel: Channel) -> AppResult<bool> {
        let sql = format!(
            "SELECT {} FROM enquiries WHERE id = $1",
            channel.flag_column()
        );

        let row: Option<(bool,)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(flag,)| flag)
            .ok_or_else(|| AppError::NotFound(format!("Enquiry {} not found", id)))
    }

    async fn update_delivery_flag(&self, id: i64, channel: Channel, sent: bool) -> AppResult<bool> {
        if !sent {
            return Ok(false);
        }

        // Single-column conditional update; concurrent writes to the other
        // channels' flags are never overwritten.
        let sql = format!(
            "UPDATE enquiries SET {col} = TRUE, updated_at = NOW() WHERE id = $1 AND {col} = FALSE",
            col = channel.flag_column()
        );

        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    /// Takes the claim row with one upsert. A live row blocks the update, so
    /// nothing is returned; an expired one is overwritten.
    async fn claim(
        &self,
        id: i64,
        scope: ClaimScope,
        lease: Duration,
    ) -> AppResult<Option<Claim>> {
        let expires_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            INSERT INTO record_claims (enquiry_id, scope, expires_at)
            VALUES ($1, $2, NOW() + $3 * INTERVAL '1 millisecond')
            ON CONFLICT (enquiry_id, scope) DO UPDATE
                SET expires_at = EXCLUDED.expires_at
                WHERE record_claims.expires_at <= NOW()
            RETURNING expires_at
            "#,
        )
        .bind(id)
        .bind(scope.as_str())
        .bind(lease.as_millis() as f64)
        .fetch_optional(&self.pool)
        .await?;

        if expires_at.is_none() {
            log::debug!("{} claim on enquiry {} is held elsewhere", scope, id);
        }

        Ok(expires_at.map(|expires_at| Claim {
            enquiry_id: id,
            scope,
            expires_at,
        }))
    }

    async fn release(&self, claim: &Claim) -> AppResult<()> {
        sqlx::query(
            "DELETE FROM record_claims WHERE enquiry_id = $1 AND scope = $2 AND expires_at = $3",
        )
        .bind(claim.enquiry_id)
        .bind(claim.scope.as_str())
        .bind(claim.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_sync_status(
        &self,
        id: i64,
        status: SyncStatus,
        external_id: Option<&str>,
    ) -> AppResult<()> {
        // A failed attempt keeps the external id of an earlier success
        let result = sqlx::query(
            r#"
            UPDATE enquiries
            SET sync_status = $2,
                external_id = COALESCE($3, external_id),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Enquiry {} not found", id)));
        }

        Ok(())
    }

    async fn active_provider_config(
        &self,
        site_id: i32,
        channel: Channel,
    ) -> AppResult<Option<ProviderConfig>> {
        let config = sqlx::query_as::<_, ProviderConfig>(
            r#"
            SELECT id, site_id, channel, provider, settings, is_active, updated_at
            FROM provider_configs
            WHERE site_id = $1 AND channel = $2 AND is_active = TRUE
            ORDER BY updated_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(site_id)
        .bind(channel)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    async fn save_provider_config(
        &self,
        site_id: i32,
        channel: Channel,
        input: SaveProviderConfig,
    ) -> AppResult<ProviderConfig> {
        let mut tx = self.pool.begin().await?;

        // Deactivating must hide older active rows too
        if !input.is_active {
            sqlx::query(
                "UPDATE provider_configs SET is_active = FALSE WHERE site_id = $1 AND channel = $2",
            )
            .bind(site_id)
            .bind(channel)
            .execute(&mut *tx)
            .await?;
        }

        let config = sqlx::query_as::<_, ProviderConfig>(
            r#"
            INSERT INTO provider_configs (site_id, channel, provider, settings, is_active)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, site_id, channel, provider, settings, is_active, updated_at
            "#,
        )
        .bind(site_id)
        .bind(channel)
        .bind(input.provider.trim().to_ascii_lowercase())
        .bind(Json(&input.settings))
        .bind(input.is_active)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(config)
    }

    async fn legacy_settings(
        &self,
        site_id: i32,
        prefix: &str,
    ) -> AppResult<BTreeMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM legacy_settings WHERE site_id = $1 AND starts_with(key, $2)",
        )
        .bind(site_id)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(key, value)| (key[prefix.len()..].to_string(), value))
            .collect())
    }

    async fn set_legacy_setting(&self, site_id: i32, key: &str, value: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO legacy_settings (site_id, key, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (site_id, key) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(site_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_delivery_log(
        &self,
        entry: NewDeliveryLogEntry,
    ) -> AppResult<DeliveryLogEntry> {
        let row = sqlx::query_as::<_, DeliveryLogEntry>(
            r#"
            INSERT INTO delivery_log (
                enquiry_id, channel, provider, attempt, status,
                error_class, error_message, provider_message_id, http_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, enquiry_id, channel, provider, attempt, status,
                      error_class, error_message, provider_message_id, http_status,
                      created_at
            "#,
        )
        .bind(entry.enquiry_id)
        .bind(entry.channel)
        .bind(&entry.provider)
        .bind(entry.attempt)
        .bind(entry.status)
        .bind(entry.error_class)
        .bind(&entry.error_message)
        .bind(&entry.provider_message_id)
        .bind(entry.http_status)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_delivery_log(&self, enquiry_id: i64) -> AppResult<Vec<DeliveryLogEntry>> {
        let rows = sqlx::query_as::<_, DeliveryLogEntry>(
            r#"
            SELECT id, enquiry_id, channel, provider, attempt, status,
                   error_class, error_message, provider_message_id, http_status,
                   created_at
            FROM delivery_log
            WHERE enquiry_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(enquiry_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn append_sync_log(&self, entry: NewSyncLogEntry) -> AppResult<SyncLogEntry> {
        let row = sqlx::query_as::<_, SyncLogEntry>(
            r#"
            INSERT INTO sync_log (
                enquiry_id, success, error_message, retry_count,
                request_payload, response_payload, http_status, external_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, enquiry_id, success, error_message, retry_count,
                      request_payload, response_payload, http_status, external_id,
                      created_at
            "#,
        )
        .bind(entry.enquiry_id)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(entry.retry_count)
        .bind(&entry.request_payload)
        .bind(&entry.response_payload)
        .bind(entry.http_status)
        .bind(&entry.external_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_sync_log(&self, enquiry_id: i64) -> AppResult<Vec<SyncLogEntry>> {
        let rows = sqlx::query_as::<_, SyncLogEntry>(
            r#"
            SELECT id, enquiry_id, success, error_message, retry_count,
                   request_payload, response_payload, http_status, external_id,
                   created_at
            FROM sync_log
            WHERE enquiry_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(enquiry_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
