use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::auth::AdminAuth;
use crate::error::{AppError, AppResult};
use crate::models::{DispatchReport, EnquiryRecord, NewEnquiry, UpdateEnquiryStatus};
use crate::services::{McbSyncAdapter, NotificationDispatcher};
use crate::store::DynStore;

#[derive(Serialize)]
pub struct DispatchResponse {
    pub enquiry_id: i64,
    pub outcomes: DispatchReport,
}

/// POST /api/enquiries - Store a finalized enquiry and start delivery
///
/// Dispatch and MCB sync run in the background; the response does not wait
/// for them.
pub async fn create_enquiry(
    _auth: AdminAuth,
    store: web::Data<DynStore>,
    dispatcher: web::Data<NotificationDispatcher>,
    sync: web::Data<McbSyncAdapter>,
    body: web::Json<NewEnquiry>,
) -> AppResult<HttpResponse> {
    let input = body.into_inner();
    if input.enquiry_number.trim().is_empty() {
        return Err(AppError::Validation(
            "enquiry_number must not be empty".to_string(),
        ));
    }

    let enquiry = store.create_enquiry(input).await?;
    log::info!(
        "Enquiry {} ({}) created for site {}",
        enquiry.id,
        enquiry.enquiry_number,
        enquiry.site_id
    );

    spawn_delivery(
        dispatcher.get_ref().clone(),
        sync.get_ref().clone(),
        enquiry.clone(),
    );

    Ok(HttpResponse::Created().json(enquiry))
}

/// Runs dispatch and sync for a new enquiry on background tasks
fn spawn_delivery(dispatcher: NotificationDispatcher, sync: McbSyncAdapter, enquiry: EnquiryRecord) {
    let id = enquiry.id;

    tokio::spawn(async move {
        dispatcher.dispatch_record(&enquiry).await;
    });

    tokio::spawn(async move {
        if let Err(e) = sync.sync_enquiry(id).await {
            log::error!("MCB sync for enquiry {} failed: {}", id, e);
        }
    });
}

/// GET /api/enquiries/{id} - Get an enquiry by ID
pub async fn get_enquiry(
    _auth: AdminAuth,
    store: web::Data<DynStore>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let enquiry = store.get_enquiry(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(enquiry))
}

/// PATCH /api/enquiries/{id}/status - Update the admission status
pub async fn update_status(
    _auth: AdminAuth,
    store: web::Data<DynStore>,
    path: web::Path<i64>,
    body: web::Json<UpdateEnquiryStatus>,
) -> AppResult<HttpResponse> {
    let enquiry = store
        .update_status(path.into_inner(), body.into_inner().status)
        .await?;
    Ok(HttpResponse::Ok().json(enquiry))
}

/// POST /api/enquiries/{id}/dispatch - Run a dispatch and return per-channel outcomes
pub async fn dispatch(
    _auth: AdminAuth,
    dispatcher: web::Data<NotificationDispatcher>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let enquiry_id = path.into_inner();
    let outcomes = dispatcher.dispatch(enquiry_id).await?;

    Ok(HttpResponse::Ok().json(DispatchResponse {
        enquiry_id,
        outcomes,
    }))
}

/// GET /api/enquiries/{id}/deliveries - Delivery attempt log
pub async fn list_deliveries(
    _auth: AdminAuth,
    store: web::Data<DynStore>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    store.get_enquiry(id).await?;

    let entries = store.list_delivery_log(id).await?;
    Ok(HttpResponse::Ok().json(entries))
}

/// POST /api/enquiries/{id}/sync - Push the enquiry to MCB
pub async fn sync_enquiry(
    _auth: AdminAuth,
    sync: web::Data<McbSyncAdapter>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let entry = sync.sync_enquiry(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(entry))
}

/// GET /api/enquiries/{id}/sync-log - MCB sync history
pub async fn list_sync_log(
    _auth: AdminAuth,
    store: web::Data<DynStore>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    store.get_enquiry(id).await?;

    let entries = store.list_sync_log(id).await?;
    Ok(HttpResponse::Ok().json(entries))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/enquiries")
            .route("", web::post().to(create_enquiry))
            .route("/{id}", web::get().to(get_enquiry))
            .route("/{id}/status", web::patch().to(update_status))
            .route("/{id}/dispatch", web::post().to(dispatch))
            .route("/{id}/deliveries", web::get().to(list_deliveries))
            .route("/{id}/sync", web::post().to(sync_enquiry))
            .route("/{id}/sync-log", web::get().to(list_sync_log)),
    );
}
