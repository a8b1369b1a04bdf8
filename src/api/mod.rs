pub mod dto;
pub mod errors;
pub mod handlers;

use axum::{
    routing::{get, patch, post},
    Router,
};
use sqlx::PgPool;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::{devices::DeviceService, logs::LogService, readings::ReadingService};

use handlers::ApiDoc;

/// Accessor services shared by every handler. Each owns the injected
/// store pool; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub devices: DeviceService,
    pub readings: ReadingService,
    pub logs: LogService,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let logs = LogService::new(pool.clone());
        let devices = DeviceService::new(pool.clone(), logs.clone());
        let readings = ReadingService::new(pool);
        Self { devices, readings, logs }
    }
}

pub fn router(pool: PgPool) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route(
            "/devices",
            get(handlers::list_devices).post(handlers::create_device),
        )
        .route(
            "/devices/{device_id}",
            get(handlers::get_device)
                .put(handlers::update_device)
                .delete(handlers::delete_device),
        )
        .route("/devices/{device_id}/token", get(handlers::get_device_token))
        .route(
            "/readings/{device_token}",
            post(handlers::add_reading).delete(handlers::delete_all_readings),
        )
        .route(
            "/readings/{device_token}/latest",
            get(handlers::get_latest_readings),
        )
        .route(
            "/readings/{device_token}/range",
            get(handlers::get_readings_by_range),
        )
        .route(
            "/readings/{device_token}/window/{minutes}",
            get(handlers::get_readings_window),
        )
        .route(
            "/readings/{device_token}/metadata",
            get(handlers::get_sensor_metadata),
        )
        .route(
            "/readings/{device_token}/status",
            get(handlers::get_status_report),
        )
        .route(
            "/readings/{device_token}/export",
            get(handlers::export_readings),
        )
        .route(
            "/readings/{device_token}/{record_key}",
            patch(handlers::edit_reading).delete(handlers::delete_reading),
        )
        .route("/logs", get(handlers::get_logs))
        .route("/logs/alerts", get(handlers::get_recent_alerts))
        .route("/logs/{log_id}", axum::routing::delete(handlers::delete_log))
        .with_state(AppState::new(pool))
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
