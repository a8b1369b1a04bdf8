use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use utoipa::OpenApi;
use uuid::Uuid;

use super::{
    dto::{
        CoordinatesDto, CreateDeviceRequest, CreateReadingRequest, DeleteAllResponse, DeviceDto,
        DeviceTokenDto, EditReadingRequest, LogEventDto, SensorMetadataDto, SensorReadingDto,
        StatusDetailDto, StatusReportDto, TimestampField, UpdateDeviceRequest, WindowReadingsDto,
    },
    errors::ApiError,
    AppState,
};
use crate::{
    db::models::{LogEventType, LogSeverity},
    devices::{DevicePatch, NewDevice},
    error::ServiceError,
    export,
    logs::{self, DateBucket, LogFilters},
    readings::{ReadingPatch, TelemetryStatus},
    status::{self, StatusLevel},
};

/// Session identity supplied by the external auth provider. Requests
/// without it are denied; the header value is treated as opaque.
const USER_ID_HEADER: &str = "x-user-id";

const DEFAULT_LATEST_COUNT: u32 = 100;

fn require_user(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .ok_or(ApiError(ServiceError::AccessDenied))
}

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LatestParams {
    pub count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    /// Epoch milliseconds, inclusive.
    pub from: i64,
    /// Epoch milliseconds, inclusive.
    pub to: i64,
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub count: Option<u32>,
    pub from: Option<i64>,
    pub to: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LogQueryParams {
    pub search: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<LogEventType>,
    pub severity: Option<LogSeverity>,
    pub range: Option<DateBucket>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AlertParams {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// All devices registered to the calling user.
#[utoipa::path(
    get,
    path = "/devices",
    responses(
        (status = 200, description = "Devices owned by the caller", body = Vec<DeviceDto>),
        (status = 403, description = "Missing session identity"),
    ),
    tag = "devices"
)]
pub async fn list_devices(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<DeviceDto>>, ApiError> {
    let user = require_user(&headers)?;
    let devices = state.devices.list(&user).await;
    Ok(Json(devices.into_iter().map(Into::into).collect()))
}

/// Register a device. The id and auth token are generated when absent.
#[utoipa::path(
    post,
    path = "/devices",
    request_body = CreateDeviceRequest,
    responses(
        (status = 201, description = "Device registered", body = DeviceDto),
        (status = 403, description = "Missing session identity"),
    ),
    tag = "devices"
)]
pub async fn create_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateDeviceRequest>,
) -> Result<(StatusCode, Json<DeviceDto>), ApiError> {
    let user = require_user(&headers)?;
    let coordinates = req.coordinates.unwrap_or(CoordinatesDto { lat: 0.0, lng: 0.0 });
    let device = state
        .devices
        .create(
            &user,
            NewDevice {
                name: req.name,
                location: req.location,
                lat: coordinates.lat,
                lng: coordinates.lng,
                custom_id: req.custom_id,
                auth_token: req.auth_token,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(device.into())))
}

#[utoipa::path(
    get,
    path = "/devices/{device_id}",
    params(("device_id" = String, Path, description = "Device id")),
    responses(
        (status = 200, description = "Device", body = DeviceDto),
        (status = 403, description = "Device belongs to another user"),
        (status = 404, description = "No such device"),
    ),
    tag = "devices"
)]
pub async fn get_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceDto>, ApiError> {
    let user = require_user(&headers)?;
    let device = state.devices.get(&user, &device_id).await?;
    Ok(Json(device.into()))
}

/// Update name, location and/or coordinates.
#[utoipa::path(
    put,
    path = "/devices/{device_id}",
    params(("device_id" = String, Path, description = "Device id")),
    request_body = UpdateDeviceRequest,
    responses(
        (status = 200, description = "Updated device", body = DeviceDto),
        (status = 403, description = "Device belongs to another user"),
        (status = 404, description = "No such device"),
    ),
    tag = "devices"
)]
pub async fn update_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
    Json(req): Json<UpdateDeviceRequest>,
) -> Result<Json<DeviceDto>, ApiError> {
    let user = require_user(&headers)?;
    let patch = DevicePatch {
        name: req.name,
        location: req.location,
        lat: req.coordinates.map(|c| c.lat),
        lng: req.coordinates.map(|c| c.lng),
    };
    let device = state.devices.update(&user, &device_id, patch).await?;
    Ok(Json(device.into()))
}

#[utoipa::path(
    delete,
    path = "/devices/{device_id}",
    params(("device_id" = String, Path, description = "Device id")),
    responses(
        (status = 204, description = "Device and its readings removed"),
        (status = 403, description = "Device belongs to another user"),
        (status = 404, description = "No such device"),
    ),
    tag = "devices"
)]
pub async fn delete_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&headers)?;
    state.devices.delete(&user, &device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The token addressing this device's reading stream.
#[utoipa::path(
    get,
    path = "/devices/{device_id}/token",
    params(("device_id" = String, Path, description = "Device id")),
    responses(
        (status = 200, description = "Stream token", body = DeviceTokenDto),
        (status = 403, description = "Device belongs to another user"),
        (status = 404, description = "No such device"),
    ),
    tag = "devices"
)]
pub async fn get_device_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceTokenDto>, ApiError> {
    let user = require_user(&headers)?;
    let token = state.devices.token(&user, &device_id).await?;
    Ok(Json(token.into()))
}

// ---------------------------------------------------------------------------
// Sensor readings
// ---------------------------------------------------------------------------

/// Most recent readings, oldest-first for charting.
#[utoipa::path(
    get,
    path = "/readings/{device_token}/latest",
    params(
        ("device_token" = String, Path, description = "Reading stream token"),
        ("count" = Option<u32>, Query, description = "Maximum readings, default 100"),
    ),
    responses(
        (status = 200, description = "Readings in chronological order", body = Vec<SensorReadingDto>),
        (status = 403, description = "Stream belongs to another user"),
    ),
    tag = "readings"
)]
pub async fn get_latest_readings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_token): Path<String>,
    Query(params): Query<LatestParams>,
) -> Result<Json<Vec<SensorReadingDto>>, ApiError> {
    let user = require_user(&headers)?;
    let count = params.count.unwrap_or(DEFAULT_LATEST_COUNT);
    let readings = state.readings.fetch_latest(&user, &device_token, count).await?;
    Ok(Json(readings.into_iter().map(Into::into).collect()))
}

/// Readings within `[from, to]`, both bounds inclusive, oldest-first.
#[utoipa::path(
    get,
    path = "/readings/{device_token}/range",
    params(
        ("device_token" = String, Path, description = "Reading stream token"),
        ("from" = i64, Query, description = "Epoch millis, inclusive"),
        ("to" = i64, Query, description = "Epoch millis, inclusive"),
    ),
    responses(
        (status = 200, description = "Readings in chronological order", body = Vec<SensorReadingDto>),
        (status = 403, description = "Stream belongs to another user"),
        (status = 422, description = "Bound outside the representable range"),
    ),
    tag = "readings"
)]
pub async fn get_readings_by_range(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_token): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<SensorReadingDto>>, ApiError> {
    let user = require_user(&headers)?;
    let readings = state
        .readings
        .fetch_by_range(&user, &device_token, params.from, params.to)
        .await?;
    Ok(Json(readings.into_iter().map(Into::into).collect()))
}

/// Period-selector query: latest readings for the window plus the poll
/// cadence the viewer should refetch at.
#[utoipa::path(
    get,
    path = "/readings/{device_token}/window/{minutes}",
    params(
        ("device_token" = String, Path, description = "Reading stream token"),
        ("minutes" = u32, Path, description = "Viewing window in minutes"),
    ),
    responses(
        (status = 200, description = "Readings plus poll cadence", body = WindowReadingsDto),
        (status = 403, description = "Stream belongs to another user"),
    ),
    tag = "readings"
)]
pub async fn get_readings_window(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((device_token, minutes)): Path<(String, u32)>,
) -> Result<Json<WindowReadingsDto>, ApiError> {
    let user = require_user(&headers)?;
    let window = state.readings.fetch_window(&user, &device_token, minutes).await?;
    Ok(Json(window.into()))
}

/// Telemetry liveness inferred from the newest reading's recency.
#[utoipa::path(
    get,
    path = "/readings/{device_token}/metadata",
    params(("device_token" = String, Path, description = "Reading stream token")),
    responses(
        (status = 200, description = "Stream metadata", body = SensorMetadataDto),
        (status = 403, description = "Stream belongs to another user"),
    ),
    tag = "readings"
)]
pub async fn get_sensor_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_token): Path<String>,
) -> Result<Json<SensorMetadataDto>, ApiError> {
    let user = require_user(&headers)?;
    let metadata = state.readings.fetch_metadata(&user, &device_token).await?;
    Ok(Json(metadata.into()))
}

/// Classified view of the newest reading: per-parameter status with
/// remediation guidance plus the overall status.
#[utoipa::path(
    get,
    path = "/readings/{device_token}/status",
    params(("device_token" = String, Path, description = "Reading stream token")),
    responses(
        (status = 200, description = "Classified latest reading", body = StatusReportDto),
        (status = 403, description = "Stream belongs to another user"),
        (status = 404, description = "Stream has no readings"),
    ),
    tag = "readings"
)]
pub async fn get_status_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_token): Path<String>,
) -> Result<Json<StatusReportDto>, ApiError> {
    let user = require_user(&headers)?;
    let reading = state
        .readings
        .fetch_latest(&user, &device_token, 1)
        .await?
        .pop()
        .ok_or(ApiError(ServiceError::NotFound("sensor reading")))?;

    let ph = status::classify_ph(reading.ph_level);
    let temperature = status::classify_temperature(reading.temperature_c);
    let ammonia = status::classify_ammonia(reading.ammonia_ppm);
    let overall = status::overall_status(ph.status, temperature.status, ammonia.status);
    let display = status::display(overall);

    Ok(Json(StatusReportDto {
        reading: reading.into(),
        temperature: temperature.into(),
        ph: ph.into(),
        ammonia: ammonia.into(),
        overall,
        emoji: display.emoji.to_owned(),
        css_class: display.css_class.to_owned(),
    }))
}

/// CSV download. Exports the given range when both bounds are present,
/// otherwise the latest `count` readings. An empty result is blocked.
#[utoipa::path(
    get,
    path = "/readings/{device_token}/export",
    params(
        ("device_token" = String, Path, description = "Reading stream token"),
        ("count" = Option<u32>, Query, description = "Latest-N export, default 100"),
        ("from" = Option<i64>, Query, description = "Range export start, epoch millis"),
        ("to" = Option<i64>, Query, description = "Range export end, epoch millis"),
    ),
    responses(
        (status = 200, description = "CSV attachment", content_type = "text/csv"),
        (status = 403, description = "Stream belongs to another user"),
        (status = 409, description = "Nothing to export"),
    ),
    tag = "readings"
)]
pub async fn export_readings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_token): Path<String>,
    Query(params): Query<ExportParams>,
) -> Result<Response, ApiError> {
    let user = require_user(&headers)?;
    let readings = match (params.from, params.to) {
        (Some(from), Some(to)) => {
            state
                .readings
                .fetch_by_range(&user, &device_token, from, to)
                .await?
        }
        _ => {
            let count = params.count.unwrap_or(DEFAULT_LATEST_COUNT);
            state.readings.fetch_latest(&user, &device_token, count).await?
        }
    };

    let csv = export::render_csv(&readings)?;
    let filename = export::attachment_name(&device_token, Utc::now());

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        csv,
    )
        .into_response())
}

/// Manual entry at a caller-supplied timestamp.
#[utoipa::path(
    post,
    path = "/readings/{device_token}",
    params(("device_token" = String, Path, description = "Reading stream token")),
    request_body = CreateReadingRequest,
    responses(
        (status = 201, description = "Stored reading", body = SensorReadingDto),
        (status = 403, description = "Stream belongs to another user"),
        (status = 422, description = "Unparseable timestamp"),
    ),
    tag = "readings"
)]
pub async fn add_reading(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_token): Path<String>,
    Json(req): Json<CreateReadingRequest>,
) -> Result<(StatusCode, Json<SensorReadingDto>), ApiError> {
    let user = require_user(&headers)?;
    // The data layer does not validate timestamps; unparseable input stops here.
    let millis = req.timestamp.into_millis()?;
    let reading = state
        .readings
        .add(
            &user,
            &device_token,
            millis,
            req.temperature_c,
            req.ph_level,
            req.ammonia_ppm,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(reading.into())))
}

/// Point edit: only supplied fields change; key and timestamp never do.
#[utoipa::path(
    patch,
    path = "/readings/{device_token}/{record_key}",
    params(
        ("device_token" = String, Path, description = "Reading stream token"),
        ("record_key" = String, Path, description = "Record key within the stream"),
    ),
    request_body = EditReadingRequest,
    responses(
        (status = 200, description = "Updated reading", body = SensorReadingDto),
        (status = 403, description = "Stream belongs to another user"),
        (status = 404, description = "No reading at this key"),
    ),
    tag = "readings"
)]
pub async fn edit_reading(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((device_token, record_key)): Path<(String, String)>,
    Json(req): Json<EditReadingRequest>,
) -> Result<Json<SensorReadingDto>, ApiError> {
    let user = require_user(&headers)?;
    let patch = ReadingPatch {
        temperature_c: req.temperature_c,
        ph_level: req.ph_level,
        ammonia_ppm: req.ammonia_ppm,
    };
    let reading = state
        .readings
        .edit_by_key(&user, &device_token, &record_key, patch)
        .await?;
    Ok(Json(reading.into()))
}

#[utoipa::path(
    delete,
    path = "/readings/{device_token}/{record_key}",
    params(
        ("device_token" = String, Path, description = "Reading stream token"),
        ("record_key" = String, Path, description = "Record key within the stream"),
    ),
    responses(
        (status = 204, description = "Reading removed"),
        (status = 403, description = "Stream belongs to another user"),
        (status = 404, description = "No reading at this key"),
    ),
    tag = "readings"
)]
pub async fn delete_reading(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((device_token, record_key)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&headers)?;
    state
        .readings
        .delete_by_key(&user, &device_token, &record_key)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Drop the whole stream. Deleting an empty stream succeeds with zero.
#[utoipa::path(
    delete,
    path = "/readings/{device_token}",
    params(("device_token" = String, Path, description = "Reading stream token")),
    responses(
        (status = 200, description = "Number of readings removed", body = DeleteAllResponse),
        (status = 403, description = "Stream belongs to another user"),
    ),
    tag = "readings"
)]
pub async fn delete_all_readings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_token): Path<String>,
) -> Result<Json<DeleteAllResponse>, ApiError> {
    let user = require_user(&headers)?;
    let deleted = state.readings.delete_all(&user, &device_token).await?;
    Ok(Json(DeleteAllResponse { deleted }))
}

// ---------------------------------------------------------------------------
// Activity log
// ---------------------------------------------------------------------------

/// Log review: server-side type/severity/date filters plus substring
/// search, newest-first.
#[utoipa::path(
    get,
    path = "/logs",
    params(
        ("search" = Option<String>, Query, description = "Substring over message and device name"),
        ("type" = Option<LogEventType>, Query, description = "Exact event type"),
        ("severity" = Option<LogSeverity>, Query, description = "Exact severity"),
        ("range" = Option<DateBucket>, Query, description = "today | week | month"),
        ("limit" = Option<i64>, Query, description = "Unfiltered fetch limit, default 100"),
    ),
    responses(
        (status = 200, description = "Matching events, newest first", body = Vec<LogEventDto>),
        (status = 403, description = "Missing session identity"),
    ),
    tag = "logs"
)]
pub async fn get_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<LogQueryParams>,
) -> Result<Json<Vec<LogEventDto>>, ApiError> {
    let user = require_user(&headers)?;

    let unfiltered = params.search.is_none()
        && params.event_type.is_none()
        && params.severity.is_none()
        && params.range.is_none();

    let events = if unfiltered {
        let limit = params.limit.unwrap_or(logs::DEFAULT_FETCH_LIMIT);
        state.logs.fetch(&user, limit).await
    } else {
        let filters = LogFilters {
            search: params.search,
            event_type: params.event_type,
            severity: params.severity,
            range: params.range,
        };
        state.logs.fetch_filtered(&user, &filters).await
    };

    Ok(Json(events.into_iter().map(Into::into).collect()))
}

/// Newest high/medium-severity events for the dashboard alert widget.
#[utoipa::path(
    get,
    path = "/logs/alerts",
    params(("limit" = Option<i64>, Query, description = "Maximum events, default 5")),
    responses(
        (status = 200, description = "Recent alerts, newest first", body = Vec<LogEventDto>),
        (status = 403, description = "Missing session identity"),
    ),
    tag = "logs"
)]
pub async fn get_recent_alerts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<AlertParams>,
) -> Result<Json<Vec<LogEventDto>>, ApiError> {
    let user = require_user(&headers)?;
    let limit = params.limit.unwrap_or(logs::DEFAULT_ALERT_LIMIT);
    let events = state.logs.recent_alerts(&user, limit).await;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    delete,
    path = "/logs/{log_id}",
    params(("log_id" = Uuid, Path, description = "Log event id")),
    responses(
        (status = 204, description = "Event removed"),
        (status = 403, description = "Event belongs to another user"),
        (status = 404, description = "No such event"),
    ),
    tag = "logs"
)]
pub async fn delete_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(log_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&headers)?;
    state.logs.delete(&user, log_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        list_devices,
        create_device,
        get_device,
        update_device,
        delete_device,
        get_device_token,
        get_latest_readings,
        get_readings_by_range,
        get_readings_window,
        get_sensor_metadata,
        get_status_report,
        export_readings,
        add_reading,
        edit_reading,
        delete_reading,
        delete_all_readings,
        get_logs,
        get_recent_alerts,
        delete_log,
        health,
    ),
    components(schemas(
        DeviceDto,
        CoordinatesDto,
        CreateDeviceRequest,
        UpdateDeviceRequest,
        DeviceTokenDto,
        SensorReadingDto,
        WindowReadingsDto,
        SensorMetadataDto,
        TelemetryStatus,
        CreateReadingRequest,
        TimestampField,
        EditReadingRequest,
        DeleteAllResponse,
        StatusDetailDto,
        StatusReportDto,
        StatusLevel,
        LogEventDto,
        LogEventType,
        LogSeverity,
        DateBucket,
    )),
    tags(
        (name = "devices", description = "Device registry"),
        (name = "readings", description = "Sensor reading streams"),
        (name = "logs", description = "Activity log"),
        (name = "system", description = "System endpoints"),
    ),
    info(
        title = "Aquamon API",
        version = "0.1.0",
        description = "REST API for water-quality monitoring data"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use sqlx::PgPool;

    use crate::api::router;

    const BASE_MILLIS: i64 = 1_748_797_200_000; // 2025-06-01 17:00:00 UTC

    fn test_server(pool: PgPool) -> TestServer {
        TestServer::new(router(pool)).unwrap()
    }

    async fn create_device(server: &TestServer, user: &str, token: &str) -> String {
        let resp = server
            .post("/devices")
            .add_header("x-user-id", user)
            .json(&json!({
                "name": "Kolam Utara",
                "location": "Blok A",
                "coordinates": { "lat": -6.2, "lng": 106.8 },
                "auth_token": token,
            }))
            .await;
        resp.assert_status(StatusCode::CREATED);
        let body: Value = resp.json();
        body["id"].as_str().unwrap().to_owned()
    }

    async fn add_reading(
        server: &TestServer,
        user: &str,
        token: &str,
        millis: i64,
        temp: f64,
        ph: f64,
        ammonia: f64,
    ) -> Value {
        let resp = server
            .post(&format!("/readings/{token}"))
            .add_header("x-user-id", user)
            .json(&json!({
                "timestamp": millis,
                "temperature_c": temp,
                "ph_level": ph,
                "ammonia_ppm": ammonia,
            }))
            .await;
        resp.assert_status(StatusCode::CREATED);
        resp.json()
    }

    // -----------------------------------------------------------------------
    // Session identity and ownership
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn missing_session_header_is_denied(pool: PgPool) {
        let server = test_server(pool);
        let resp = server.get("/readings/tok1/latest").await;
        resp.assert_status(StatusCode::FORBIDDEN);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn foreign_stream_is_denied(pool: PgPool) {
        let server = test_server(pool);
        create_device(&server, "u1", "tok1").await;

        let resp = server
            .get("/readings/tok1/latest")
            .add_header("x-user-id", "u2")
            .await;
        resp.assert_status(StatusCode::FORBIDDEN);
        let body: Value = resp.json();
        assert!(body["error"].as_str().unwrap().contains("access denied"));
    }

    // -----------------------------------------------------------------------
    // Readings
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn manual_entry_accepts_rfc3339_and_millis(pool: PgPool) {
        let server = test_server(pool);
        create_device(&server, "u1", "tok1").await;

        add_reading(&server, "u1", "tok1", BASE_MILLIS, 26.0, 7.0, 0.1).await;

        let resp = server
            .post("/readings/tok1")
            .add_header("x-user-id", "u1")
            .json(&json!({
                "timestamp": "2025-06-01T17:00:10Z",
                "temperature_c": 27.0,
                "ph_level": 7.1,
                "ammonia_ppm": 0.15,
            }))
            .await;
        resp.assert_status(StatusCode::CREATED);
        let body: Value = resp.json();
        assert_eq!(body["timestamp_millis"].as_i64().unwrap(), BASE_MILLIS + 10_000);

        let resp = server
            .get("/readings/tok1/latest")
            .add_header("x-user-id", "u1")
            .await;
        resp.assert_status_ok();
        let body: Vec<Value> = resp.json();
        assert_eq!(body.len(), 2);
        assert!(body[0]["timestamp_millis"].as_i64() < body[1]["timestamp_millis"].as_i64());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn unparseable_timestamp_is_rejected(pool: PgPool) {
        let server = test_server(pool);
        create_device(&server, "u1", "tok1").await;

        let resp = server
            .post("/readings/tok1")
            .add_header("x-user-id", "u1")
            .json(&json!({
                "timestamp": "bukan-tanggal",
                "temperature_c": 26.0,
                "ph_level": 7.0,
                "ammonia_ppm": 0.1,
            }))
            .await;
        resp.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn range_is_inclusive_on_both_bounds(pool: PgPool) {
        let server = test_server(pool);
        create_device(&server, "u1", "tok1").await;

        let from = BASE_MILLIS;
        let to = BASE_MILLIS + 10_000;
        for millis in [from - 1, from, from + 5_000, to, to + 1] {
            add_reading(&server, "u1", "tok1", millis, 26.0, 7.0, 0.1).await;
        }

        let resp = server
            .get(&format!("/readings/tok1/range?from={from}&to={to}"))
            .add_header("x-user-id", "u1")
            .await;
        resp.assert_status_ok();
        let body: Vec<Value> = resp.json();
        let millis: Vec<i64> = body
            .iter()
            .map(|r| r["timestamp_millis"].as_i64().unwrap())
            .collect();
        assert_eq!(millis, vec![from, from + 5_000, to]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn edit_patches_only_supplied_fields(pool: PgPool) {
        let server = test_server(pool);
        create_device(&server, "u1", "tok1").await;
        let created = add_reading(&server, "u1", "tok1", BASE_MILLIS, 26.0, 7.0, 0.1).await;
        let key = created["record_key"].as_str().unwrap();

        let resp = server
            .patch(&format!("/readings/tok1/{key}"))
            .add_header("x-user-id", "u1")
            .json(&json!({ "temperature_c": 30.0 }))
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["temperature_c"].as_f64().unwrap(), 30.0);
        assert_eq!(body["ph_level"].as_f64().unwrap(), 7.0);
        assert_eq!(body["record_key"], created["record_key"]);
        assert_eq!(body["timestamp_millis"], created["timestamp_millis"]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn delete_one_then_all(pool: PgPool) {
        let server = test_server(pool);
        create_device(&server, "u1", "tok1").await;
        let first = add_reading(&server, "u1", "tok1", BASE_MILLIS, 26.0, 7.0, 0.1).await;
        add_reading(&server, "u1", "tok1", BASE_MILLIS + 1_000, 26.0, 7.0, 0.1).await;

        let key = first["record_key"].as_str().unwrap();
        let resp = server
            .delete(&format!("/readings/tok1/{key}"))
            .add_header("x-user-id", "u1")
            .await;
        resp.assert_status(StatusCode::NO_CONTENT);

        let resp = server
            .delete("/readings/tok1")
            .add_header("x-user-id", "u1")
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["deleted"].as_u64().unwrap(), 1);

        // Empty stream: still a success, zero removed.
        let resp = server
            .delete("/readings/tok1")
            .add_header("x-user-id", "u1")
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["deleted"].as_u64().unwrap(), 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn window_reports_poll_cadence(pool: PgPool) {
        let server = test_server(pool);
        create_device(&server, "u1", "tok1").await;
        add_reading(&server, "u1", "tok1", BASE_MILLIS, 26.0, 7.0, 0.1).await;

        let resp = server
            .get("/readings/tok1/window/5")
            .add_header("x-user-id", "u1")
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["poll_interval_secs"].as_u64().unwrap(), 15);

        let resp = server
            .get("/readings/tok1/window/1440")
            .add_header("x-user-id", "u1")
            .await;
        let body: Value = resp.json();
        assert!(body["poll_interval_secs"].is_null());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn status_report_tracks_worst_parameter(pool: PgPool) {
        let server = test_server(pool);
        create_device(&server, "u1", "tok1").await;

        async fn status_of(server: &TestServer) -> Value {
            let resp = server
                .get("/readings/tok1/status")
                .add_header("x-user-id", "u1")
                .await;
            resp.assert_status_ok();
            resp.json()
        }

        add_reading(&server, "u1", "tok1", BASE_MILLIS, 26.0, 7.0, 0.1).await;
        let body = status_of(&server).await;
        assert_eq!(body["overall"], "Aman");
        assert_eq!(body["emoji"], "✅");

        add_reading(&server, "u1", "tok1", BASE_MILLIS + 1_000, 31.0, 7.0, 0.1).await;
        let body = status_of(&server).await;
        assert_eq!(body["overall"], "Waspada");
        assert_eq!(body["temperature"]["status"], "Waspada");

        add_reading(&server, "u1", "tok1", BASE_MILLIS + 2_000, 31.0, 7.0, 0.6).await;
        let body = status_of(&server).await;
        assert_eq!(body["overall"], "Bahaya");
        assert_eq!(body["ammonia"]["status"], "Bahaya");
        assert_eq!(body["temperature"]["status"], "Waspada");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn status_report_on_empty_stream_is_not_found(pool: PgPool) {
        let server = test_server(pool);
        create_device(&server, "u1", "tok1").await;

        let resp = server
            .get("/readings/tok1/status")
            .add_header("x-user-id", "u1")
            .await;
        resp.assert_status(StatusCode::NOT_FOUND);
    }

    // -----------------------------------------------------------------------
    // CSV export
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn export_of_empty_stream_is_blocked(pool: PgPool) {
        let server = test_server(pool);
        create_device(&server, "u1", "tok1").await;

        let resp = server
            .get("/readings/tok1/export")
            .add_header("x-user-id", "u1")
            .await;
        resp.assert_status(StatusCode::CONFLICT);
        let body: Value = resp.json();
        assert!(body["error"].as_str().unwrap().contains("export"));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn export_produces_csv_attachment(pool: PgPool) {
        let server = test_server(pool);
        create_device(&server, "u1", "tok1").await;
        add_reading(&server, "u1", "tok1", BASE_MILLIS, 27.456, 7.0, 0.1).await;

        let resp = server
            .get("/readings/tok1/export")
            .add_header("x-user-id", "u1")
            .await;
        resp.assert_status_ok();

        let content_type = resp
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned();
        assert!(content_type.starts_with("text/csv"));

        let disposition = resp
            .headers()
            .get(axum::http::header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned();
        assert!(disposition.contains("data_sensor_tok1_"));

        let text = resp.text();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Waktu,Suhu (°C),pH Level,Amonia (ppm)"));
        assert_eq!(lines.next(), Some("02/06/2025 00:00:00,27.46,7.00,0.10"));
    }

    // -----------------------------------------------------------------------
    // Devices and activity log
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn device_crud_appends_audit_trail(pool: PgPool) {
        let server = test_server(pool);
        let id = create_device(&server, "u1", "tok1").await;

        let resp = server
            .put(&format!("/devices/{id}"))
            .add_header("x-user-id", "u1")
            .json(&json!({ "name": "Kolam Selatan" }))
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["name"], "Kolam Selatan");
        assert_eq!(body["location"], "Blok A");

        let resp = server
            .get(&format!("/devices/{id}/token"))
            .add_header("x-user-id", "u1")
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["token"], "tok1");

        let resp = server
            .get("/logs?type=configuration")
            .add_header("x-user-id", "u1")
            .await;
        resp.assert_status_ok();
        let events: Vec<Value> = resp.json();
        let messages: Vec<&str> = events.iter().map(|e| e["message"].as_str().unwrap()).collect();
        assert!(messages.contains(&"Device created"));
        assert!(messages.contains(&"Device updated"));
        assert!(messages.contains(&"Authentication token retrieved"));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn generated_device_id_doubles_as_token(pool: PgPool) {
        let server = test_server(pool);
        let resp = server
            .post("/devices")
            .add_header("x-user-id", "u1")
            .json(&json!({ "name": "Sensor", "location": "Blok B" }))
            .await;
        resp.assert_status(StatusCode::CREATED);
        let body: Value = resp.json();
        assert_eq!(body["id"], body["auth_token"]);
        assert_eq!(body["coordinates"]["lat"].as_f64().unwrap(), 0.0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn log_search_and_delete_ownership(pool: PgPool) {
        let server = test_server(pool);
        create_device(&server, "u1", "tok1").await;

        let resp = server
            .get("/logs?search=created")
            .add_header("x-user-id", "u1")
            .await;
        resp.assert_status_ok();
        let events: Vec<Value> = resp.json();
        assert_eq!(events.len(), 1);
        let log_id = events[0]["id"].as_str().unwrap().to_owned();

        let resp = server
            .delete(&format!("/logs/{log_id}"))
            .add_header("x-user-id", "u2")
            .await;
        resp.assert_status(StatusCode::FORBIDDEN);

        let resp = server
            .delete(&format!("/logs/{log_id}"))
            .add_header("x-user-id", "u1")
            .await;
        resp.assert_status(StatusCode::NO_CONTENT);
    }

    // -----------------------------------------------------------------------
    // System endpoints
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn health_returns_ok(pool: PgPool) {
        let server = test_server(pool);
        let resp = server.get("/health").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["status"], "ok");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn openapi_spec_is_served(pool: PgPool) {
        let server = test_server(pool);
        let resp = server.get("/api-docs/openapi.json").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["info"]["title"], "Aquamon API");
    }
}
