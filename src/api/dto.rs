use chrono::DateTime;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::models::{Device, LogEvent, LogEventType, LogSeverity, SensorReading},
    devices::DeviceToken,
    error::ServiceError,
    readings::{SensorMetadata, TelemetryStatus, WindowReadings},
    status::{StatusDetail, StatusLevel},
    timefmt,
};

// ---------------------------------------------------------------------------
// Sensor readings
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SensorReadingDto {
    pub record_key: String,
    pub device_token: String,
    pub timestamp_millis: i64,
    pub temperature_c: f64,
    pub ph_level: f64,
    pub ammonia_ppm: f64,
    /// `DD/MM/YYYY HH:MM:SS` in Asia/Jakarta, for tables and CSV.
    pub date_formatted: String,
    /// Time-of-day portion only.
    pub time_formatted: String,
}

impl From<SensorReading> for SensorReadingDto {
    fn from(r: SensorReading) -> Self {
        Self {
            record_key: r.record_key,
            device_token: r.device_token,
            timestamp_millis: r.recorded_at.timestamp_millis(),
            temperature_c: r.temperature_c,
            ph_level: r.ph_level,
            ammonia_ppm: r.ammonia_ppm,
            date_formatted: timefmt::datetime_formatted(r.recorded_at),
            time_formatted: timefmt::time_formatted(r.recorded_at),
        }
    }
}

/// Window query result: readings plus the cadence the viewer should
/// refetch at (`null` = do not poll).
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WindowReadingsDto {
    pub readings: Vec<SensorReadingDto>,
    pub poll_interval_secs: Option<u64>,
}

impl From<WindowReadings> for WindowReadingsDto {
    fn from(w: WindowReadings) -> Self {
        Self {
            readings: w.readings.into_iter().map(Into::into).collect(),
            poll_interval_secs: w.poll_interval.map(|d| d.as_secs()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SensorMetadataDto {
    pub device_token: String,
    pub telemetry_status: TelemetryStatus,
}

impl From<SensorMetadata> for SensorMetadataDto {
    fn from(m: SensorMetadata) -> Self {
        Self {
            device_token: m.device_token,
            telemetry_status: m.telemetry_status,
        }
    }
}

/// Manual entry. The timestamp is either epoch milliseconds or an RFC3339
/// string; unparseable input is rejected before it reaches the store.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReadingRequest {
    pub timestamp: TimestampField,
    pub temperature_c: f64,
    pub ph_level: f64,
    pub ammonia_ppm: f64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum TimestampField {
    Millis(i64),
    Rfc3339(String),
}

impl TimestampField {
    pub fn into_millis(self) -> Result<i64, ServiceError> {
        match self {
            TimestampField::Millis(ms) => Ok(ms),
            TimestampField::Rfc3339(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.timestamp_millis())
                .map_err(|_| ServiceError::InvalidTimestamp(s)),
        }
    }
}

/// Point edit. Absent fields stay untouched.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct EditReadingRequest {
    pub temperature_c: Option<f64>,
    pub ph_level: Option<f64>,
    pub ammonia_ppm: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteAllResponse {
    pub deleted: u64,
}

// ---------------------------------------------------------------------------
// Status classification
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusDetailDto {
    pub status: StatusLevel,
    pub recommendation: String,
    pub css_class: String,
}

impl From<StatusDetail> for StatusDetailDto {
    fn from(d: StatusDetail) -> Self {
        Self {
            status: d.status,
            recommendation: d.recommendation.to_owned(),
            css_class: d.css_class.to_owned(),
        }
    }
}

/// Classified view of a device's newest reading.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusReportDto {
    pub reading: SensorReadingDto,
    pub temperature: StatusDetailDto,
    pub ph: StatusDetailDto,
    pub ammonia: StatusDetailDto,
    pub overall: StatusLevel,
    pub emoji: String,
    pub css_class: String,
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct CoordinatesDto {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceDto {
    pub id: String,
    pub name: String,
    pub location: String,
    pub coordinates: CoordinatesDto,
    pub user_id: String,
    pub auth_token: String,
    /// Registration instant, Jakarta-formatted.
    pub registration_date: String,
}

impl From<Device> for DeviceDto {
    fn from(d: Device) -> Self {
        Self {
            id: d.id,
            name: d.name,
            location: d.location,
            coordinates: CoordinatesDto { lat: d.lat, lng: d.lng },
            user_id: d.user_id,
            auth_token: d.auth_token,
            registration_date: timefmt::datetime_formatted(d.registered_at),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDeviceRequest {
    pub name: String,
    pub location: String,
    pub coordinates: Option<CoordinatesDto>,
    pub custom_id: Option<String>,
    pub auth_token: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateDeviceRequest {
    pub name: Option<String>,
    pub location: Option<String>,
    pub coordinates: Option<CoordinatesDto>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceTokenDto {
    pub token: String,
    pub device_id: String,
}

impl From<DeviceToken> for DeviceTokenDto {
    fn from(t: DeviceToken) -> Self {
        Self {
            token: t.token,
            device_id: t.device_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Activity log
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogEventDto {
    pub id: Uuid,
    pub event_type: LogEventType,
    pub severity: LogSeverity,
    pub message: String,
    /// Device display name at the time of the event.
    pub device: String,
    pub device_id: String,
    pub timestamp_millis: i64,
    pub date_formatted: String,
}

impl From<LogEvent> for LogEventDto {
    fn from(e: LogEvent) -> Self {
        Self {
            id: e.id,
            event_type: e.event_type,
            severity: e.severity,
            message: e.message,
            device: e.device_name,
            device_id: e.device_id,
            timestamp_millis: e.created_at.timestamp_millis(),
            date_formatted: timefmt::datetime_formatted(e.created_at),
        }
    }
}
