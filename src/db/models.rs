use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Mirrors the `log_event_type` Postgres enum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "log_event_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogEventType {
    Alert,
    Connection,
    Disconnection,
    Configuration,
    Threshold,
}

impl fmt::Display for LogEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogEventType::Alert => "alert",
            LogEventType::Connection => "connection",
            LogEventType::Disconnection => "disconnection",
            LogEventType::Configuration => "configuration",
            LogEventType::Threshold => "threshold",
        };
        f.write_str(s)
    }
}

/// Mirrors the `log_severity` Postgres enum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "log_severity", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    High,
    Medium,
    Low,
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogSeverity::High => "high",
            LogSeverity::Medium => "medium",
            LogSeverity::Low => "low",
        };
        f.write_str(s)
    }
}

/// A registered monitoring device. `auth_token` addresses the device's
/// reading stream and defaults to `id` at registration.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub location: String,
    pub lat: f64,
    pub lng: f64,
    pub user_id: String,
    pub auth_token: String,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One time-series record in a device's reading stream.
///
/// `record_key` is opaque and time-ordered (millisecond prefix), unique
/// within the stream. The key and `recorded_at` never change after insert.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SensorReading {
    pub device_token: String,
    pub record_key: String,
    pub recorded_at: DateTime<Utc>,
    pub temperature_c: f64,
    pub ph_level: f64,
    pub ammonia_ppm: f64,
}

/// Append-only activity log entry, owned by a user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LogEvent {
    pub id: Uuid,
    pub user_id: String,
    pub device_id: String,
    pub device_name: String,
    pub event_type: LogEventType,
    pub severity: LogSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
