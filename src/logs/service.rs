use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::models::{LogEvent, LogEventType, LogSeverity},
    error::{Result, ServiceError},
    timefmt,
};

pub const DEFAULT_FETCH_LIMIT: i64 = 100;
pub const DEFAULT_ALERT_LIMIT: i64 = 5;

/// Date bucket for server-side log filtering, relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DateBucket {
    Today,
    Week,
    Month,
}

impl DateBucket {
    /// Lower bound of the bucket. `today` starts at Jakarta midnight, the
    /// sliding buckets are plain offsets from now.
    pub fn start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            DateBucket::Today => timefmt::jakarta_midnight(now),
            DateBucket::Week => now - Duration::days(7),
            DateBucket::Month => now - Duration::days(30),
        }
    }
}

/// Combined filter set for the log review page.
///
/// `event_type`, `severity` and `range` are evaluated server-side; `search`
/// is a case-insensitive substring match over message and device name,
/// applied to the server-side result.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct LogFilters {
    pub search: Option<String>,
    pub event_type: Option<LogEventType>,
    pub severity: Option<LogSeverity>,
    pub range: Option<DateBucket>,
}

/// Append-only activity log, keyed by owning user.
#[derive(Clone)]
pub struct LogService {
    pool: PgPool,
}

impl LogService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends one event. Mutations always propagate failures.
    pub async fn append(
        &self,
        user_id: &str,
        device_id: &str,
        event_type: LogEventType,
        message: &str,
        severity: LogSeverity,
        device_name: &str,
    ) -> Result<LogEvent> {
        let event = sqlx::query_as::<_, LogEvent>(
            r#"
            INSERT INTO log_events (user_id, device_id, device_name, event_type, severity, message)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, device_id, device_name, event_type, severity, message, created_at
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .bind(device_name)
        .bind(event_type)
        .bind(severity)
        .bind(message)
        .fetch_one(&self.pool)
        .await?;
        Ok(event)
    }

    /// Newest-first, up to `limit` events. Degrades to empty on store
    /// failure (logged, not surfaced).
    pub async fn fetch(&self, user_id: &str, limit: i64) -> Vec<LogEvent> {
        let result = sqlx::query_as::<_, LogEvent>(
            r#"
            SELECT id, user_id, device_id, device_name, event_type, severity, message, created_at
            FROM log_events
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;

        match result {
            Ok(events) => events,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to fetch log events");
                Vec::new()
            }
        }
    }

    /// Server-side type/severity/date filters, then the client-side search
    /// term. Newest-first. Degrades to empty on store failure.
    pub async fn fetch_filtered(&self, user_id: &str, filters: &LogFilters) -> Vec<LogEvent> {
        let since = filters.range.map(|bucket| bucket.start(Utc::now()));

        let result = sqlx::query_as::<_, LogEvent>(
            r#"
            SELECT id, user_id, device_id, device_name, event_type, severity, message, created_at
            FROM log_events
            WHERE user_id = $1
              AND ($2::log_event_type IS NULL OR event_type = $2)
              AND ($3::log_severity   IS NULL OR severity   = $3)
              AND ($4::timestamptz    IS NULL OR created_at >= $4)
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(filters.event_type)
        .bind(filters.severity)
        .bind(since)
        .fetch_all(&self.pool)
        .await;

        let mut events = match result {
            Ok(events) => events,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to filter log events");
                return Vec::new();
            }
        };

        if let Some(term) = filters.search.as_deref() {
            let term = term.to_lowercase();
            events.retain(|event| {
                event.message.to_lowercase().contains(&term)
                    || event.device_name.to_lowercase().contains(&term)
            });
        }

        events
    }

    /// Newest-first events with severity high or medium — the dashboard's
    /// alert widget. Degrades to empty on store failure.
    pub async fn recent_alerts(&self, user_id: &str, limit: i64) -> Vec<LogEvent> {
        let result = sqlx::query_as::<_, LogEvent>(
            r#"
            SELECT id, user_id, device_id, device_name, event_type, severity, message, created_at
            FROM log_events
            WHERE user_id = $1
              AND severity IN ('high', 'medium')
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;

        match result {
            Ok(events) => events,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to fetch recent alerts");
                Vec::new()
            }
        }
    }

    /// Removes one event after confirming the caller owns it.
    pub async fn delete(&self, user_id: &str, log_id: Uuid) -> Result<()> {
        let owner: Option<(String,)> =
            sqlx::query_as("SELECT user_id FROM log_events WHERE id = $1")
                .bind(log_id)
                .fetch_optional(&self.pool)
                .await?;

        match owner {
            None => Err(ServiceError::NotFound("log event")),
            Some((owner_id,)) if owner_id != user_id => Err(ServiceError::AccessDenied),
            Some(_) => {
                sqlx::query("DELETE FROM log_events WHERE id = $1")
                    .bind(log_id)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
        }
    }
}
