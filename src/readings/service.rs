use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::models::SensorReading,
    error::{Result, ServiceError},
    polling, timefmt,
};

/// A device whose newest reading is older than this is offline.
pub const OFFLINE_AFTER_SECS: i64 = 3 * 60;

/// Liveness inferred from the recency of the latest reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone)]
pub struct SensorMetadata {
    pub device_token: String,
    pub telemetry_status: TelemetryStatus,
}

/// Options bag for a point edit. Absent fields stay untouched; the record
/// key and timestamp are immutable through this path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadingPatch {
    pub temperature_c: Option<f64>,
    pub ph_level: Option<f64>,
    pub ammonia_ppm: Option<f64>,
}

/// Window query result: the readings plus the poll cadence the viewer
/// should refetch at (absent for windows that should not poll).
#[derive(Debug, Clone)]
pub struct WindowReadings {
    pub readings: Vec<SensorReading>,
    pub poll_interval: Option<Duration>,
}

/// Mediates every read and write of a device's time-series stream.
/// Each operation verifies ownership first and propagates that failure
/// unchanged.
#[derive(Clone)]
pub struct ReadingService {
    pool: PgPool,
}

const READING_COLUMNS: &str =
    "device_token, record_key, recorded_at, temperature_c, ph_level, ammonia_ppm";

impl ReadingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fails with `AccessDenied` unless a device with this token exists
    /// and belongs to `user_id`. No reading data is touched on failure.
    pub async fn verify_ownership(&self, user_id: &str, device_token: &str) -> Result<()> {
        let owner: Option<(String,)> =
            sqlx::query_as("SELECT user_id FROM devices WHERE auth_token = $1")
                .bind(device_token)
                .fetch_optional(&self.pool)
                .await?;

        match owner {
            Some((owner_id,)) if owner_id == user_id => Ok(()),
            _ => Err(ServiceError::AccessDenied),
        }
    }

    /// Up to `count` most recent readings. The store yields newest-first;
    /// the result is reversed so callers chart oldest-first.
    pub async fn fetch_latest(
        &self,
        user_id: &str,
        device_token: &str,
        count: u32,
    ) -> Result<Vec<SensorReading>> {
        self.verify_ownership(user_id, device_token).await?;

        let mut readings = sqlx::query_as::<_, SensorReading>(&format!(
            r#"
            SELECT {READING_COLUMNS}
            FROM sensor_readings
            WHERE device_token = $1
            ORDER BY recorded_at DESC
            LIMIT $2
            "#
        ))
        .bind(device_token)
        .bind(i64::from(count))
        .fetch_all(&self.pool)
        .await?;

        readings.reverse();
        Ok(readings)
    }

    /// All readings with `start <= recorded_at <= end`, both bounds
    /// inclusive, oldest-first.
    pub async fn fetch_by_range(
        &self,
        user_id: &str,
        device_token: &str,
        start_millis: i64,
        end_millis: i64,
    ) -> Result<Vec<SensorReading>> {
        self.verify_ownership(user_id, device_token).await?;

        let start = timefmt::from_millis(start_millis)
            .ok_or_else(|| ServiceError::InvalidTimestamp(start_millis.to_string()))?;
        let end = timefmt::from_millis(end_millis)
            .ok_or_else(|| ServiceError::InvalidTimestamp(end_millis.to_string()))?;

        let readings = sqlx::query_as::<_, SensorReading>(&format!(
            r#"
            SELECT {READING_COLUMNS}
            FROM sensor_readings
            WHERE device_token = $1
              AND recorded_at >= $2
              AND recorded_at <= $3
            ORDER BY recorded_at ASC
            "#
        ))
        .bind(device_token)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(readings)
    }

    /// The dashboard period selector: latest `window_minutes` readings
    /// plus the refresh cadence for that window.
    pub async fn fetch_window(
        &self,
        user_id: &str,
        device_token: &str,
        window_minutes: u32,
    ) -> Result<WindowReadings> {
        let readings = self
            .fetch_latest(user_id, device_token, window_minutes)
            .await?;
        Ok(WindowReadings {
            readings,
            poll_interval: polling::refresh_interval(window_minutes, false),
        })
    }

    /// Online iff the newest reading is younger than `OFFLINE_AFTER_SECS`;
    /// offline when the stream is empty.
    pub async fn fetch_metadata(
        &self,
        user_id: &str,
        device_token: &str,
    ) -> Result<SensorMetadata> {
        self.verify_ownership(user_id, device_token).await?;

        let latest: Option<(chrono::DateTime<Utc>,)> = sqlx::query_as(
            r#"
            SELECT recorded_at
            FROM sensor_readings
            WHERE device_token = $1
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(device_token)
        .fetch_optional(&self.pool)
        .await?;

        let telemetry_status = match latest {
            Some((recorded_at,))
                if Utc::now() - recorded_at < chrono::Duration::seconds(OFFLINE_AFTER_SECS) =>
            {
                TelemetryStatus::Online
            }
            _ => TelemetryStatus::Offline,
        };

        Ok(SensorMetadata {
            device_token: device_token.to_owned(),
            telemetry_status,
        })
    }

    /// Inserts a reading at the caller-supplied timestamp. Timestamp
    /// parseability is the caller's duty; values outside the representable
    /// range are rejected here.
    pub async fn add(
        &self,
        user_id: &str,
        device_token: &str,
        timestamp_millis: i64,
        temperature_c: f64,
        ph_level: f64,
        ammonia_ppm: f64,
    ) -> Result<SensorReading> {
        self.verify_ownership(user_id, device_token).await?;

        let recorded_at = timefmt::from_millis(timestamp_millis)
            .ok_or_else(|| ServiceError::InvalidTimestamp(timestamp_millis.to_string()))?;

        let reading = sqlx::query_as::<_, SensorReading>(&format!(
            r#"
            INSERT INTO sensor_readings
                (device_token, record_key, recorded_at, temperature_c, ph_level, ammonia_ppm)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {READING_COLUMNS}
            "#
        ))
        .bind(device_token)
        .bind(record_key(timestamp_millis))
        .bind(recorded_at)
        .bind(temperature_c)
        .bind(ph_level)
        .bind(ammonia_ppm)
        .fetch_one(&self.pool)
        .await?;

        Ok(reading)
    }

    /// Updates only the fields present in `patch`.
    pub async fn edit_by_key(
        &self,
        user_id: &str,
        device_token: &str,
        record_key: &str,
        patch: ReadingPatch,
    ) -> Result<SensorReading> {
        self.verify_ownership(user_id, device_token).await?;

        let reading = sqlx::query_as::<_, SensorReading>(&format!(
            r#"
            UPDATE sensor_readings
            SET temperature_c = COALESCE($3, temperature_c),
                ph_level      = COALESCE($4, ph_level),
                ammonia_ppm   = COALESCE($5, ammonia_ppm)
            WHERE device_token = $1
              AND record_key = $2
            RETURNING {READING_COLUMNS}
            "#
        ))
        .bind(device_token)
        .bind(record_key)
        .bind(patch.temperature_c)
        .bind(patch.ph_level)
        .bind(patch.ammonia_ppm)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServiceError::NotFound("sensor reading"))?;

        Ok(reading)
    }

    /// Removes exactly one reading.
    pub async fn delete_by_key(
        &self,
        user_id: &str,
        device_token: &str,
        record_key: &str,
    ) -> Result<()> {
        self.verify_ownership(user_id, device_token).await?;

        let result = sqlx::query(
            "DELETE FROM sensor_readings WHERE device_token = $1 AND record_key = $2",
        )
        .bind(device_token)
        .bind(record_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("sensor reading"));
        }
        Ok(())
    }

    /// Removes the whole stream. Deleting an empty stream is a no-op,
    /// not an error.
    pub async fn delete_all(&self, user_id: &str, device_token: &str) -> Result<u64> {
        self.verify_ownership(user_id, device_token).await?;

        let result = sqlx::query("DELETE FROM sensor_readings WHERE device_token = $1")
            .bind(device_token)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Opaque stream key: zero-padded millisecond prefix keeps lexicographic
/// order aligned with time order; the suffix disambiguates same-millisecond
/// inserts.
fn record_key(timestamp_millis: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{timestamp_millis:013}-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{devices::{DeviceService, NewDevice}, logs::LogService};

    const BASE_MILLIS: i64 = 1_748_797_200_000; // 2025-06-01 17:00:00 UTC

    fn service(pool: &PgPool) -> ReadingService {
        ReadingService::new(pool.clone())
    }

    async fn register_device(pool: &PgPool, user_id: &str, token: &str) {
        let devices = DeviceService::new(pool.clone(), LogService::new(pool.clone()));
        devices
            .create(
                user_id,
                NewDevice {
                    name: "Kolam Utara".to_owned(),
                    location: "Blok A".to_owned(),
                    lat: -6.2,
                    lng: 106.8,
                    custom_id: None,
                    auth_token: Some(token.to_owned()),
                },
            )
            .await
            .unwrap();
    }

    async fn add(svc: &ReadingService, millis: i64) -> SensorReading {
        svc.add("u1", "tok1", millis, 26.0, 7.0, 0.1).await.unwrap()
    }

    #[test]
    fn record_keys_sort_chronologically() {
        let early = record_key(BASE_MILLIS);
        let late = record_key(BASE_MILLIS + 1);
        assert!(early < late);
        assert_ne!(record_key(BASE_MILLIS), record_key(BASE_MILLIS));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn ownership_is_checked_before_any_read(pool: PgPool) {
        register_device(&pool, "u1", "tok1").await;
        let svc = service(&pool);
        add(&svc, BASE_MILLIS).await;

        // Wrong user, unknown token: both AccessDenied.
        assert!(matches!(
            svc.fetch_latest("u2", "tok1", 1).await.unwrap_err(),
            ServiceError::AccessDenied
        ));
        assert!(matches!(
            svc.fetch_latest("u1", "no-such-token", 1).await.unwrap_err(),
            ServiceError::AccessDenied
        ));
        assert!(matches!(
            svc.delete_all("u2", "tok1").await.unwrap_err(),
            ServiceError::AccessDenied
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn fetch_latest_is_chronological_and_idempotent(pool: PgPool) {
        register_device(&pool, "u1", "tok1").await;
        let svc = service(&pool);
        for i in 0..5 {
            add(&svc, BASE_MILLIS + i * 1_000).await;
        }

        let first = svc.fetch_latest("u1", "tok1", 3).await.unwrap();
        assert_eq!(first.len(), 3);
        // Most recent three, presented oldest-first.
        assert!(first.windows(2).all(|w| w[0].recorded_at < w[1].recorded_at));
        assert_eq!(first[2].recorded_at.timestamp_millis(), BASE_MILLIS + 4_000);

        let second = svc.fetch_latest("u1", "tok1", 3).await.unwrap();
        let keys: Vec<_> = first.iter().map(|r| r.record_key.clone()).collect();
        let keys2: Vec<_> = second.iter().map(|r| r.record_key.clone()).collect();
        assert_eq!(keys, keys2);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn range_bounds_are_inclusive(pool: PgPool) {
        register_device(&pool, "u1", "tok1").await;
        let svc = service(&pool);

        let start = BASE_MILLIS;
        let end = BASE_MILLIS + 10_000;
        add(&svc, start - 1).await;
        add(&svc, start).await;
        add(&svc, start + 5_000).await;
        add(&svc, end).await;
        add(&svc, end + 1).await;

        let readings = svc.fetch_by_range("u1", "tok1", start, end).await.unwrap();
        let millis: Vec<_> = readings
            .iter()
            .map(|r| r.recorded_at.timestamp_millis())
            .collect();
        assert_eq!(millis, vec![start, start + 5_000, end]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn edit_changes_only_patched_fields(pool: PgPool) {
        register_device(&pool, "u1", "tok1").await;
        let svc = service(&pool);
        let original = add(&svc, BASE_MILLIS).await;

        let edited = svc
            .edit_by_key(
                "u1",
                "tok1",
                &original.record_key,
                ReadingPatch { temperature_c: Some(30.0), ..ReadingPatch::default() },
            )
            .await
            .unwrap();

        assert_eq!(edited.temperature_c, 30.0);
        assert_eq!(edited.ph_level, original.ph_level);
        assert_eq!(edited.ammonia_ppm, original.ammonia_ppm);
        assert_eq!(edited.record_key, original.record_key);
        assert_eq!(edited.recorded_at, original.recorded_at);

        let reread = svc.fetch_latest("u1", "tok1", 1).await.unwrap();
        assert_eq!(reread[0].temperature_c, 30.0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn edit_missing_key_is_not_found(pool: PgPool) {
        register_device(&pool, "u1", "tok1").await;
        let svc = service(&pool);

        let err = svc
            .edit_by_key("u1", "tok1", "missing", ReadingPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn delete_by_key_removes_exactly_one(pool: PgPool) {
        register_device(&pool, "u1", "tok1").await;
        let svc = service(&pool);
        let first = add(&svc, BASE_MILLIS).await;
        add(&svc, BASE_MILLIS + 1_000).await;

        svc.delete_by_key("u1", "tok1", &first.record_key).await.unwrap();
        let left = svc.fetch_latest("u1", "tok1", 10).await.unwrap();
        assert_eq!(left.len(), 1);

        let err = svc
            .delete_by_key("u1", "tok1", &first.record_key)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn delete_all_is_a_noop_on_empty_stream(pool: PgPool) {
        register_device(&pool, "u1", "tok1").await;
        let svc = service(&pool);

        assert_eq!(svc.delete_all("u1", "tok1").await.unwrap(), 0);

        add(&svc, BASE_MILLIS).await;
        add(&svc, BASE_MILLIS + 1_000).await;
        assert_eq!(svc.delete_all("u1", "tok1").await.unwrap(), 2);
        assert!(svc.fetch_latest("u1", "tok1", 10).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn metadata_reflects_reading_recency(pool: PgPool) {
        register_device(&pool, "u1", "tok1").await;
        let svc = service(&pool);

        // Empty stream: offline.
        let meta = svc.fetch_metadata("u1", "tok1").await.unwrap();
        assert_eq!(meta.telemetry_status, TelemetryStatus::Offline);

        // Stale reading: offline.
        let stale = Utc::now() - chrono::Duration::minutes(10);
        add(&svc, stale.timestamp_millis()).await;
        let meta = svc.fetch_metadata("u1", "tok1").await.unwrap();
        assert_eq!(meta.telemetry_status, TelemetryStatus::Offline);

        // Fresh reading: online.
        add(&svc, Utc::now().timestamp_millis()).await;
        let meta = svc.fetch_metadata("u1", "tok1").await.unwrap();
        assert_eq!(meta.telemetry_status, TelemetryStatus::Online);
        assert_eq!(meta.device_token, "tok1");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn window_carries_poll_cadence(pool: PgPool) {
        register_device(&pool, "u1", "tok1").await;
        let svc = service(&pool);
        for i in 0..3 {
            add(&svc, BASE_MILLIS + i * 1_000).await;
        }

        let window = svc.fetch_window("u1", "tok1", 1).await.unwrap();
        assert_eq!(window.readings.len(), 1);
        assert_eq!(window.poll_interval, Some(Duration::from_secs(5)));

        let window = svc.fetch_window("u1", "tok1", 1440).await.unwrap();
        assert_eq!(window.readings.len(), 3);
        assert_eq!(window.poll_interval, None);
    }
}
