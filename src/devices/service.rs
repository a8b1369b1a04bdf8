use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::{
    db::models::{Device, LogEventType, LogSeverity},
    error::{Result, ServiceError},
    logs::LogService,
};

/// Registration payload. `custom_id` and `auth_token` are optional:
/// missing ids are generated, a missing token defaults to the id.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub name: String,
    pub location: String,
    pub lat: f64,
    pub lng: f64,
    pub custom_id: Option<String>,
    pub auth_token: Option<String>,
}

/// Mutable device fields; absent fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct DevicePatch {
    pub name: Option<String>,
    pub location: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct DeviceToken {
    pub token: String,
    pub device_id: String,
}

/// CRUD over registered devices. Every mutation and the token read append
/// a `configuration` audit event.
#[derive(Clone)]
pub struct DeviceService {
    pool: PgPool,
    logs: LogService,
}

const DEVICE_COLUMNS: &str =
    "id, name, location, lat, lng, user_id, auth_token, registered_at, updated_at";

impl DeviceService {
    pub fn new(pool: PgPool, logs: LogService) -> Self {
        Self { pool, logs }
    }

    /// All devices owned by `user_id`, oldest registration first.
    /// Degrades to empty on store failure (logged, not surfaced).
    pub async fn list(&self, user_id: &str) -> Vec<Device> {
        let result = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE user_id = $1 ORDER BY registered_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await;

        match result {
            Ok(devices) => devices,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to list devices");
                Vec::new()
            }
        }
    }

    pub async fn get(&self, user_id: &str, device_id: &str) -> Result<Device> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1"
        ))
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServiceError::NotFound("device"))?;

        if device.user_id != user_id {
            return Err(ServiceError::AccessDenied);
        }
        Ok(device)
    }

    pub async fn create(&self, user_id: &str, new: NewDevice) -> Result<Device> {
        let id = new.custom_id.unwrap_or_else(generate_device_id);
        let auth_token = new.auth_token.unwrap_or_else(|| id.clone());

        let device = sqlx::query_as::<_, Device>(&format!(
            r#"
            INSERT INTO devices (id, name, location, lat, lng, user_id, auth_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&new.name)
        .bind(&new.location)
        .bind(new.lat)
        .bind(new.lng)
        .bind(user_id)
        .bind(&auth_token)
        .fetch_one(&self.pool)
        .await?;

        self.logs
            .append(
                user_id,
                &device.id,
                LogEventType::Configuration,
                "Device created",
                LogSeverity::Low,
                &device.name,
            )
            .await?;

        Ok(device)
    }

    /// Mutates name/location/coordinates only; the id and token never
    /// change through this path.
    pub async fn update(&self, user_id: &str, device_id: &str, patch: DevicePatch) -> Result<Device> {
        self.get(user_id, device_id).await?;

        let device = sqlx::query_as::<_, Device>(&format!(
            r#"
            UPDATE devices
            SET name       = COALESCE($2, name),
                location   = COALESCE($3, location),
                lat        = COALESCE($4, lat),
                lng        = COALESCE($5, lng),
                updated_at = now()
            WHERE id = $1
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(device_id)
        .bind(patch.name)
        .bind(patch.location)
        .bind(patch.lat)
        .bind(patch.lng)
        .fetch_one(&self.pool)
        .await?;

        self.logs
            .append(
                user_id,
                device_id,
                LogEventType::Configuration,
                "Device updated",
                LogSeverity::Low,
                &device.name,
            )
            .await?;

        Ok(device)
    }

    /// Removes the device; its reading stream cascades away with it.
    pub async fn delete(&self, user_id: &str, device_id: &str) -> Result<()> {
        let device = self.get(user_id, device_id).await?;

        sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await?;

        self.logs
            .append(
                user_id,
                device_id,
                LogEventType::Configuration,
                "Device deleted",
                LogSeverity::Medium,
                &device.name,
            )
            .await?;

        Ok(())
    }

    /// The token addressing this device's reading stream. Reading it is
    /// itself an audited operation.
    pub async fn token(&self, user_id: &str, device_id: &str) -> Result<DeviceToken> {
        let device = self.get(user_id, device_id).await?;

        self.logs
            .append(
                user_id,
                device_id,
                LogEventType::Configuration,
                "Authentication token retrieved",
                LogSeverity::Low,
                &device.name,
            )
            .await?;

        Ok(DeviceToken {
            token: device.auth_token,
            device_id: device.id,
        })
    }

    /// Every registered device, for the background monitor only.
    pub(crate) async fn list_all(&self) -> Result<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY registered_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(devices)
    }
}

/// Opaque 10-character device id.
fn generate_device_id() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_owned()
}
