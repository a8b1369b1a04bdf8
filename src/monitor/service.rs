use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tracing::{debug, error, info};

use crate::{
    db::models::{Device, LogEventType, LogSeverity},
    devices::DeviceService,
    error::Result,
    logs::LogService,
    polling::{PollTask, PollTicket},
    readings::{ReadingService, OFFLINE_AFTER_SECS},
    status::{self, StatusLevel},
    status_cache::{DeviceState, StatusCache},
};

/// Background watcher over every registered device.
///
/// Each tick it recomputes telemetry liveness and the overall water-quality
/// status from the newest reading and appends a log event on every
/// transition edge. Unchanged state emits nothing, so a pond sitting at
/// Bahaya alerts once, not once per tick.
pub struct MonitorService {
    devices: DeviceService,
    readings: ReadingService,
    logs: LogService,
    cache: StatusCache,
    interval: Duration,
}

impl MonitorService {
    pub fn new(
        devices: DeviceService,
        readings: ReadingService,
        logs: LogService,
        cache: StatusCache,
        interval_secs: u64,
    ) -> Self {
        Self {
            devices,
            readings,
            logs,
            cache,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Runs the watcher until the returned handle is stopped or dropped.
    pub fn start(self) -> PollTask {
        info!(interval_secs = self.interval.as_secs(), "Telemetry monitor started");
        let interval = self.interval;
        let service = Arc::new(self);

        PollTask::spawn(interval, move |ticket| {
            let service = service.clone();
            async move {
                if let Err(e) = service.run_once(&ticket).await {
                    error!(error = %e, "Monitor iteration failed");
                }
            }
        })
    }

    pub(crate) async fn run_once(&self, ticket: &PollTicket) -> Result<()> {
        let devices = self.devices.list_all().await?;
        if devices.is_empty() {
            debug!("No devices registered; skipping monitor iteration");
            return Ok(());
        }

        let known: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        self.cache.retain_known(&known).await;

        for device in &devices {
            let observed = match self.observe(device).await {
                Ok(state) => state,
                Err(e) => {
                    error!(device_id = %device.id, error = %e, "Failed to observe device");
                    continue;
                }
            };

            // A newer generation started or the task was stopped while this
            // observation was in flight: discard instead of applying stale
            // state.
            if !ticket.is_current() {
                return Ok(());
            }

            self.apply(device, observed).await?;
        }

        Ok(())
    }

    async fn observe(&self, device: &Device) -> Result<DeviceState> {
        let latest = self
            .readings
            .fetch_latest(&device.user_id, &device.auth_token, 1)
            .await?;

        let state = match latest.last() {
            None => DeviceState { online: false, overall: None },
            Some(reading) => {
                let age = Utc::now() - reading.recorded_at;
                let online = age < chrono::Duration::seconds(OFFLINE_AFTER_SECS);
                let overall = status::overall_status(
                    status::classify_ph(reading.ph_level).status,
                    status::classify_temperature(reading.temperature_c).status,
                    status::classify_ammonia(reading.ammonia_ppm).status,
                );
                DeviceState { online, overall: Some(overall) }
            }
        };
        Ok(state)
    }

    async fn apply(&self, device: &Device, next: DeviceState) -> Result<()> {
        let prev = self.cache.swap(&device.id, next).await;

        // First observation seeds silently except when already noteworthy.
        let telemetry_changed = match prev {
            None => next.online,
            Some(p) => p.online != next.online,
        };
        if telemetry_changed {
            let (event_type, severity, message) = if next.online {
                (LogEventType::Connection, LogSeverity::Low, "Device online")
            } else {
                (LogEventType::Disconnection, LogSeverity::Medium, "Device offline")
            };
            self.logs
                .append(&device.user_id, &device.id, event_type, message, severity, &device.name)
                .await?;
        }

        let status_changed = match prev {
            None => next.overall.is_some_and(|level| level != StatusLevel::Aman),
            Some(p) => next.overall.is_some() && p.overall != next.overall,
        };
        if status_changed {
            if let Some(level) = next.overall {
                let (event_type, severity, message) = match level {
                    StatusLevel::Aman => (
                        LogEventType::Threshold,
                        LogSeverity::Low,
                        "Water quality back to Aman",
                    ),
                    StatusLevel::Waspada => (
                        LogEventType::Threshold,
                        LogSeverity::Medium,
                        "Water quality status: Waspada",
                    ),
                    StatusLevel::Bahaya => (
                        LogEventType::Alert,
                        LogSeverity::High,
                        "Water quality status: Bahaya",
                    ),
                };
                self.logs
                    .append(&device.user_id, &device.id, event_type, message, severity, &device.name)
                    .await?;
            }
        }

        Ok(())
    }
}
