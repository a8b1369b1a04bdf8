//! CSV rendering of sensor readings.

use chrono::{DateTime, Utc};

use crate::{
    db::models::SensorReading,
    error::{Result, ServiceError},
    timefmt,
};

pub const CSV_HEADER: &str = "Waktu,Suhu (°C),pH Level,Amonia (ppm)";

/// Two-decimal cell rendering; non-finite values render as `0.00`.
fn fmt2(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.2}")
    } else {
        "0.00".to_owned()
    }
}

/// Renders readings as CSV, newline-separated, header first.
///
/// An empty reading set is an `EmptyExport` error: the export surface
/// must block with a user notice instead of producing an empty file.
pub fn render_csv(readings: &[SensorReading]) -> Result<String> {
    if readings.is_empty() {
        return Err(ServiceError::EmptyExport);
    }

    let mut out = String::with_capacity(CSV_HEADER.len() + readings.len() * 48);
    out.push_str(CSV_HEADER);
    for r in readings {
        out.push('\n');
        out.push_str(&format!(
            "{},{},{},{}",
            timefmt::datetime_formatted(r.recorded_at),
            fmt2(r.temperature_c),
            fmt2(r.ph_level),
            fmt2(r.ammonia_ppm),
        ));
    }
    Ok(out)
}

/// Download filename, timestamped so repeated exports never collide.
pub fn attachment_name(device_token: &str, now: DateTime<Utc>) -> String {
    format!(
        "data_sensor_{}_{}.csv",
        device_token,
        now.format("%Y%m%dT%H%M%S")
    )
}
