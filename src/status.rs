//! Water-quality status classification.
//!
//! Pure functions mapping a single measurement to a three-level status
//! (Aman / Waspada / Bahaya) plus remediation guidance, and a combinator
//! reducing the three per-parameter statuses to one overall status.
//! Recommendation texts are the operational guidance shown to farm
//! operators and are kept in Indonesian.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Severity-ordered: `Aman < Waspada < Bahaya`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub enum StatusLevel {
    Aman,
    Waspada,
    Bahaya,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusLevel::Aman => "Aman",
            StatusLevel::Waspada => "Waspada",
            StatusLevel::Bahaya => "Bahaya",
        };
        f.write_str(s)
    }
}

/// Classification result for a single measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusDetail {
    pub status: StatusLevel,
    pub recommendation: &'static str,
    pub css_class: &'static str,
}

const CLASS_AMAN: &str = "text-green-500";
const CLASS_WASPADA: &str = "text-yellow-500";
const CLASS_BAHAYA: &str = "text-red-500";

/// Non-finite measurements (NaN, ±∞) never reach a numeric branch: they
/// classify Bahaya with a sensor-fault recommendation.
const SENSOR_FAULT: &str =
    "Periksa sensor: pembacaan tidak valid (bukan angka). Kalibrasi atau ganti probe sensor.";

fn sensor_fault() -> StatusDetail {
    StatusDetail {
        status: StatusLevel::Bahaya,
        recommendation: SENSOR_FAULT,
        css_class: CLASS_BAHAYA,
    }
}

/// pH: Aman [6.8, 7.8], Waspada [6.0, 6.7] ∪ [7.9, 8.5], Bahaya otherwise.
pub fn classify_ph(ph_level: f64) -> StatusDetail {
    if !ph_level.is_finite() {
        return sensor_fault();
    }
    if (6.8..=7.8).contains(&ph_level) {
        return StatusDetail {
            status: StatusLevel::Aman,
            recommendation:
                "Pertahankan. Monitor rutin. Pastikan pakan tidak berlebih dan filter berjalan baik.",
            css_class: CLASS_AMAN,
        };
    }
    if (6.0..=6.7).contains(&ph_level) || (7.9..=8.5).contains(&ph_level) {
        // Slightly acidic and slightly alkaline need different handling.
        let recommendation = if ph_level <= 6.7 {
            "1. Tingkatkan aerasi.\n2. Cek pakan: jangan berlebih.\n3. Buffer bertahap: tambahkan pH-up, kapur pertanian (CaCO3) / kulit kerang sedikit demi sedikit."
        } else {
            "1. Ganti air sebagian (20-30%) dengan air netral.\n2. Tingkatkan aerasi.\n3. Tambahkan bahan alami seperti daun ketapang kering (jika sesuai ekosistem)."
        };
        return StatusDetail {
            status: StatusLevel::Waspada,
            recommendation,
            css_class: CLASS_WASPADA,
        };
    }
    let recommendation = if ph_level < 6.0 {
        "1. DARURAT: Ganti air (30-50%) dengan air baru ter-buffer netral.\n2. Buffer aktif: kapur pertanian/dolomit dosis terukur.\n3. Cek sumber air. Pindahkan ikan ke bak karantina jika memungkinkan."
    } else {
        "1. DARURAT: Ganti air (30-50%).\n2. Cari penyebab: kemungkinan ledakan alga (fotosintesis berlebih) -> beri naungan.\n3. Gunakan buffer pH-down secara hati-hati dan bertahap."
    };
    StatusDetail {
        status: StatusLevel::Bahaya,
        recommendation,
        css_class: CLASS_BAHAYA,
    }
}

/// Temperature °C: Aman [25, 30], Waspada [22, 25) ∪ (30, 32], Bahaya otherwise.
pub fn classify_temperature(temperature_c: f64) -> StatusDetail {
    if !temperature_c.is_finite() {
        return sensor_fault();
    }
    if (25.0..=30.0).contains(&temperature_c) {
        return StatusDetail {
            status: StatusLevel::Aman,
            recommendation:
                "Pertahankan. Pastikan sirkulasi air baik. Heater/chiller berfungsi normal.",
            css_class: CLASS_AMAN,
        };
    }
    if (22.0..25.0).contains(&temperature_c)
        || (temperature_c > 30.0 && temperature_c <= 32.0)
    {
        let recommendation = if temperature_c < 25.0 {
            "1. Nyalakan/cek heater (target 26°C).\n2. Kurangi pakan: metabolisme melambat."
        } else {
            "1. Tambah aerasi maksimal (O2 turun saat panas).\n2. Beri naungan (paranet/jaring).\n3. Kurangi pakan (stres panas)."
        };
        return StatusDetail {
            status: StatusLevel::Waspada,
            recommendation,
            css_class: CLASS_WASPADA,
        };
    }
    let recommendation = if temperature_c < 22.0 {
        "1. DARURAT: Cek heater dan kapasitasnya.\n2. Stop pakan sementara.\n3. Isolasi kolam dari angin malam."
    } else {
        "1. DARURAT: Tambah aerasi maksimal segera.\n2. Naungan penuh.\n3. Ganti air (20%) dengan yang lebih sejuk (bedanya <=4°C).\n4. Kolam kecil: gunakan botol berisi es tertutup (jangan es langsung)."
    };
    StatusDetail {
        status: StatusLevel::Bahaya,
        recommendation,
        css_class: CLASS_BAHAYA,
    }
}

/// Ammonia ppm: Aman [0, 0.2], Waspada (0.2, 0.5], Bahaya otherwise
/// (negative readings fall through to Bahaya).
pub fn classify_ammonia(ammonia_ppm: f64) -> StatusDetail {
    if !ammonia_ppm.is_finite() {
        return sensor_fault();
    }
    if (0.0..=0.2).contains(&ammonia_ppm) {
        return StatusDetail {
            status: StatusLevel::Aman,
            recommendation:
                "Pertahankan. Jaga manajemen pakan (jangan berlebih). Bersihkan filter mekanis rutin.",
            css_class: CLASS_AMAN,
        };
    }
    if ammonia_ppm > 0.2 && ammonia_ppm <= 0.5 {
        return StatusDetail {
            status: StatusLevel::Waspada,
            recommendation:
                "1. Kurangi/stop pakan 1 hari (atau kurangi 50%).\n2. Ganti air (25-30%).\n3. Cek filter biologis. Tambahkan bakteri starter/probiotik.",
            css_class: CLASS_WASPADA,
        };
    }
    StatusDetail {
        status: StatusLevel::Bahaya,
        recommendation:
            "1. DARURAT: Ganti air (50%).\n2. Stop pakan 1-2 hari.\n3. Tambah aerasi maksimal.\n4. Gunakan ammonia binder/detoxifier.\n5. Cek kemungkinan bangkai ikan di dasar.",
        css_class: CLASS_BAHAYA,
    }
}

/// Most severe of the three inputs wins; argument order is irrelevant.
pub fn overall_status(ph: StatusLevel, temperature: StatusLevel, ammonia: StatusLevel) -> StatusLevel {
    ph.max(temperature).max(ammonia)
}

/// Presentation metadata for an overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusDisplay {
    pub emoji: &'static str,
    pub css_class: &'static str,
}

pub fn display(status: StatusLevel) -> StatusDisplay {
    match status {
        StatusLevel::Aman => StatusDisplay { emoji: "✅", css_class: CLASS_AMAN },
        StatusLevel::Waspada => StatusDisplay { emoji: "⚠️", css_class: CLASS_WASPADA },
        StatusLevel::Bahaya => StatusDisplay { emoji: "🚨", css_class: CLASS_BAHAYA },
    }
}
