mod service;

pub use service::{
    ReadingPatch, ReadingService, SensorMetadata, TelemetryStatus, WindowReadings,
    OFFLINE_AFTER_SECS,
};
