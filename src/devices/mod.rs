mod service;

pub use service::{DevicePatch, DeviceService, DeviceToken, NewDevice};
