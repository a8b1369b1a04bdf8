mod service;

pub use service::MonitorService;
