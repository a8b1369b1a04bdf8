mod service;

pub use service::{
    DateBucket, LogFilters, LogService, DEFAULT_ALERT_LIMIT, DEFAULT_FETCH_LIMIT,
};
