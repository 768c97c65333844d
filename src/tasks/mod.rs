/// Confirmation tracking task
pub mod confirm;

/// Pool funding
pub mod fund;

/// Endpoint connectivity probe
pub mod health;

/// Batch round driver
pub mod scheduler;

/// Tx submission
pub mod submit;
