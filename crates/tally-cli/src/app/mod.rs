pub mod config;
pub mod entities;
pub mod progress;
pub mod report;
pub mod telemetry;
pub mod shutdown;
