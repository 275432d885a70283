//! Errores del core de monitoreo.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MonitoringError {
    #[error("invalid order clause: {0}")] InvalidOrder(String),
    #[error("invalid schema: {0}")] Schema(String),
    #[error("invalid report window: from {from} is after to {to}")]
    InvalidReportWindow { from: DateTime<Utc>, to: DateTime<Utc> },
    #[error("task queue: {0}")] TaskQueue(String),
    #[error("storage: {0}")] Storage(String),
}
