use std::fmt;

use serde::Serialize;

/// Failure raised by a collector or by the scheduler's own tick machinery.
///
/// Every collector failure is converted into one of these variants at the
/// fan-out boundary; a failure never terminates the scheduler. Detail strings
/// (raw syscall names, subprocess stderr) stay on the log path and are kept
/// out of [`CollectorError::user_message`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollectorError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("system call failed: {0}")]
    SystemCall(String),

    #[error("no data available")]
    DataUnavailable,

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("disk access failed: {0}")]
    DiskAccessFailed(String),

    #[error("sensor unavailable")]
    SensorUnavailable,

    #[error("GPU unavailable")]
    GpuUnavailable,

    #[error("collection timed out: {0}")]
    Timeout(String),
}

impl CollectorError {
    pub(crate) fn invalid_data<S: Into<String>>(msg: S) -> Self {
        CollectorError::InvalidData(msg.into())
    }

    pub(crate) fn timeout<S: Into<String>>(msg: S) -> Self {
        CollectorError::Timeout(msg.into())
    }

    /// The classification kind used for tallying and rate limiting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollectorError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            CollectorError::SystemCall(_) => ErrorKind::SystemCall,
            CollectorError::DataUnavailable => ErrorKind::DataUnavailable,
            CollectorError::InvalidData(_) => ErrorKind::InvalidData,
            CollectorError::NetworkUnavailable => ErrorKind::NetworkUnavailable,
            CollectorError::DiskAccessFailed(_) => ErrorKind::DiskAccessFailed,
            CollectorError::SensorUnavailable => ErrorKind::SensorUnavailable,
            CollectorError::GpuUnavailable => ErrorKind::GpuUnavailable,
            CollectorError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Human-readable description safe for display, with a recovery
    /// suggestion where one exists. Technical detail strings are excluded.
    pub fn user_message(&self) -> String {
        match self {
            CollectorError::PermissionDenied(_) => {
                "Access to a system metric was denied. Grant permission in System Settings and try again.".to_string()
            },
            CollectorError::SystemCall(_) => "A system query failed while collecting metrics.".to_string(),
            CollectorError::DataUnavailable => "Metric data is currently unavailable.".to_string(),
            CollectorError::InvalidData(_) => "A metric source returned unreadable data.".to_string(),
            CollectorError::NetworkUnavailable => "Network statistics are unavailable.".to_string(),
            CollectorError::DiskAccessFailed(_) => "Disk statistics could not be read.".to_string(),
            CollectorError::SensorUnavailable => "Temperature sensors are unavailable on this machine.".to_string(),
            CollectorError::GpuUnavailable => "GPU metrics are unavailable on this machine.".to_string(),
            CollectorError::Timeout(_) => "Metric collection took too long and was abandoned.".to_string(),
        }
    }
}

/// Discriminant-only view of [`CollectorError`], used as the tally key by the
/// error/backoff policy and carried on subscriber error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    PermissionDenied,
    SystemCall,
    DataUnavailable,
    InvalidData,
    NetworkUnavailable,
    DiskAccessFailed,
    SensorUnavailable,
    GpuUnavailable,
    Timeout,
}

impl ErrorKind {
    /// Default visibility table: permission failures are surfaced to the
    /// user, everything else is log-only. The embedder can override this
    /// per kind through the error policy.
    pub fn is_user_visible(self) -> bool {
        matches!(self, ErrorKind::PermissionDenied)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::SystemCall => "system_call",
            ErrorKind::DataUnavailable => "data_unavailable",
            ErrorKind::InvalidData => "invalid_data",
            ErrorKind::NetworkUnavailable => "network_unavailable",
            ErrorKind::DiskAccessFailed => "disk_access_failed",
            ErrorKind::SensorUnavailable => "sensor_unavailable",
            ErrorKind::GpuUnavailable => "gpu_unavailable",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Result type for darwin-sampler operations.
pub type Result<T> = std::result::Result<T, CollectorError>;
