use thiserror::Error;

/// Errors surfaced by the session core.
///
/// Commands return these synchronously; failures discovered while handling
/// engine events are delivered through [`crate::NotificationSink::on_error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("station is not playable (missing id, name or stream uri)")]
    InvalidStation,

    #[error("no stations available")]
    NoStationsAvailable,

    #[error("no station matches search query: {query}")]
    NoMatch { query: String },

    #[error("sleep timer needs active playback")]
    NotActive,

    #[error("unable to restart playback after {attempts} attempts")]
    RestartExhausted { attempts: u8 },

    #[error("playback engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("state storage failed: {0}")]
    Storage(String),
}

impl SessionError {
    /// Stable short identifier, used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidStation => "invalid_station",
            Self::NoStationsAvailable => "no_stations",
            Self::NoMatch { .. } => "no_match",
            Self::NotActive => "not_active",
            Self::RestartExhausted { .. } => "restart_exhausted",
            Self::EngineUnavailable(_) => "engine_unavailable",
            Self::Storage(_) => "storage",
        }
    }

    /// Fatal errors deserve a persistent notice; the user has to act.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RestartExhausted { .. })
    }

    /// Recoverable notices that can be shown briefly and dismissed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NoMatch { .. } | Self::NotActive)
    }
}

/// Failures of the file-backed [`crate::store::JsonStateStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::Storage(e.to_string())
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity() {
        assert!(SessionError::RestartExhausted { attempts: 5 }.is_fatal());
        assert!(!SessionError::NotActive.is_fatal());
        assert!(SessionError::NotActive.is_transient());
        assert!(SessionError::NoMatch { query: "x".into() }.is_transient());
        assert!(!SessionError::InvalidStation.is_transient());
    }

    #[test]
    fn test_store_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SessionError = StoreError::from(io).into();
        assert_eq!(err.kind(), "storage");
        assert!(err.to_string().contains("denied"));
    }
}
