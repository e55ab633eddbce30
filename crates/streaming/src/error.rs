use foundation::FeatureId;

/// Failure of one synchronization cycle.
///
/// Neither kind is fatal: the coordinator records the message for display and
/// keeps the last committed data on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The service could not be reached (connect, timeout, dropped body).
    Transport(String),
    /// The service answered, but with a non-2xx status or an unreadable body.
    Service {
        status: Option<u16>,
        message: String,
    },
}

impl SyncError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        SyncError::Transport(err.to_string())
    }

    pub fn service(status: Option<u16>, message: impl Into<String>) -> Self {
        SyncError::Service {
            status,
            message: message.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Transport(msg) => write!(f, "service unreachable: {msg}"),
            SyncError::Service {
                status: Some(status),
                message,
            } => write!(f, "service error (HTTP {status}): {message}"),
            SyncError::Service {
                status: None,
                message,
            } => write!(f, "service error: {message}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::service(err.status().map(|s| s.as_u16()), err.to_string())
        } else {
            SyncError::transport(err)
        }
    }
}

/// An update that named a feature the render surface does not hold.
///
/// Not an error: the applier counts it and moves on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ApplyMiss {
    pub feature: FeatureId,
}

impl std::fmt::Display for ApplyMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "feature {} not present on the render surface", self.feature)
    }
}

#[cfg(test)]
mod tests {
    use super::SyncError;

    #[test]
    fn display_includes_status() {
        let e = SyncError::service(Some(500), "relation \"flows\" does not exist");
        assert_eq!(
            e.to_string(),
            "service error (HTTP 500): relation \"flows\" does not exist"
        );
        assert!(!e.is_transport());
        assert!(SyncError::transport("connection refused").is_transport());
    }
}
