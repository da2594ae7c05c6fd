use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeycloakError {
    #[error("HTTP request to Keycloak failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Keycloak answered {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid realm JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type KeycloakResult<T> = Result<T, KeycloakError>;

/// Broad cause of a Keycloak failure, used to pick a remedy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No usable answer from the server
    Unreachable,
    /// The admin credentials were refused
    Unauthorized,
    /// The server answered but refused the request
    Rejected,
    /// The realm file could not be read or parsed
    RealmFile,
}

impl KeycloakError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Http(e) if e.is_decode() => FailureKind::Rejected,
            Self::Http(_) => FailureKind::Unreachable,
            Self::Status {
                status: 401 | 403, ..
            } => FailureKind::Unauthorized,
            Self::Status { .. } => FailureKind::Rejected,
            Self::Io { .. } | Self::Json { .. } => FailureKind::RealmFile,
        }
    }
}
