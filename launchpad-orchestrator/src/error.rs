use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid resource type: {0}")]
    InvalidResourceType(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Webhook registration failed: {0}")]
    WebhookRegistrationFailed(String),

    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    #[error("Network resolution failed: {0}")]
    NetworkResolutionFailed(String),

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    /// Only surfaced by the direct stop entry point; `delete` logs and swallows it.
    #[error("Stop failed: {0}")]
    StopFailed(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Short machine-readable name, used in operation records and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidResourceType(_) => "InvalidResourceType",
            Self::InvalidInput(_) => "InvalidInput",
            Self::WebhookRegistrationFailed(_) => "WebhookRegistrationFailed",
            Self::LaunchFailed(_) => "LaunchFailed",
            Self::NetworkResolutionFailed(_) => "NetworkResolutionFailed",
            Self::PersistenceFailed(_) | Self::Database(_) | Self::Migration(_) => {
                "PersistenceFailed"
            }
            Self::StopFailed(_) => "StopFailed",
            Self::NotFound(_) => "NotFound",
            Self::InvalidState(_) => "InvalidState",
            Self::Cancelled(_) => "Cancelled",
            Self::Serialization(_) | Self::Io(_) => "Internal",
        }
    }
}
