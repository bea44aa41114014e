use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    InvalidConfig(Vec<String>),

    #[error("settings file not found: {0}")]
    SettingsNotFound(String),

    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    #[error("template '{template}' left unresolved placeholder '{placeholder}'")]
    UnresolvedPlaceholder {
        template: &'static str,
        placeholder: String,
    },

    #[error("failed to spawn '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("'{command}' exited with status {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("'{command}' timed out after {seconds}s")]
    CommandTimedOut { command: String, seconds: u64 },

    #[error("fetch of {url} failed: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("authentication still failing after {0} credential attempt(s)")]
    CredentialsExhausted(u32),

    #[error("credential entry cancelled")]
    CredentialsCancelled,

    #[error("stage '{stage}' failed: {source}")]
    StageFailed {
        stage: &'static str,
        #[source]
        source: Box<ProvisionError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
