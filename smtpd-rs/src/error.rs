use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmtpdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Credential decode error: {0}")]
    AuthDecode(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SmtpdError>;
