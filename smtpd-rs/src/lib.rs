//! smtpd-rs: SMTP receiving server with layered abuse policies
//!
//! An async SMTP server that drives each connection through the command
//! dialog under per-phase deadlines and composes anti-abuse policy around
//! the state machine.
//!
//! # Features
//!
//! - **Protocol state machine**: EHLO/HELO, MAIL FROM, RCPT TO, DATA,
//!   RSET, QUIT under greeting/command/data deadlines
//! - **STARTTLS**: in-band upgrade that discards pre-handshake plaintext
//! - **AUTH**: PLAIN and LOGIN against an Argon2/SQLite credential store
//! - **Rate limiting**: per-IP and per-identity fixed windows
//! - **Greylisting**: temporary rejection of first-seen triplets
//! - **DNSBL**: reputation rejection with a bounded, fail-open lookup
//! - **Webhooks**: asynchronous notification of completed transactions
//!
//! # Example
//!
//! ```no_run
//! use smtpd_rs::config::Config;
//! use smtpd_rs::smtp::SmtpServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let server = SmtpServer::bind(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: configuration management
//! - [`error`]: error types and handling
//! - [`smtp`]: protocol implementation
//! - [`antispam`]: greylisting and DNSBL
//! - [`security`]: TLS, authentication, rate limiting
//! - [`storage`]: delivery handoff
//! - [`webhook`]: transaction notification

pub mod antispam;
pub mod config;
pub mod error;
pub mod security;
pub mod smtp;
pub mod storage;
pub mod utils;
pub mod webhook;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, SmtpdError};
pub use smtp::SmtpServer;
