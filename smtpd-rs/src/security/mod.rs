//! Security module
//!
//! Provides authentication, rate limiting, and TLS functionality:
//! - [`auth`]: SMTP authentication mechanisms (LOGIN, PLAIN) and the credential store
//! - [`rate_limit`]: per-IP and per-identity command rate limiting
//! - [`tls`]: TLS/STARTTLS configuration and handling

pub mod auth;
pub mod rate_limit;
pub mod tls;

pub use auth::{AuthMechanism, Authenticator, Credentials};
pub use rate_limit::RateLimiter;
pub use tls::TlsConfig;
