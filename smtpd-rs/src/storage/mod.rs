//! Message storage backends

pub mod maildir;

pub use maildir::MaildirStorage;
