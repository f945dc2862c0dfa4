/// Anti-abuse module
///
/// Provides greylisting and DNSBL reputation checks

pub mod dnsbl;
pub mod greylist;
pub mod types;

pub use dnsbl::{DnsblGate, DnsblVerdict};
pub use greylist::GreylistStore;
pub use types::{GreylistEntry, GreylistVerdict};
