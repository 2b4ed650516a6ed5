//! Transport to the ensemble.

mod backoff;
mod connection;
mod host_provider;

pub use backoff::Backoff;
pub use connection::{Connection, ConnectionId};
pub use host_provider::HostProvider;
