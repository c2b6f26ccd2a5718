//! Minimal client for the virtualization platform's SOAP management API.
//!
//! Covers session login/logout, property retrieval, host search by IP and the
//! DVS manager's opaque-data fetch/update methods, plus synchronous waiting
//! on the tasks those updates return.
mod client;
mod soap;
#[cfg(test)]
pub(crate) mod testing;
mod transport;
mod types;

pub use client::VimClient;
pub use transport::{EndpointConfig, HttpTransport, Transport};
pub use types::{Action, ManagedObjectRef, OpaqueDataSpec, OpaqueEntry, Selection};
