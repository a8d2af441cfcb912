//! Shared backing service for a fleet: directory plus pub/sub fan-out.

pub mod server;

pub use server::{HubHandle, HubServer};
