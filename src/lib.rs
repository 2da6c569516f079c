//! Queue assignment for fleets of worker hosts.
//!
//! Each host runs a number of worker slots and asks which queues each slot
//! should poll. Answers combine weighted queue distribution with manually
//! declared overrides that pin queue sets to slots. Hosts claim overrides
//! one unit at a time through the shared [`store`]; all state is split into
//! independent namespaces.

pub mod config;
pub mod coordinator;
pub mod dashboard;
pub mod error;
pub mod namespace;
pub mod scheduler;
pub mod shutdown;
pub mod store;

pub use coordinator::Coordinator;
pub use error::{QtrixError, Result};
pub use namespace::{Namespace, Namespacing};
