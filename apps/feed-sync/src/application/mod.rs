//! Application Layer - Services and port definitions.
//!
//! This layer owns the stateful services (subscription registry,
//! synchronizer, canonical stores) and the ports through which they reach
//! the network.

/// Port interfaces for the backend, the push transport and channel control.
pub mod ports;

/// Registry, synchronizer and store services.
pub mod services;
