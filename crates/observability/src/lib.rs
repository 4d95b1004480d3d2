//! Observability concerns for the kontor services.

pub mod tracing;
