// Locksmith server library
// Exposes the listener, connection loop and startup utilities so the binary
// and integration tests share one code path

// Module declarations
pub mod config; // Configuration management
pub mod connection; // Per-connection request loop
pub mod handler; // Command execution against the lock table
pub mod metrics; // Metrics and observability
pub mod server; // TCP listener
pub mod startup; // Application startup utilities

pub use config::{Cli, Configuration, ServerConfig};
pub use handler::RequestHandler;
pub use server::{LockServer, ServerError};
pub use startup::ShutdownSignal;
