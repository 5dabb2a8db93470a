pub mod port;
pub mod probe;

pub use port::*;
pub use probe::*;

/// Hostname the embedded server listens on and probes target.
pub const PG_HOST: &str = "localhost";
