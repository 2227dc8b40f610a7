//! Infrastructure and cluster object model

mod cluster;
mod infrastructure;

// Re-exports
pub use cluster::*;
pub use infrastructure::*;
