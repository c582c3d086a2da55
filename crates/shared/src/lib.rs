//! MuxMCP Shared Types
//!
//! Pure data types shared between the proxy engine and its embedders:
//! capability descriptors, configuration inputs, and status projections.

pub mod protocol;
pub mod types;

pub use protocol::*;
pub use types::*;
