//! Core data types shared by the connector, firehose and server layers.

pub mod state;
pub mod value;

pub use state::*;
pub use value::*;
