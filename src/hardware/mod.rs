//! Instrument drivers
//!
//! Every driver implements [`capabilities::Readable`]; the acquisition loop
//! never sees the transport underneath. [`registry`] builds drivers from
//! configuration.

pub mod capabilities;
pub mod max31865;
pub mod mock;
pub mod registry;
pub mod tpg362;

pub use capabilities::Readable;
pub use registry::{create_instrument, create_instruments};
