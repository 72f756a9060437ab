pub mod chunk;
pub mod error;
pub mod fiber;
pub mod promise;
pub mod pull;
pub mod queue;
pub mod rs2;
pub mod scope;

mod async_bridge;
mod bind;
mod buffer;
mod fanout;
mod parallel;
mod transform;

pub mod pipe;

pub mod stream_configuration;
pub mod rs2_stream_ext;

// Re-export all items from rs2 module at the crate root
pub use rs2::*;
