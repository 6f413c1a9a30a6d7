//! Building blocks shared by a media producer and a real-time consumer:
//! a reusable [`unit::MediaUnit`], the [`pool::Pool`] that recycles it and
//! the bounded [`buffer::UnitBuffer`] that hands it across tasks.

pub mod buffer;
pub mod error;
pub mod pool;
pub mod unit;

pub use buffer::UnitBuffer;
pub use error::{BufferError, PushError};
pub use pool::Pool;
pub use unit::{HeaderExtension, MediaUnit};
