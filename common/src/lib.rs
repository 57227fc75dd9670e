pub mod clock;
pub mod fifo;
pub mod serde;

pub use clock::DateTimeStamp;
pub use fifo::Fifo;
pub use serde::DeserializeError;
