//! Transport layer module.

pub mod mock;
pub mod serial;
pub mod traits;

pub use mock::{Fault, MockTransport};
pub use serial::SerialChannel;
pub use traits::{Channel, TransportError};
