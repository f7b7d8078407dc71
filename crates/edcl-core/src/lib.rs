//! EDCL-Core: serial EDCL debug link implementation in Rust.
//!
//! This crate drives the Ethernet/Serial Debug Communication Link of an ESP
//! SoC over a UART: loading and dumping memory, single word access and the
//! reset pulse.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, request and reply frames
//! - **Transport**: Byte channel abstraction (serial, mock)
//! - **State**: Exchange state machine and transfer tracking
//! - **Session**: Chunked, acknowledged transfers with retry
//! - **Ops**: Memory image load/dump, word access, reset, listen
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use edcl_core::session::{EdclLink, LinkConfig};
//!
//! let config = LinkConfig {
//!     device: "/dev/ttyUSB1".to_string(),
//!     ..Default::default()
//! };
//!
//! let mut link = EdclLink::connect(config).expect("open failed");
//! link.load_memory_binary(0x8000_0000, "prom.bin").expect("load failed");
//! let word = link.get_word(0x8000_0000).expect("read failed");
//! println!("{:08x}", word);
//! ```

pub mod error;
pub mod events;
pub mod image;
pub mod ops;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use error::{EdclError, Result};
pub use events::{EdclEvent, EdclObserver, NullObserver, Operation, TracingObserver};
pub use protocol::{FrameError, Reply, Request};
pub use session::{EdclLink, LinkConfig};
pub use state::{ExchangeState, TransferReport};
pub use transport::{Channel, Fault, MockTransport, SerialChannel, TransportError};
