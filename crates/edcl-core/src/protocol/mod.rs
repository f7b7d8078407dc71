//! Protocol module - EDCL frame definitions.

pub mod constants;
pub mod frame;
pub mod reply;

pub use constants::*;
pub use frame::{FrameError, Request, sequence_marker_bits};
pub use reply::Reply;
