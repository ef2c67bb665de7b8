//! Locksmith API - wire protocol shared by server and client
//!
//! Requests and replies are single lines of text terminated by `\n`. The
//! [`LineCodec`] turns a byte stream into whole frames regardless of how the
//! bytes were split across reads.

pub mod codec;
pub mod error;
pub mod protocol;

pub use codec::{DEFAULT_MAX_FRAME_LENGTH, LineCodec};
pub use error::ProtocolError;
pub use protocol::{Command, FAILURE, LOCK, Reply, SUCCESS, UNLOCK};
