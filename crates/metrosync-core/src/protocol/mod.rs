//! Protocol module containing message types, the JSON codec, and the framer.

pub mod codec;
pub mod framing;
pub mod messages;

pub use codec::{decode_message, encode_message, encode_message_frame, CodecError};
pub use framing::{encode_frame, read_frame, write_frame, FrameError, MAX_FRAME_LEN};
pub use messages::*;
