//! Worker wire protocol: message vocabulary, line codec, and request
//! correlation.
//!
//! ```text
//! caller --register(id)--> Correlator --Pending--> caller awaits
//!    |                          ^
//!    +--send(Message{id})--> worker stdout --MessageCodec--> reader --resolve(id)
//! ```

pub mod codec;
pub mod correlation;
pub mod message;

pub use codec::{
    CodecError, DecodeError, Frame, MAX_LINE_LENGTH, MessageCodec, classify_line, decode_line, encode_line,
    TextLineCodec, oversized_placeholder,
};
pub use correlation::{CorrelationError, Correlator, Pending};
pub use message::{Message, MessageType, ToolDescriptor, payload};
