//! PSG9080 wire protocol.
//!
//! - [`command`]: outbound command lines
//! - [`codec`]: response frames and the incremental decoder
//! - [`engine`]: serialised exchanges with timeout, retry and drain handling

pub mod codec;
pub mod command;
pub mod engine;

pub use codec::{decode_frame, FrameDecoder, Response};
pub use command::{Access, Command, Opcode};
pub use engine::{EngineSettings, ExchangeState, ProtocolEngine};
