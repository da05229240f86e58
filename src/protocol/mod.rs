//! Protocol implementation module
//!
//! This module defines the 6P wire format, its encoding/decoding,
//! and the transaction state machine rules.

pub mod codec;
pub mod packet;
pub mod state;

pub use self::codec::SixpCodec;
pub use self::packet::{
    Cell, CellOptions, Code, Command, Field, MessageType, PacketFrame, ReturnCode,
};
pub use self::state::{check_transition, TransactionMode, TransactionState};
