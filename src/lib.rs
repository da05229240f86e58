//! sixp: the 6top Protocol (6P) for TSCH networks
//!
//! This library implements the negotiation protocol two radio neighbors use
//! to agree on the cells of a shared time-slotted schedule: the 6P wire
//! codec, per-neighbor generation bookkeeping, the transaction state machine
//! and the information-element framing towards the MAC.
pub mod core;
pub mod engine;
pub mod network;
pub mod protocol;
pub mod util;

// Re-export commonly used items
pub use crate::core::{Error, LinkAddr, Result, SixpConfig};
pub use crate::engine::{GenerationKind, InputEvent, SchedulingFunction, SendStatus, Sixp};
pub use crate::protocol::{Code, Command, MessageType, PacketFrame, ReturnCode, TransactionState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
