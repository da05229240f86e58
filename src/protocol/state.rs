//! Transaction state machine rules.

use crate::core::{InvalidTransition, CELL_SIZE};
use super::packet::{Command, Field, MessageType, PacketFrame};

/// Lifecycle of a 6P transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Allocated, nothing sent or received yet
    Init,
    /// Our Request was acknowledged by the MAC
    RequestSent,
    /// A Request arrived from the peer
    RequestReceived,
    /// Our Response was acknowledged by the MAC
    ResponseSent,
    /// A Response arrived from the peer
    ResponseReceived,
    /// Our Confirmation was acknowledged by the MAC
    ConfirmationSent,
    /// A Confirmation arrived from the peer
    ConfirmationReceived,
    /// Waiting to be freed on the next scheduler pass
    Terminating,
}

impl TransactionState {
    pub const ALL: [TransactionState; 8] = [
        TransactionState::Init,
        TransactionState::RequestSent,
        TransactionState::RequestReceived,
        TransactionState::ResponseSent,
        TransactionState::ResponseReceived,
        TransactionState::ConfirmationSent,
        TransactionState::ConfirmationReceived,
        TransactionState::Terminating,
    ];

    /// Short name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Init => "Init",
            TransactionState::RequestSent => "RequestSent",
            TransactionState::RequestReceived => "RequestReceived",
            TransactionState::ResponseSent => "ResponseSent",
            TransactionState::ResponseReceived => "ResponseReceived",
            TransactionState::ConfirmationSent => "ConfirmationSent",
            TransactionState::ConfirmationReceived => "ConfirmationReceived",
            TransactionState::Terminating => "Terminating",
        }
    }

    /// Whether the transaction has finished its exchange in the given mode
    pub fn is_complete(&self, mode: TransactionMode) -> bool {
        match self {
            TransactionState::ResponseSent | TransactionState::ResponseReceived => {
                mode == TransactionMode::TwoStep
            }
            TransactionState::ConfirmationSent | TransactionState::ConfirmationReceived => true,
            _ => false,
        }
    }
}

/// Number of messages a transaction takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    /// Request and Response
    TwoStep,
    /// Request, Response and Confirmation
    ThreeStep,
}

impl TransactionMode {
    /// A Request is 3-step iff it is ADD or DELETE with an empty CellList
    pub fn for_request(cmd: Command, body_len: usize) -> Self {
        let prefix = Field::CellList.offset(MessageType::Request, cmd.into());
        match (cmd, prefix) {
            (Command::Add | Command::Delete, Some(prefix)) if body_len < prefix + CELL_SIZE => {
                TransactionMode::ThreeStep
            }
            _ => TransactionMode::TwoStep,
        }
    }

    /// Mode of the transaction a Request frame opens; two-step for other frames
    pub fn for_frame(frame: &PacketFrame) -> Self {
        match (frame.msg_type, frame.code.command()) {
            (MessageType::Request, Some(cmd)) => Self::for_request(cmd, frame.body.len()),
            _ => TransactionMode::TwoStep,
        }
    }
}

/// Checks a state change against the transition table
pub fn check_transition(
    from: TransactionState,
    to: TransactionState,
    mode: TransactionMode,
) -> Result<(), InvalidTransition> {
    use TransactionMode::ThreeStep;
    use TransactionState::*;

    let allowed = match (from, to) {
        (_, Terminating) => true,
        (Init, RequestSent) | (Init, RequestReceived) => true,
        (RequestReceived, ResponseSent) => true,
        (RequestSent, ResponseReceived) => true,
        (ResponseSent, ConfirmationReceived) => mode == ThreeStep,
        (ResponseReceived, ConfirmationSent) => mode == ThreeStep,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}
