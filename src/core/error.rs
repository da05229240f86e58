use thiserror::Error;

use crate::protocol::state::TransactionState;

/// Errors raised while parsing or building 6P frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("unsupported 6P version {0}")]
    InvalidVersion(u8),

    #[error("unsupported message type {0}")]
    UnsupportedType(u8),

    #[error("unsupported code {code:#04x} for message type {msg_type}")]
    UnsupportedCode { msg_type: u8, code: u8 },

    #[error("invalid body length {len} for code {code:#04x}")]
    InvalidLength { code: u8, len: usize },

    #[error("field {0} is not present in this message")]
    FieldNotPresent(&'static str),

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Errors raised by the neighbor store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NeighborError {
    #[error("neighbor table is full")]
    NoMemory,

    #[error("neighbor already exists")]
    Duplicate,

    #[error("generation counter holds invalid value {0}")]
    InvalidGeneration(u8),
}

/// Errors raised when allocating a transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("scheduling function {0:#04x} is not registered")]
    UnknownSchedulingFunction(u8),

    #[error("a transaction with this peer is already in progress")]
    Duplicate,

    #[error("transaction pool is exhausted")]
    PoolExhausted,

    #[error("only a Request can open a transaction")]
    NotARequest,
}

/// A state change the transaction state machine does not allow
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: TransactionState,
    pub to: TransactionState,
}

/// Errors returned by `Sixp::output`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    #[error("transaction state does not allow sending this message")]
    InvalidState,

    #[error("unsupported code for this message type")]
    InvalidCode,

    #[error("neighbor allocation failed: {0}")]
    Neighbor(#[from] NeighborError),

    #[error("transaction allocation failed: {0}")]
    Alloc(#[from] AllocError),

    #[error("failed to build frame: {0}")]
    Codec(#[from] CodecError),

    #[error("failed to hand frame to the MAC: {0}")]
    Transport(#[from] TransportError),
}

/// Errors raised by the frame transport adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("MAC transmit queue is full")]
    QueueFull,

    #[error("MAC transmit queue is closed")]
    Closed,

    #[error("frame of {0} bytes exceeds the maximum IE length")]
    TooLong(usize),
}

/// Errors raised by the scheduling function registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("scheduling function {0:#04x} is already registered")]
    Duplicate(u8),

    #[error("scheduling function registry is full")]
    Full,

    #[error("timeout of {0:?} is out of range")]
    InvalidTimeout(std::time::Duration),
}

/// Custom error types for the 6P engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Neighbor error: {0}")]
    Neighbor(#[from] NeighborError),

    #[error("Allocation error: {0}")]
    Alloc(#[from] AllocError),

    #[error("Transition error: {0}")]
    Transition(#[from] InvalidTransition),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
