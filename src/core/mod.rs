//! Core types for the 6P engine
//!
//! This module contains the error taxonomy, addressing and configuration
//! shared by every other module.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{
    AllocError,
    CodecError,
    Error,
    InvalidTransition,
    NeighborError,
    OutputError,
    RegistryError,
    Result,
    TransportError,
};
pub use self::types::{LinkAddr, SixpConfig};

/// 6P protocol version carried in the low nibble of the first header byte
pub const PROTOCOL_VERSION: u8 = 0;

/// Largest value of the 4-bit sequence number
pub const MAX_SEQNO: u8 = 0x0f;

/// Sub-IE identifier of the 6top sub-IE inside the IETF payload IE
pub const SIXTOP_SUBIE_ID: u8 = 0xc9;

/// Size of the 6P header in bytes
pub const HEADER_SIZE: usize = 4;

/// Size of one cell entry in a CellList
pub const CELL_SIZE: usize = 4;

/// Longest transaction timeout an engine accepts
pub const MAX_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);
