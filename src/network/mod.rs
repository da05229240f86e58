//! MAC boundary
//!
//! This module wraps 6P frames in link-layer information elements, queues
//! them towards the MAC and drives the engine from an async event loop.

pub mod runner;
pub mod transport;

pub use self::runner::{InboundFrame, Runner};
pub use self::transport::{
    extract_sixtop_payload,
    wrap_sixtop_payload,
    FrameTransport,
    OutboundFrame,
    SendCompletion,
    SendOutcome,
    TxReport,
    TxStatus,
};
