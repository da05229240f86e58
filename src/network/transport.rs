//! IEEE 802.15.4e information element framing and the MAC send queue.
//!
//! An outgoing 6P frame travels as
//!
//! ```text
//! | HT1 (2) | payload IE header (2) | sub-IE id 0xc9 (1) | 6P header (4) | body |
//! ```
//!
//! IE descriptors are little-endian. Header IEs carry length in bits 0-6 and
//! the element id in bits 7-14; payload IEs carry length in bits 0-10, the
//! group id in bits 11-14 and set bit 15.

use bytes::{BufMut, Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::core::{LinkAddr, TransportError, SIXTOP_SUBIE_ID};
use crate::engine::TransactionId;

/// Element id of the Header Termination 1 IE
pub const HT1_ELEMENT_ID: u8 = 0x7e;
/// Element id of the Header Termination 2 IE
pub const HT2_ELEMENT_ID: u8 = 0x7f;
/// Payload IE group of IETF IEs
pub const IETF_IE_GROUP: u8 = 0x5;
/// Payload IE group of the payload termination IE
pub const PAYLOAD_TERMINATION_GROUP: u8 = 0xf;
/// Largest payload IE content
pub const MAX_PAYLOAD_IE_LEN: usize = 0x07ff;

const HT1: [u8; 2] = [0x00, 0x3f];

/// Wraps an encoded 6P frame in the IEs the MAC expects
pub fn wrap_sixtop_payload(sixp: &[u8]) -> Result<Bytes, TransportError> {
    let content_len = 1 + sixp.len();
    if content_len > MAX_PAYLOAD_IE_LEN {
        return Err(TransportError::TooLong(sixp.len()));
    }
    let descriptor = content_len as u16 | ((IETF_IE_GROUP as u16) << 11) | 0x8000;

    let mut buf = BytesMut::with_capacity(4 + content_len);
    buf.put_slice(&HT1);
    buf.put_u16_le(descriptor);
    buf.put_u8(SIXTOP_SUBIE_ID);
    buf.put_slice(sixp);
    Ok(buf.freeze())
}

/// Finds the 6top sub-IE in a received IE list and returns its content
///
/// `psdu` starts at the first header IE. Returns `None` if the list is
/// truncated or carries no 6top sub-IE.
pub fn extract_sixtop_payload(psdu: &[u8]) -> Option<&[u8]> {
    let mut pos = 0;

    // header IEs
    loop {
        let descriptor = read_descriptor(psdu, pos)?;
        if descriptor & 0x8000 != 0 {
            // a payload IE without a preceding termination
            break;
        }
        let len = (descriptor & 0x7f) as usize;
        let id = ((descriptor >> 7) & 0xff) as u8;
        pos += 2;
        match id {
            HT1_ELEMENT_ID => break,
            HT2_ELEMENT_ID => return None,
            _ => pos += len,
        }
    }

    // payload IEs
    loop {
        let descriptor = read_descriptor(psdu, pos)?;
        if descriptor & 0x8000 == 0 {
            trace!(pos, "header IE found among payload IEs");
            return None;
        }
        let len = (descriptor & 0x07ff) as usize;
        let group = ((descriptor >> 11) & 0x0f) as u8;
        pos += 2;
        let content = psdu.get(pos..pos + len)?;
        match group {
            IETF_IE_GROUP if content.first() == Some(&SIXTOP_SUBIE_ID) => {
                return Some(&content[1..]);
            }
            PAYLOAD_TERMINATION_GROUP => return None,
            _ => pos += len,
        }
    }
}

fn read_descriptor(buf: &[u8], pos: usize) -> Option<u16> {
    let bytes = buf.get(pos..pos + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Transmission result reported by the MAC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxStatus {
    Ok,
    Collision,
    NoAck,
    Deferred,
    Err,
    ErrFatal,
}

impl TxStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, TxStatus::Ok)
    }
}

/// What the MAC reported for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReport {
    pub status: TxStatus,
    pub transmissions: u8,
}

/// Handle the MAC uses to report the fate of an [`OutboundFrame`]
///
/// Dropping it without calling [`complete`](Self::complete) reports a failure.
#[derive(Debug)]
pub struct SendCompletion {
    tx: oneshot::Sender<TxReport>,
}

impl SendCompletion {
    pub fn complete(self, status: TxStatus, transmissions: u8) {
        // the engine may have been reset meanwhile
        let _ = self.tx.send(TxReport {
            status,
            transmissions,
        });
    }
}

/// A frame queued for the MAC
#[derive(Debug)]
pub struct OutboundFrame {
    pub dest: LinkAddr,
    /// IE list ready to be placed after the MAC header
    pub psdu: Bytes,
    pub completion: SendCompletion,
}

/// A MAC report matched back to what was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    /// Transaction the frame belonged to, if any
    pub transaction: Option<TransactionId>,
    pub dest: LinkAddr,
    pub report: TxReport,
}

/// Sending half of the engine's MAC boundary
pub struct FrameTransport {
    mac_tx: mpsc::Sender<OutboundFrame>,
    in_flight: FuturesUnordered<BoxFuture<'static, SendOutcome>>,
}

impl FrameTransport {
    pub fn new(mac_tx: mpsc::Sender<OutboundFrame>) -> Self {
        FrameTransport {
            mac_tx,
            in_flight: FuturesUnordered::new(),
        }
    }

    /// Queues an encoded 6P frame for `dest`
    pub fn send(
        &mut self,
        dest: LinkAddr,
        sixp: &[u8],
        transaction: Option<TransactionId>,
    ) -> Result<(), TransportError> {
        let psdu = wrap_sixtop_payload(sixp)?;
        let (tx, rx) = oneshot::channel();
        let frame = OutboundFrame {
            dest,
            psdu,
            completion: SendCompletion { tx },
        };

        self.mac_tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!(peer = %dest, "MAC queue full");
                TransportError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => {
                warn!(peer = %dest, "MAC queue closed");
                TransportError::Closed
            }
        })?;

        self.in_flight.push(
            rx.map(move |report| SendOutcome {
                transaction,
                dest,
                report: report.unwrap_or(TxReport {
                    status: TxStatus::Err,
                    transmissions: 0,
                }),
            })
            .boxed(),
        );
        Ok(())
    }

    /// A completion that is already available, without waiting
    pub fn poll_completion(&mut self) -> Option<SendOutcome> {
        if self.in_flight.is_empty() {
            return None;
        }
        self.in_flight.next().now_or_never().flatten()
    }

    /// Waits for the next completion; `None` when nothing is in flight
    pub async fn next_completion(&mut self) -> Option<SendOutcome> {
        self.in_flight.next().await
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Forgets every frame awaiting a completion
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}

impl std::fmt::Debug for FrameTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTransport")
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    const PEER: LinkAddr = LinkAddr::new([0, 0, 0, 0, 0, 0, 0, 2]);

    #[test]
    fn test_wrap_layout() {
        let sixp = [0x00, 0x05, 0xf1, 0x0a, 0x00, 0x00];
        let psdu = wrap_sixtop_payload(&sixp).unwrap();
        // 7 content bytes in the IETF group
        assert_eq!(&psdu[..5], &[0x00, 0x3f, 0x07, 0xa8, 0xc9]);
        assert_eq!(&psdu[5..], &sixp);
        assert_eq!(extract_sixtop_payload(&psdu), Some(&sixp[..]));
    }

    #[test]
    fn test_wrap_too_long() {
        let big = vec![0u8; MAX_PAYLOAD_IE_LEN];
        assert_eq!(
            wrap_sixtop_payload(&big),
            Err(TransportError::TooLong(MAX_PAYLOAD_IE_LEN))
        );
    }

    #[test]
    fn test_extract_skips_other_ies() {
        let mut psdu = vec![];
        // a 2-byte header IE with element id 0x1a
        psdu.extend_from_slice(&(2u16 | (0x1a << 7)).to_le_bytes());
        psdu.extend_from_slice(&[0xaa, 0xbb]);
        psdu.extend_from_slice(&HT1);
        // an MLME payload IE (group 0x1) with 1 byte
        psdu.extend_from_slice(&(1u16 | (0x1 << 11) | 0x8000).to_le_bytes());
        psdu.push(0xcc);
        // IETF IE with a different sub-id
        psdu.extend_from_slice(&(1u16 | (0x5 << 11) | 0x8000).to_le_bytes());
        psdu.push(0x01);
        // 6top
        psdu.extend_from_slice(&(3u16 | (0x5 << 11) | 0x8000).to_le_bytes());
        psdu.extend_from_slice(&[SIXTOP_SUBIE_ID, 0x10, 0x06]);

        assert_eq!(extract_sixtop_payload(&psdu), Some(&[0x10, 0x06][..]));
    }

    #[test]
    fn test_extract_rejects_missing_or_truncated() {
        assert_eq!(extract_sixtop_payload(&[]), None);
        assert_eq!(extract_sixtop_payload(&[0x00]), None);
        // HT2 ends the list with no payload IEs
        assert_eq!(extract_sixtop_payload(&[0x80, 0x3f]), None);
        // payload termination before any 6top IE
        assert_eq!(extract_sixtop_payload(&[0x00, 0x3f, 0x00, 0xf8]), None);
        // IE length past the end
        assert_eq!(extract_sixtop_payload(&[0x00, 0x3f, 0x09, 0xa8, 0xc9]), None);
    }

    #[tokio::test]
    async fn test_send_and_complete() {
        let (tx, mut rx) = mpsc::channel(2);
        let mut transport = FrameTransport::new(tx);

        assert_ok!(transport.send(PEER, &[0x10, 0x06, 0x00, 0x00], None));
        assert_eq!(transport.in_flight(), 1);
        assert!(transport.poll_completion().is_none());

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.dest, PEER);
        assert_eq!(extract_sixtop_payload(&frame.psdu), Some(&[0x10, 0x06, 0x00, 0x00][..]));
        frame.completion.complete(TxStatus::Ok, 3);

        let outcome = transport.poll_completion().unwrap();
        assert_eq!(outcome.dest, PEER);
        assert_eq!(
            outcome.report,
            TxReport {
                status: TxStatus::Ok,
                transmissions: 3
            }
        );
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_completion_is_failure() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut transport = FrameTransport::new(tx);
        transport.send(PEER, &[0x10, 0x06, 0x00, 0x00], None).unwrap();
        drop(rx.recv().await.unwrap());

        let outcome = transport.next_completion().await.unwrap();
        assert_eq!(outcome.report.status, TxStatus::Err);
        assert!(!outcome.report.status.is_ok());
    }

    #[tokio::test]
    async fn test_full_and_closed_queue() {
        let (tx, rx) = mpsc::channel(1);
        let mut transport = FrameTransport::new(tx);
        let sixp = [0x10, 0x06, 0x00, 0x00];

        transport.send(PEER, &sixp, None).unwrap();
        assert_eq!(transport.send(PEER, &sixp, None), Err(TransportError::QueueFull));
        assert_eq!(transport.in_flight(), 1);

        drop(rx);
        assert_eq!(transport.send(PEER, &sixp, None), Err(TransportError::Closed));
    }
}
