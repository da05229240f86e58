//! Async event loop around a [`Sixp`] engine.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::core::LinkAddr;
use crate::engine::Sixp;

/// A frame received by the MAC, starting at its first IE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub src: LinkAddr,
    pub psdu: Bytes,
}

/// Drives a [`Sixp`] from inbound frames, MAC completions and timers
pub struct Runner {
    sixp: Sixp,
    inbound: mpsc::Receiver<InboundFrame>,
}

impl Runner {
    pub fn new(sixp: Sixp, inbound: mpsc::Receiver<InboundFrame>) -> Self {
        Runner { sixp, inbound }
    }

    pub fn sixp(&self) -> &Sixp {
        &self.sixp
    }

    pub fn sixp_mut(&mut self) -> &mut Sixp {
        &mut self.sixp
    }

    /// Runs until the inbound channel closes, then hands the engine back
    pub async fn run(mut self) -> Sixp {
        loop {
            self.turn();

            // only used when a timer is armed
            let deadline = self
                .sixp
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            let timer_armed = self.sixp.next_deadline().is_some();
            let in_flight = self.sixp.has_in_flight();

            tokio::select! {
                frame = self.inbound.recv() => match frame {
                    Some(frame) => self.sixp.input_psdu(&frame.psdu, frame.src),
                    None => break,
                },

                Some(outcome) = self.sixp.next_send_outcome(), if in_flight => {
                    self.sixp.on_send_outcome(outcome);
                }

                _ = sleep_until(deadline), if timer_armed => {}
            }
        }

        debug!("inbound channel closed; 6P runner stopping");
        self.turn();
        self.sixp
    }

    /// Polls until no deferred work is left
    fn turn(&mut self) {
        self.sixp.poll(Instant::now());
        while self.sixp.has_pending_work() {
            self.sixp.poll(Instant::now());
        }
    }
}
