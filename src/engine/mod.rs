//! 6P protocol engine
//!
//! `Sixp` validates incoming frames, drives transactions through their
//! state machine and builds outgoing frames. Everything runs on the caller's
//! thread; MAC completions and timers are picked up by [`Sixp::poll`].

pub mod neighbor;
pub mod sf;
pub mod transaction;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::core::{AllocError, LinkAddr, NeighborError, OutputError, RegistryError, Result, SixpConfig};
use crate::network::transport::{extract_sixtop_payload, FrameTransport, OutboundFrame, SendOutcome};
use crate::protocol::packet::validate_body_len;
use crate::protocol::{Code, Command, MessageType, PacketFrame, ReturnCode, TransactionState};

pub use self::neighbor::{GenerationKind, NeighborRecord, NeighborStore};
pub use self::sf::{InputEvent, SchedulingFunction, SfRegistry};
pub use self::transaction::{
    SendStatus, SentCallback, Transaction, TransactionId, TransactionManager,
};

/// A 6P engine instance
#[derive(Debug)]
pub struct Sixp {
    config: SixpConfig,
    neighbors: NeighborStore,
    transactions: TransactionManager,
    registry: SfRegistry,
    transport: FrameTransport,
}

impl Sixp {
    /// Creates an engine that hands frames to the MAC through `mac_tx`
    pub fn new(config: SixpConfig, mac_tx: mpsc::Sender<OutboundFrame>) -> Result<Self> {
        config.validate()?;
        Ok(Sixp {
            neighbors: NeighborStore::new(config.max_neighbors, config.initial_seqno),
            transactions: TransactionManager::new(config.max_transactions),
            registry: SfRegistry::new(config.max_scheduling_functions, config.default_timeout),
            transport: FrameTransport::new(mac_tx),
            config,
        })
    }

    /// Creates an engine along with the receiving end of its MAC queue
    pub fn with_channel(config: SixpConfig) -> Result<(Self, mpsc::Receiver<OutboundFrame>)> {
        let (tx, rx) = mpsc::channel(config.tx_queue_capacity.max(1));
        Ok((Self::new(config, tx)?, rx))
    }

    pub fn config(&self) -> &SixpConfig {
        &self.config
    }

    /// Registers a scheduling function
    pub fn add_sf(&mut self, sf: Box<dyn SchedulingFunction>) -> std::result::Result<(), RegistryError> {
        self.registry.add(sf)
    }

    /// Unregisters a scheduling function
    pub fn remove_sf(&mut self, sfid: u8) -> Option<Box<dyn SchedulingFunction>> {
        self.registry.remove(sfid)
    }

    pub fn registry(&self) -> &SfRegistry {
        &self.registry
    }

    /// Resets neighbors, transactions and pending sends, then re-initializes
    /// every scheduling function
    pub fn init(&mut self) {
        self.neighbors.clear();
        self.transactions.clear();
        self.transport.clear();
        self.registry.init_all();
        debug!("6P engine initialized");
    }

    /// Processes a received PSDU IE list
    pub fn input_psdu(&mut self, psdu: &[u8], src: LinkAddr) {
        match extract_sixtop_payload(psdu) {
            Some(payload) => self.input(payload, src),
            None => trace!(peer = %src, "frame without 6top IE ignored"),
        }
    }

    /// Processes the content of a received 6top sub-IE
    pub fn input(&mut self, bytes: &[u8], src: LinkAddr) {
        let frame = match PacketFrame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(peer = %src, error = %e, "malformed 6P frame dropped");
                return;
            }
        };

        if !self.registry.contains(frame.sfid) {
            warn!(peer = %src, sfid = frame.sfid, "6P frame for unknown scheduling function");
            self.reply_error(&frame, ReturnCode::ErrSfid, src);
            return;
        }

        if !self.generation_is_valid(&frame, &src) {
            warn!(
                peer = %src,
                seqno = frame.seqno,
                gab = frame.gab,
                gba = frame.gba,
                "6P frame with inconsistent generation dropped"
            );
            return;
        }

        debug!(
            peer = %src,
            msg_type = ?frame.msg_type,
            code = ?frame.code,
            seqno = frame.seqno,
            "6P frame received"
        );

        match frame.msg_type {
            MessageType::Request => self.request_input(frame, src),
            MessageType::Response | MessageType::Confirmation => self.reply_input(frame, src),
        }
    }

    fn request_input(&mut self, frame: PacketFrame, src: LinkAddr) {
        let Some(cmd) = frame.code.command() else {
            return;
        };

        if let Some(state) = self.transactions.state_of(&src) {
            warn!(peer = %src, seqno = frame.seqno, state = state.as_str(), "peer is busy");
            self.reply_error(&frame, ReturnCode::ErrBusy, src);
            return;
        }

        // a schedule change will need a neighbor record to track its generation
        if cmd.alters_schedule() && self.neighbors.find(&src).is_none() && self.neighbors.is_full() {
            warn!(peer = %src, "neighbor table full");
            self.reply_error(&frame, ReturnCode::ErrNoRes, src);
            return;
        }

        let id = match self.transactions.alloc(&frame, src, &self.registry) {
            Ok(id) => id,
            Err(e) => {
                warn!(peer = %src, error = %e, "cannot open transaction");
                self.reply_error(&frame, ReturnCode::ErrNoRes, src);
                return;
            }
        };

        if let Err(e) = self.transactions.transit(id, TransactionState::RequestReceived) {
            warn!(peer = %src, error = %e, "cannot accept Request");
            self.transactions.terminate(id);
            return;
        }

        let sfid = frame.sfid;
        self.dispatch(
            sfid,
            InputEvent {
                msg_type: frame.msg_type,
                code: frame.code,
                command: cmd,
                sfid,
                seqno: frame.seqno,
                body: frame.body,
                peer: src,
            },
        );
    }

    fn reply_input(&mut self, frame: PacketFrame, src: LinkAddr) {
        let target = match frame.msg_type {
            MessageType::Response => TransactionState::ResponseReceived,
            _ => TransactionState::ConfirmationReceived,
        };

        let Some(id) = self.transactions.find(&src) else {
            debug!(peer = %src, seqno = frame.seqno, "no transaction for 6P reply");
            return;
        };
        let Some((sfid, cmd, seqno)) = self.transactions.get(id).map(|t| (t.sfid, t.cmd, t.seqno)) else {
            return;
        };
        if seqno != frame.seqno {
            debug!(peer = %src, expected = seqno, got = frame.seqno, "6P reply with stale seqno");
            return;
        }

        if let Err(e) = self.transactions.transit(id, target) {
            warn!(peer = %src, error = %e, "6P reply in wrong state; terminating transaction");
            self.transactions.terminate(id);
            return;
        }

        self.dispatch(
            sfid,
            InputEvent {
                msg_type: frame.msg_type,
                code: frame.code,
                command: cmd,
                sfid: frame.sfid,
                seqno: frame.seqno,
                body: frame.body,
                peer: src,
            },
        );
    }

    fn dispatch(&mut self, sfid: u8, event: InputEvent) {
        match self.registry.take(sfid) {
            Some(mut handler) => {
                handler.input(self, event);
                self.registry.restore(sfid, handler);
            }
            None => debug!(sfid, "scheduling function unavailable for input"),
        }
    }

    /// Generation check; CLEAR Requests and ERR_GEN replies are exempt
    fn generation_is_valid(&self, frame: &PacketFrame, src: &LinkAddr) -> bool {
        match (frame.msg_type, frame.code) {
            (MessageType::Request, Code::Command(Command::Clear)) => return true,
            (_, Code::Return(ReturnCode::ErrGen)) => return true,
            _ => {}
        }

        match self.neighbors.find(src) {
            None => frame.gab == 0 && frame.gba == 0,
            Some(nbr) => match frame.msg_type {
                MessageType::Request | MessageType::Confirmation => {
                    frame.gab == nbr.grx && frame.gba == nbr.gtx
                }
                MessageType::Response => frame.gab == nbr.gtx && frame.gba == nbr.grx,
            },
        }
    }

    /// (GAB, GBA) for a frame of `msg_type` sent to `peer`
    fn generation_fields(&self, msg_type: MessageType, peer: &LinkAddr) -> (u8, u8) {
        match self.neighbors.find(peer) {
            None => (0, 0),
            Some(nbr) => match msg_type {
                MessageType::Response => (nbr.grx, nbr.gtx),
                _ => (nbr.gtx, nbr.grx),
            },
        }
    }

    /// Answers `frame` with an error Response outside of any transaction
    fn reply_error(&mut self, frame: &PacketFrame, rc: ReturnCode, peer: LinkAddr) {
        let (gab, gba) = self.generation_fields(MessageType::Response, &peer);
        let reply = PacketFrame::new(
            MessageType::Response,
            rc,
            frame.sfid,
            frame.seqno,
            gab,
            gba,
            Bytes::new(),
        );
        match self.transport.send(peer, &reply.encode(), None) {
            Ok(()) => debug!(peer = %peer, seqno = frame.seqno, ?rc, "6P error reply sent"),
            Err(e) => warn!(peer = %peer, error = %e, ?rc, "cannot send 6P error reply"),
        }
    }

    /// Sends a 6P message to `dest`
    ///
    /// A Request opens a transaction and requires that none is open with
    /// `dest`. A Response needs a transaction in `RequestReceived` and a
    /// Confirmation one in `ResponseReceived`. `callback` fires once when
    /// the MAC reports on the frame.
    pub fn output(
        &mut self,
        msg_type: MessageType,
        code: impl Into<Code>,
        sfid: u8,
        body: impl Into<Bytes>,
        dest: LinkAddr,
        callback: Option<SentCallback>,
    ) -> std::result::Result<(), OutputError> {
        let code = code.into();
        let body = body.into();
        if !code.matches(msg_type) {
            return Err(OutputError::InvalidCode);
        }

        let existing = self.transactions.find(&dest);
        let required = match msg_type {
            MessageType::Request => None,
            MessageType::Response => Some(TransactionState::RequestReceived),
            MessageType::Confirmation => Some(TransactionState::ResponseReceived),
        };
        let current = existing.and_then(|id| self.transactions.get(id)).map(|t| t.state());
        if current != required {
            warn!(
                peer = %dest,
                msg_type = ?msg_type,
                state = current.map(|s| s.as_str()),
                "6P output refused in this transaction state"
            );
            return Err(OutputError::InvalidState);
        }

        validate_body_len(msg_type, code, body.len())?;

        match existing {
            None => self.output_request(code, sfid, body, dest, callback),
            Some(id) => self.output_reply(id, msg_type, code, sfid, body, dest, callback),
        }
    }

    fn output_request(
        &mut self,
        code: Code,
        sfid: u8,
        body: Bytes,
        dest: LinkAddr,
        callback: Option<SentCallback>,
    ) -> std::result::Result<(), OutputError> {
        if !self.registry.contains(sfid) {
            return Err(AllocError::UnknownSchedulingFunction(sfid).into());
        }

        let seqno = self.neighbors.find_or_alloc(dest)?.next_seqno();
        let (gab, gba) = self.generation_fields(MessageType::Request, &dest);
        let frame = PacketFrame::new(MessageType::Request, code, sfid, seqno, gab, gba, body);

        let id = self.transactions.alloc(&frame, dest, &self.registry)?;
        if let Some(nbr) = self.neighbors.find_mut(&dest) {
            nbr.increment_seqno();
        }

        if let Err(e) = self.transport.send(dest, &frame.encode(), Some(id)) {
            self.transactions.terminate(id);
            return Err(e.into());
        }
        if let Some(callback) = callback {
            self.transactions.set_callback(id, callback);
        }
        debug!(peer = %dest, seqno, ?code, "6P Request sent");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn output_reply(
        &mut self,
        id: TransactionId,
        msg_type: MessageType,
        code: Code,
        sfid: u8,
        body: Bytes,
        dest: LinkAddr,
        callback: Option<SentCallback>,
    ) -> std::result::Result<(), OutputError> {
        let (cmd, seqno) = self
            .transactions
            .get(id)
            .map(|t| (t.cmd, t.seqno))
            .ok_or(OutputError::InvalidState)?;

        if msg_type == MessageType::Response
            && code == Code::Return(ReturnCode::Success)
            && cmd.alters_schedule()
        {
            self.neighbors.find_or_alloc(dest)?;
        }

        let (gab, gba) = self.generation_fields(msg_type, &dest);
        let frame = PacketFrame::new(msg_type, code, sfid, seqno, gab, gba, body);
        self.transport.send(dest, &frame.encode(), Some(id))?;
        if let Some(callback) = callback {
            self.transactions.set_callback(id, callback);
        }
        debug!(peer = %dest, seqno, msg_type = ?msg_type, ?code, "6P reply sent");
        Ok(())
    }

    /// Advances a generation counter of `peer`, creating its record if needed
    pub fn advance_generation(
        &mut self,
        peer: LinkAddr,
        kind: GenerationKind,
    ) -> std::result::Result<(), NeighborError> {
        let nbr = self.neighbors.find_or_alloc(peer)?;
        nbr.advance(kind)?;
        debug!(peer = %peer, gtx = nbr.gtx, grx = nbr.grx, "generation advanced");
        Ok(())
    }

    /// Forgets a neighbor's record
    pub fn remove_neighbor(&mut self, peer: &LinkAddr) -> bool {
        self.neighbors.free(peer)
    }

    /// Runs one event-loop pass
    ///
    /// Runs the work deferred by earlier passes, then applies MAC
    /// completions, then fires timers that expired at or before `now`.
    /// Anything queued during the pass waits for the next one.
    pub fn poll(&mut self, now: Instant) {
        self.transactions.process_pending();

        while let Some(outcome) = self.transport.poll_completion() {
            self.on_send_outcome(outcome);
        }

        for id in self.transactions.expired(now) {
            let Some(trans) = self.transactions.get(id) else {
                continue;
            };
            if trans.state() == TransactionState::Terminating {
                continue;
            }
            let (sfid, cmd, peer) = (trans.sfid, trans.cmd, trans.peer);
            warn!(peer = %peer, seqno = trans.seqno, state = trans.state().as_str(), "transaction timed out");

            if let Some(mut handler) = self.registry.take(sfid) {
                handler.timeout(self, cmd, peer);
                self.registry.restore(sfid, handler);
            }
            self.transactions.terminate(id);
        }
    }

    pub(crate) fn on_send_outcome(&mut self, outcome: SendOutcome) {
        use TransactionState::*;

        let SendOutcome {
            transaction,
            dest,
            report,
        } = outcome;
        let ok = report.status.is_ok();
        if !ok {
            warn!(
                peer = %dest,
                status = ?report.status,
                transmissions = report.transmissions,
                "6P frame not delivered"
            );
        }

        let Some(id) = transaction else {
            return;
        };
        let Some(state) = self.transactions.get(id).map(|t| t.state()) else {
            trace!(peer = %dest, "send completion for a freed transaction");
            return;
        };

        let next = match (state, ok) {
            (Init, true) => Some(RequestSent),
            (Init, false) => Some(Terminating),
            (RequestReceived, true) => Some(ResponseSent),
            (ResponseReceived, true) => Some(ConfirmationSent),
            (RequestReceived | ResponseReceived, false) => None,
            (other, _) => {
                debug!(peer = %dest, state = other.as_str(), "send completion in unexpected state");
                None
            }
        };
        if let Some(next) = next {
            if let Err(e) = self.transactions.transit(id, next) {
                warn!(peer = %dest, error = %e, "state change after send failed");
            }
        }

        if let Some(callback) = self.transactions.take_callback(id) {
            let status = if ok { SendStatus::Success } else { SendStatus::Failure };
            callback(self, dest, status);
        }
    }

    pub(crate) async fn next_send_outcome(&mut self) -> Option<SendOutcome> {
        self.transport.next_completion().await
    }

    pub(crate) fn has_in_flight(&self) -> bool {
        self.transport.in_flight() > 0
    }

    /// Whether deferred transaction work is waiting for the next `poll`
    pub fn has_pending_work(&self) -> bool {
        self.transactions.has_pending()
    }

    /// Earliest transaction timer
    pub fn next_deadline(&self) -> Option<Instant> {
        self.transactions.next_deadline()
    }

    pub fn transaction_state(&self, peer: &LinkAddr) -> Option<TransactionState> {
        self.transactions.state_of(peer)
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn neighbor(&self, peer: &LinkAddr) -> Option<&NeighborRecord> {
        self.neighbors.find(peer)
    }
}
