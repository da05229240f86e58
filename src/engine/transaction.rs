//! Transaction pool with deferred termination and per-transaction timers.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::{AllocError, InvalidTransition, LinkAddr};
use crate::protocol::{check_transition, Command, PacketFrame, TransactionMode, TransactionState};
use crate::util::{Arena, Handle};

use super::sf::SfRegistry;
use super::Sixp;

/// Stable handle to a pooled transaction
pub type TransactionId = Handle;

/// Outcome reported to a sent-callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Success,
    Failure,
}

/// Invoked once when the MAC reports on a frame sent through `Sixp::output`
pub type SentCallback = Box<dyn FnOnce(&mut Sixp, LinkAddr, SendStatus) + Send>;

/// One in-flight negotiation with a peer
pub struct Transaction {
    pub peer: LinkAddr,
    pub sfid: u8,
    pub cmd: Command,
    pub seqno: u8,
    state: TransactionState,
    mode: TransactionMode,
    timeout: Duration,
    deadline: Option<Instant>,
    callback: Option<SentCallback>,
}

impl Transaction {
    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// When the armed timer fires, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("peer", &self.peer)
            .field("sfid", &self.sfid)
            .field("cmd", &self.cmd)
            .field("seqno", &self.seqno)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("deadline", &self.deadline)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Bounded pool of transactions, at most one per peer
///
/// Moving a transaction to `Terminating` only queues it; it is freed by the
/// next [`process_pending`](Self::process_pending) pass.
#[derive(Debug)]
pub struct TransactionManager {
    pool: Arena<Transaction>,
    pending: VecDeque<TransactionId>,
}

impl TransactionManager {
    pub fn new(capacity: usize) -> Self {
        TransactionManager {
            pool: Arena::with_capacity(capacity),
            pending: VecDeque::new(),
        }
    }

    /// Opens a transaction for the Request `frame` exchanged with `peer`
    pub fn alloc(
        &mut self,
        frame: &PacketFrame,
        peer: LinkAddr,
        registry: &SfRegistry,
    ) -> Result<TransactionId, AllocError> {
        let cmd = frame.code.command().ok_or(AllocError::NotARequest)?;
        let timeout = registry
            .timeout_interval(frame.sfid)
            .ok_or(AllocError::UnknownSchedulingFunction(frame.sfid))?;
        if self.find(&peer).is_some() {
            return Err(AllocError::Duplicate);
        }

        let mode = TransactionMode::for_frame(frame);
        let trans = Transaction {
            peer,
            sfid: frame.sfid,
            cmd,
            seqno: frame.seqno,
            state: TransactionState::Init,
            mode,
            timeout,
            deadline: None,
            callback: None,
        };
        let id = self
            .pool
            .insert(trans)
            .map_err(|_| AllocError::PoolExhausted)?;
        debug!(peer = %peer, seqno = frame.seqno, ?cmd, ?mode, "transaction allocated");
        Ok(id)
    }

    pub fn find(&self, peer: &LinkAddr) -> Option<TransactionId> {
        self.pool.find(|t| t.peer == *peer)
    }

    pub fn get(&self, id: TransactionId) -> Option<&Transaction> {
        self.pool.get(id)
    }

    /// Current state of the transaction with `peer`
    pub fn state_of(&self, peer: &LinkAddr) -> Option<TransactionState> {
        self.find(peer).and_then(|id| self.get(id)).map(|t| t.state)
    }

    /// Moves a transaction to `to`, arming its timer
    ///
    /// Illegal transitions leave the transaction untouched. A stale handle is
    /// ignored.
    pub fn transit(&mut self, id: TransactionId, to: TransactionState) -> Result<(), InvalidTransition> {
        let Some(trans) = self.pool.get_mut(id) else {
            debug!(?to, "transition on a freed transaction ignored");
            return Ok(());
        };
        check_transition(trans.state, to, trans.mode)?;

        debug!(
            peer = %trans.peer,
            seqno = trans.seqno,
            from = trans.state.as_str(),
            to = to.as_str(),
            "transaction state changed"
        );
        let was_terminating = trans.state == TransactionState::Terminating;
        trans.state = to;

        if to == TransactionState::Terminating {
            trans.deadline = None;
            if !was_terminating {
                self.pending.push_back(id);
            }
        } else {
            trans.deadline = Instant::now().checked_add(trans.timeout);
            if trans.deadline.is_none() {
                warn!(peer = %trans.peer, timeout = ?trans.timeout, "timeout out of range; timer not armed");
            }
            if to.is_complete(trans.mode) {
                self.pending.push_back(id);
            }
        }
        Ok(())
    }

    /// Forces a transaction to `Terminating`
    pub fn terminate(&mut self, id: TransactionId) {
        // always legal
        let _ = self.transit(id, TransactionState::Terminating);
    }

    /// Runs the work queued before this call
    ///
    /// Terminating transactions are freed and completed ones are moved to
    /// `Terminating`; anything queued meanwhile waits for the next pass.
    pub fn process_pending(&mut self) {
        let batch = std::mem::take(&mut self.pending);
        for id in batch {
            let Some(trans) = self.pool.get(id) else {
                continue;
            };
            if trans.state == TransactionState::Terminating {
                self.free(id);
            } else if trans.state.is_complete(trans.mode) {
                self.terminate(id);
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Removes a transaction from the pool
    pub fn free(&mut self, id: TransactionId) -> Option<Transaction> {
        let trans = self.pool.remove(id)?;
        debug!(peer = %trans.peer, seqno = trans.seqno, "transaction freed");
        Some(trans)
    }

    /// Live transactions whose timer expired at or before `now`
    pub fn expired(&self, now: Instant) -> Vec<TransactionId> {
        self.pool
            .iter()
            .filter(|(_, t)| t.state != TransactionState::Terminating)
            .filter(|(_, t)| t.deadline.map_or(false, |d| d <= now))
            .map(|(id, _)| id)
            .collect()
    }

    /// Earliest armed timer
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pool.iter().filter_map(|(_, t)| t.deadline).min()
    }

    pub fn set_callback(&mut self, id: TransactionId, callback: SentCallback) {
        if let Some(trans) = self.pool.get_mut(id) {
            trans.callback = Some(callback);
        }
    }

    pub fn take_callback(&mut self, id: TransactionId) -> Option<SentCallback> {
        self.pool.get_mut(id).and_then(|t| t.callback.take())
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Drops every transaction and all queued work
    pub fn clear(&mut self) {
        self.pool.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sf::{InputEvent, SchedulingFunction};
    use crate::protocol::packet::{cell_request_body, status_request_body, CellOptions};
    use crate::protocol::{Cell, MessageType};
    use TransactionState::*;

    struct Noop;

    impl SchedulingFunction for Noop {
        fn sfid(&self) -> u8 {
            0xf1
        }

        fn timeout_interval(&self) -> Option<Duration> {
            Some(Duration::from_millis(500))
        }

        fn input(&mut self, _sixp: &mut Sixp, _event: InputEvent) {}
    }

    fn registry() -> SfRegistry {
        let mut registry = SfRegistry::new(1, Duration::from_secs(1));
        registry.add(Box::new(Noop)).unwrap();
        registry
    }

    fn add_request(sfid: u8, cells: &[Cell]) -> PacketFrame {
        let body = cell_request_body(Command::Add, 0, CellOptions::TX, 1, cells).unwrap();
        PacketFrame::new(MessageType::Request, Command::Add, sfid, 3, 0, 0, body)
    }

    fn peer(id: u16) -> LinkAddr {
        LinkAddr::from_short(id)
    }

    #[test]
    fn test_alloc_failures() {
        let registry = registry();
        let mut manager = TransactionManager::new(1);

        assert_eq!(
            manager.alloc(&add_request(0x02, &[]), peer(1), &registry),
            Err(AllocError::UnknownSchedulingFunction(0x02))
        );

        manager.alloc(&add_request(0xf1, &[]), peer(1), &registry).unwrap();
        assert_eq!(
            manager.alloc(&add_request(0xf1, &[]), peer(1), &registry),
            Err(AllocError::Duplicate)
        );
        assert_eq!(
            manager.alloc(&add_request(0xf1, &[]), peer(2), &registry),
            Err(AllocError::PoolExhausted)
        );

        let response = PacketFrame::new(
            MessageType::Response,
            crate::protocol::ReturnCode::Success,
            0xf1,
            0,
            0,
            0,
            bytes::Bytes::new(),
        );
        assert_eq!(
            manager.alloc(&response, peer(3), &registry),
            Err(AllocError::NotARequest)
        );
    }

    #[test]
    fn test_mode_and_fields() {
        let registry = registry();
        let mut manager = TransactionManager::new(2);

        let three = manager.alloc(&add_request(0xf1, &[]), peer(1), &registry).unwrap();
        let two = manager
            .alloc(&add_request(0xf1, &[Cell::new(1, 1)]), peer(2), &registry)
            .unwrap();

        let t = manager.get(three).unwrap();
        assert_eq!(t.mode(), TransactionMode::ThreeStep);
        assert_eq!(t.state(), Init);
        assert_eq!(t.seqno, 3);
        assert_eq!(t.cmd, Command::Add);
        assert!(t.deadline().is_none());
        assert_eq!(manager.get(two).unwrap().mode(), TransactionMode::TwoStep);
    }

    #[test]
    fn test_single_transaction_per_peer() {
        let registry = registry();
        let mut manager = TransactionManager::new(2);
        let frame = add_request(0xf1, &[]);

        let id = manager.alloc(&frame, peer(1), &registry).unwrap();
        assert!(manager.alloc(&frame, peer(1), &registry).is_err());

        manager.terminate(id);
        // still present until the next pass
        assert!(manager.alloc(&frame, peer(1), &registry).is_err());
        manager.process_pending();
        assert!(manager.get(id).is_none());
        assert!(manager.alloc(&frame, peer(1), &registry).is_ok());
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let registry = registry();
        let mut manager = TransactionManager::new(1);
        let id = manager.alloc(&add_request(0xf1, &[]), peer(1), &registry).unwrap();

        assert_eq!(
            manager.transit(id, ResponseSent),
            Err(InvalidTransition {
                from: Init,
                to: ResponseSent
            })
        );
        assert_eq!(manager.get(id).unwrap().state(), Init);
        assert!(!manager.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transit_arms_timer() {
        let registry = registry();
        let mut manager = TransactionManager::new(1);
        let id = manager.alloc(&add_request(0xf1, &[]), peer(1), &registry).unwrap();

        let start = Instant::now();
        manager.transit(id, RequestReceived).unwrap();
        assert_eq!(manager.next_deadline(), Some(start + Duration::from_millis(500)));
        assert!(manager.expired(start).is_empty());

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(manager.expired(Instant::now()), vec![id]);

        manager.terminate(id);
        assert_eq!(manager.next_deadline(), None);
        assert!(manager.expired(Instant::now()).is_empty());
    }

    #[test]
    fn test_two_step_completion_takes_two_passes() {
        let registry = registry();
        let mut manager = TransactionManager::new(1);
        let frame = PacketFrame::new(
            MessageType::Request,
            Command::Status,
            0xf1,
            0,
            0,
            0,
            status_request_body(0, CellOptions::TX).unwrap(),
        );
        let id = manager.alloc(&frame, peer(1), &registry).unwrap();
        manager.transit(id, RequestReceived).unwrap();
        manager.process_pending();
        manager.transit(id, ResponseSent).unwrap();
        assert!(manager.has_pending());

        manager.process_pending();
        assert_eq!(manager.get(id).unwrap().state(), Terminating);
        manager.process_pending();
        assert!(manager.get(id).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_callback_taken_once() {
        let registry = registry();
        let mut manager = TransactionManager::new(1);
        let id = manager.alloc(&add_request(0xf1, &[]), peer(1), &registry).unwrap();

        manager.set_callback(id, Box::new(|_, _, _| {}));
        assert!(manager.take_callback(id).is_some());
        assert!(manager.take_callback(id).is_none());
    }

    #[test]
    fn test_clear() {
        let registry = registry();
        let mut manager = TransactionManager::new(1);
        let id = manager.alloc(&add_request(0xf1, &[]), peer(1), &registry).unwrap();
        manager.terminate(id);
        manager.clear();
        assert!(manager.is_empty());
        assert!(!manager.has_pending());
        assert!(manager.state_of(&peer(1)).is_none());
    }
}
