//! Scheduling function plug-in point.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::core::{LinkAddr, RegistryError, MAX_TIMEOUT};
use crate::protocol::{Code, Command, MessageType};

use super::Sixp;

/// A 6P frame delivered to a scheduling function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub msg_type: MessageType,
    pub code: Code,
    /// Command of the transaction; for Responses and Confirmations this is
    /// the command of the Request that opened it
    pub command: Command,
    pub sfid: u8,
    pub seqno: u8,
    pub body: Bytes,
    pub peer: LinkAddr,
}

/// Cell allocation policy driven by the engine
///
/// Handlers receive the engine so they can answer with [`Sixp::output`]
/// from inside `input` or `timeout`.
pub trait SchedulingFunction: Send {
    fn sfid(&self) -> u8;

    /// Transaction timeout; `None` falls back to the engine default
    fn timeout_interval(&self) -> Option<Duration> {
        None
    }

    /// Called when the engine is (re)initialized
    fn init(&mut self) {}

    fn input(&mut self, sixp: &mut Sixp, event: InputEvent);

    /// Called when a transaction with `peer` timed out
    fn timeout(&mut self, _sixp: &mut Sixp, _cmd: Command, _peer: LinkAddr) {}
}

struct Entry {
    sfid: u8,
    timeout: Duration,
    // None while the handler is being invoked
    handler: Option<Box<dyn SchedulingFunction>>,
    // init() requested while the handler was out
    init_pending: bool,
}

/// Bounded table of scheduling functions keyed by sfid
pub struct SfRegistry {
    entries: Vec<Entry>,
    capacity: usize,
    default_timeout: Duration,
}

impl SfRegistry {
    pub fn new(capacity: usize, default_timeout: Duration) -> Self {
        SfRegistry {
            entries: Vec::with_capacity(capacity),
            capacity,
            default_timeout,
        }
    }

    /// Registers a scheduling function
    pub fn add(&mut self, sf: Box<dyn SchedulingFunction>) -> Result<(), RegistryError> {
        let sfid = sf.sfid();
        if self.contains(sfid) {
            return Err(RegistryError::Duplicate(sfid));
        }
        if self.entries.len() >= self.capacity {
            return Err(RegistryError::Full);
        }
        let timeout = sf.timeout_interval().unwrap_or(self.default_timeout);
        if timeout.is_zero() || timeout > MAX_TIMEOUT {
            return Err(RegistryError::InvalidTimeout(timeout));
        }
        debug!(sfid, ?timeout, "scheduling function registered");
        self.entries.push(Entry {
            sfid,
            timeout,
            handler: Some(sf),
            init_pending: false,
        });
        Ok(())
    }

    /// Unregisters a scheduling function, returning it unless it is running
    pub fn remove(&mut self, sfid: u8) -> Option<Box<dyn SchedulingFunction>> {
        let pos = self.entries.iter().position(|e| e.sfid == sfid)?;
        debug!(sfid, "scheduling function removed");
        self.entries.remove(pos).handler
    }

    pub fn contains(&self, sfid: u8) -> bool {
        self.entries.iter().any(|e| e.sfid == sfid)
    }

    /// Timeout interval of a registered scheduling function
    pub fn timeout_interval(&self, sfid: u8) -> Option<Duration> {
        self.entries.iter().find(|e| e.sfid == sfid).map(|e| e.timeout)
    }

    pub fn ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries.iter().map(|e| e.sfid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn take(&mut self, sfid: u8) -> Option<Box<dyn SchedulingFunction>> {
        self.entries
            .iter_mut()
            .find(|e| e.sfid == sfid)
            .and_then(|e| e.handler.take())
    }

    /// Puts back a handler taken with `take`; dropped if it was unregistered meanwhile
    ///
    /// A handler that missed `init_all` while it was out is initialized here.
    pub(crate) fn restore(&mut self, sfid: u8, mut handler: Box<dyn SchedulingFunction>) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.sfid == sfid) {
            if entry.handler.is_none() {
                if std::mem::take(&mut entry.init_pending) {
                    handler.init();
                }
                entry.handler = Some(handler);
            }
        }
    }

    pub(crate) fn init_all(&mut self) {
        for entry in &mut self.entries {
            match entry.handler.as_mut() {
                Some(handler) => handler.init(),
                None => entry.init_pending = true,
            }
        }
    }
}

impl fmt::Debug for SfRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SfRegistry")
            .field("ids", &self.ids().collect::<Vec<_>>())
            .field("capacity", &self.capacity)
            .finish()
    }
}
