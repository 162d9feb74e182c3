//! Bookkeeping for requests awaiting their response.

use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::rpc::error::LedgerError;
use crate::rpc::protocol::{Request, RequestId};

/// An outgoing request that has not been fully answered yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    /// The request as it was sent.
    pub request: Request,
    /// When the request was recorded.
    pub sent_at: Instant,
}

impl PendingCall {
    /// The correlation ID of the request.
    #[must_use]
    pub const fn id(&self) -> &RequestId {
        &self.request.id
    }

    /// The method of the request.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.request.method
    }

    /// Time since the request was recorded, measured against `now`.
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.sent_at)
    }
}

/// Outstanding requests keyed by correlation ID, in send order.
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: IndexMap<RequestId, PendingCall>,
}

impl PendingCalls {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request that is about to be sent.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateId`] if a request with the same ID is
    /// already pending.
    pub fn insert(&mut self, request: Request) -> Result<(), LedgerError> {
        self.insert_at(request, Instant::now())
    }

    /// Records a request with an explicit send time.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateId`] if a request with the same ID is
    /// already pending.
    pub fn insert_at(&mut self, request: Request, sent_at: Instant) -> Result<(), LedgerError> {
        if self.calls.contains_key(&request.id) {
            return Err(LedgerError::DuplicateId { id: request.id });
        }
        self.calls
            .insert(request.id.clone(), PendingCall { request, sent_at });
        Ok(())
    }

    /// Puts back a call taken with [`remove`](Self::remove), keeping its
    /// original send time.
    pub(crate) fn restore(&mut self, call: PendingCall) {
        self.calls.insert(call.request.id.clone(), call);
    }

    /// Returns the pending call for `id`.
    #[must_use]
    pub fn get(&self, id: &RequestId) -> Option<&PendingCall> {
        self.calls.get(id)
    }

    /// Returns `true` if `id` is awaiting a response.
    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.calls.contains_key(id)
    }

    /// Removes and returns the pending call for `id`.
    pub fn remove(&mut self, id: &RequestId) -> Option<PendingCall> {
        self.calls.shift_remove(id)
    }

    /// Removes every call older than `timeout`, oldest first.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<PendingCall> {
        let expired: Vec<RequestId> = self
            .calls
            .values()
            .filter(|call| call.age(now) >= timeout)
            .map(|call| call.request.id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| self.calls.shift_remove(id))
            .collect()
    }

    /// Removes and returns every pending call, oldest first.
    pub fn drain(&mut self) -> Vec<PendingCall> {
        self.calls.drain(..).map(|(_, call)| call).collect()
    }

    /// Iterates over pending calls, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PendingCall> {
        self.calls.values()
    }

    /// Number of pending calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
