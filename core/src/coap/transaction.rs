// Copyright 2019 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Tracks outstanding confirmable transactions: retransmission backoff, MID/token matching,
//! and duplicate-request detection.
//!
//! Rendered as a fixed-capacity arena keyed by a `u16` handle rather than a general-purpose
//! `HashMap`-based response tracker, since the target device has a small, bounded
//! `MAX_TRANSACTIONS` (`EngineConfig::max_transactions`).

use crate::message::{MsgId, MsgToken, OwnedImmutableMessage};
use crate::timer::{TimerId, TimerWheel};
use crate::transport::Endpoint;
use crate::EngineConfig;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Handle to a tracked transaction.
pub type TransactionId = u16;

/// What the engine should do about a transaction whose retransmit timer fired.
pub enum RetransmitOutcome {
    /// Resend `packet` to `endpoint` and wait for the next backoff interval.
    Resend { endpoint: Endpoint, packet: Vec<u8> },

    /// `MAX_RETRANSMIT` attempts were exhausted; the transaction's callback has already been
    /// invoked with `None` and the slot freed.
    GaveUp,
}

struct Transaction {
    endpoint: Endpoint,
    mid: MsgId,
    token: MsgToken,
    packet: Vec<u8>,
    confirmable: bool,
    attempt: u32,
    timer: TimerId,
    callback: Option<Box<dyn FnOnce(Option<OwnedImmutableMessage>)>>,
}

/// The transaction table (C3).
pub struct TransactionTable {
    config: EngineConfig,
    slots: Vec<Option<Transaction>>,
    free: Vec<TransactionId>,
    by_mid: HashMap<(Endpoint, MsgId), TransactionId>,
    by_token: HashMap<(Endpoint, MsgToken), TransactionId>,
    dedup_cache: HashMap<(Endpoint, MsgId), Vec<u8>>,
    next_mid: MsgId,
    due: Rc<RefCell<VecDeque<TransactionId>>>,
}

impl TransactionTable {
    /// Creates an empty transaction table, seeding the message-id counter randomly per
    /// RFC 7252 §4.4 ("SHOULD be generated... in a manner that avoids new and old messages
    /// from the same endpoint using the same Message ID within EXCHANGE_LIFETIME").
    pub fn new(config: EngineConfig) -> TransactionTable {
        TransactionTable {
            config,
            slots: Vec::new(),
            free: Vec::new(),
            by_mid: HashMap::new(),
            by_token: HashMap::new(),
            dedup_cache: HashMap::new(),
            next_mid: rand::random(),
            due: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// Allocates the next message id, wrapping at `u16::MAX`.
    pub fn allocate_mid(&mut self) -> MsgId {
        let mid = self.next_mid;
        self.next_mid = self.next_mid.wrapping_add(1);
        mid
    }

    /// True if `(endpoint, mid)` matches an inbound request we've already answered.
    pub fn is_duplicate_request(&self, endpoint: Endpoint, mid: MsgId) -> bool {
        self.dedup_cache.contains_key(&(endpoint, mid))
    }

    /// The cached response bytes for a duplicate request, if any.
    pub fn cached_response(&self, endpoint: Endpoint, mid: MsgId) -> Option<&[u8]> {
        self.dedup_cache.get(&(endpoint, mid)).map(Vec::as_slice)
    }

    /// Remembers the bytes sent in response to `(endpoint, mid)`, so a retransmitted request
    /// can be answered without re-invoking the handler chain.
    pub fn remember_response(&mut self, endpoint: Endpoint, mid: MsgId, bytes: Vec<u8>) {
        let cap = self.config.max_transactions.saturating_mul(4).max(4);
        if self.dedup_cache.len() >= cap {
            if let Some(oldest) = self.dedup_cache.keys().next().copied() {
                self.dedup_cache.remove(&oldest);
            }
        }
        self.dedup_cache.insert((endpoint, mid), bytes);
    }

    /// Begins tracking a request we've just sent, returning its handle.
    ///
    /// `callback` is invoked at most once: with `Some(response)` on a matching ACK/separate
    /// response, or with `None` on RST or retransmission giveup.
    #[allow(clippy::too_many_arguments)]
    pub fn track<F>(
        &mut self,
        timers: &mut TimerWheel,
        now_ms: u64,
        endpoint: Endpoint,
        mid: MsgId,
        token: MsgToken,
        packet: Vec<u8>,
        confirmable: bool,
        callback: F,
    ) -> Result<TransactionId, crate::Error>
    where
        F: FnOnce(Option<OwnedImmutableMessage>) + 'static,
    {
        let live = self.slots.len() - self.free.len();
        if live >= self.config.max_transactions {
            return Err(crate::Error::OutOfSpace);
        }

        let id = self.free.last().copied().unwrap_or(self.slots.len() as TransactionId);

        let due = self.due.clone();
        let timer = timers.create(move |_wheel, _id| due.borrow_mut().push_back(id));
        if confirmable {
            timers.set(
                timer,
                now_ms,
                self.config.calc_retransmit_duration(1).as_millis() as u64,
            );
        }

        let txn = Transaction {
            endpoint,
            mid,
            token,
            packet,
            confirmable,
            attempt: 1,
            timer,
            callback: Some(Box::new(callback)),
        };

        let id = if let Some(id) = self.free.pop() {
            self.slots[id as usize] = Some(txn);
            id
        } else {
            self.slots.push(Some(txn));
            (self.slots.len() - 1) as TransactionId
        };

        self.by_mid.insert((endpoint, mid), id);
        self.by_token.insert((endpoint, token), id);

        Ok(id)
    }

    /// Drains the set of transactions whose retransmit timer has fired since the last call.
    pub fn take_due(&mut self) -> Vec<TransactionId> {
        self.due.borrow_mut().drain(..).collect()
    }

    /// Advances a due transaction: resends it, or gives up if `MAX_RETRANSMIT` is exceeded.
    ///
    /// Returns `None` if `id` is no longer tracked (e.g. it was resolved concurrently).
    pub fn advance_retransmit(
        &mut self,
        timers: &mut TimerWheel,
        now_ms: u64,
        id: TransactionId,
    ) -> Option<RetransmitOutcome> {
        let attempt = {
            let txn = self.slots.get(id as usize)?.as_ref()?;
            if !txn.confirmable {
                return None;
            }
            txn.attempt
        };

        if attempt >= self.config.max_retransmit {
            let txn = self.remove(timers, id)?;
            if let Some(cb) = txn.callback {
                cb(None);
            }
            return Some(RetransmitOutcome::GaveUp);
        }

        let txn = self.slots.get_mut(id as usize)?.as_mut()?;
        txn.attempt += 1;
        let delay = self.config.calc_retransmit_duration(txn.attempt);
        timers.set(txn.timer, now_ms, delay.as_millis() as u64);

        Some(RetransmitOutcome::Resend { endpoint: txn.endpoint, packet: txn.packet.clone() })
    }

    /// Resolves the transaction matching `(endpoint, mid)` (ACK or RST), returning its
    /// callback for the caller to invoke.
    pub fn resolve_by_mid(
        &mut self,
        timers: &mut TimerWheel,
        endpoint: Endpoint,
        mid: MsgId,
    ) -> Option<Box<dyn FnOnce(Option<OwnedImmutableMessage>)>> {
        let id = *self.by_mid.get(&(endpoint, mid))?;
        let mut txn = self.remove(timers, id)?;
        txn.callback.take()
    }

    /// Resolves the transaction matching `(endpoint, token)` (separate response).
    pub fn resolve_by_token(
        &mut self,
        timers: &mut TimerWheel,
        endpoint: Endpoint,
        token: MsgToken,
    ) -> Option<Box<dyn FnOnce(Option<OwnedImmutableMessage>)>> {
        let id = *self.by_token.get(&(endpoint, token))?;
        let mut txn = self.remove(timers, id)?;
        txn.callback.take()
    }

    /// Marks `(endpoint, mid)` as acknowledged by an empty ACK, stopping its retransmit timer
    /// while leaving it tracked (by token) for the separate response that will follow.
    pub fn mark_acked(&mut self, timers: &mut TimerWheel, endpoint: Endpoint, mid: MsgId) {
        if let Some(id) = self.by_mid.remove(&(endpoint, mid)) {
            if let Some(Some(txn)) = self.slots.get_mut(id as usize).map(|s| s.as_mut()) {
                timers.stop(txn.timer);
            }
        }
    }

    /// Cancels a tracked transaction, invoking its callback with `None`.
    pub fn cancel(&mut self, timers: &mut TimerWheel, id: TransactionId) {
        if let Some(txn) = self.remove(timers, id) {
            if let Some(cb) = txn.callback {
                cb(None);
            }
        }
    }

    fn remove(&mut self, timers: &mut TimerWheel, id: TransactionId) -> Option<Transaction> {
        let txn = self.slots.get_mut(id as usize)?.take()?;
        timers.free(txn.timer);
        self.by_mid.remove(&(txn.endpoint, txn.mid));
        self.by_token.remove(&(txn.endpoint, txn.token));
        self.free.push(id);
        Some(txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn endpoint(port: u16) -> Endpoint {
        Endpoint::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port), false)
    }

    #[test]
    fn ack_resolves_and_invokes_callback_once() {
        let mut timers = TimerWheel::new();
        let mut table = TransactionTable::new(EngineConfig::default());
        let got = Rc::new(Cell::new(false));
        let got2 = got.clone();

        let ep = endpoint(1);
        table
            .track(&mut timers, 0, ep, 7, MsgToken::from(1u32), vec![1, 2, 3], true, move |resp| {
                assert!(resp.is_none());
                got2.set(true);
            })
            .unwrap();

        let cb = table.resolve_by_mid(&mut timers, ep, 7).expect("transaction present");
        cb(None);
        assert!(got.get());
        assert!(table.resolve_by_mid(&mut timers, ep, 7).is_none());
    }

    #[test]
    fn gives_up_after_max_retransmit() {
        let mut timers = TimerWheel::new();
        let config = EngineConfig { max_retransmit: 2, ..EngineConfig::default() };
        let mut table = TransactionTable::new(config);
        let attempts = Rc::new(Cell::new(0u32));

        let ep = endpoint(2);
        table
            .track(&mut timers, 0, ep, 1, MsgToken::EMPTY, vec![0], true, |_| {})
            .unwrap();

        let mut outcome = table.advance_retransmit(&mut timers, 1, 0);
        while let Some(RetransmitOutcome::Resend { .. }) = outcome {
            attempts.set(attempts.get() + 1);
            outcome = table.advance_retransmit(&mut timers, 1, 0);
        }
        assert!(matches!(outcome, Some(RetransmitOutcome::GaveUp)));
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn duplicate_request_is_cached() {
        let mut table = TransactionTable::new(EngineConfig::default());
        let ep = endpoint(3);
        assert!(!table.is_duplicate_request(ep, 5));
        table.remember_response(ep, 5, vec![9, 9]);
        assert!(table.is_duplicate_request(ep, 5));
        assert_eq!(table.cached_response(ep, 5), Some(&[9u8, 9][..]));
    }
}
