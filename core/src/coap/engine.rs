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

//! The CoAP engine (C5): binds the codec, transaction table and observe registry to a
//! [`Transport`], and runs the receive → match → handler-chain dispatch loop.
//!
//! Grounded on `async-coap::datagram::DatagramLocalEndpoint`'s receive loop shape, but made
//! synchronous: `send_request` takes a callback instead of returning a `Future`, per the
//! single-threaded cooperative model (§5).

use super::observe::ObserveRegistry;
use super::transaction::{RetransmitOutcome, TransactionTable};
use crate::message::{
    MessageRead, MessageWrite, MsgCode, MsgId, MsgToken, MsgType, OwnedImmutableMessage,
    StandardMessageParser, VecMessageEncoder,
};
use crate::option::{self, OptionInsertExt, OptionIteratorExt};
use crate::timer::TimerWheel;
use crate::transport::{Endpoint, Transport};
use crate::{ContentFormat, EngineConfig, Error};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Whether a [`CoapHandler`] consumed the request.
pub enum HandlerResult {
    /// This handler did not recognize the request; the next handler in the chain is tried.
    Continue,

    /// This handler produced a response; no further handlers are tried.
    Processed,
}

/// A resource handler installed on an [`Engine`]'s handler chain.
///
/// Handlers are tried in the order they were added; the first one to return
/// [`HandlerResult::Processed`] wins (§4.5). If none processes the request, the engine answers
/// with `4.04 Not Found`.
pub trait CoapHandler {
    /// Inspects `request` and, if it recognizes it, fills in `response` and returns
    /// [`HandlerResult::Processed`].
    fn handle(
        &mut self,
        now_ms: u64,
        source: Endpoint,
        request: &dyn MessageRead,
        response: &mut VecMessageEncoder,
    ) -> HandlerResult;
}

impl<H: CoapHandler> CoapHandler for Rc<RefCell<H>> {
    fn handle(
        &mut self,
        now_ms: u64,
        source: Endpoint,
        request: &dyn MessageRead,
        response: &mut VecMessageEncoder,
    ) -> HandlerResult {
        self.borrow_mut().handle(now_ms, source, request, response)
    }
}

/// Handle returned by [`Engine::add_handler`], used to later [`Engine::remove_handler`] it.
pub type HandlerId = usize;

/// The CoAP message engine.
pub struct Engine<T> {
    config: EngineConfig,
    transport: T,
    timers: TimerWheel,
    transactions: TransactionTable,
    observers: ObserveRegistry,
    handlers: Vec<Option<Box<dyn CoapHandler>>>,
    reset_notifications: Rc<RefCell<VecDeque<(Endpoint, MsgToken)>>>,
}

impl<T: Transport> Engine<T> {
    /// Creates a new engine over `transport`.
    pub fn new(transport: T, config: EngineConfig) -> Engine<T> {
        Engine {
            config,
            transport,
            timers: TimerWheel::new(),
            transactions: TransactionTable::new(config),
            observers: ObserveRegistry::new(),
            handlers: Vec::new(),
            reset_notifications: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// The configuration this engine was constructed with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Direct access to the observe registry, e.g. for an application that wants to inspect or
    /// tear down subscriptions outside of the request-handling path.
    pub fn observers_mut(&mut self) -> &mut ObserveRegistry {
        &mut self.observers
    }

    /// Appends a handler to the chain, returning a handle usable with
    /// [`Engine::remove_handler`].
    pub fn add_handler(&mut self, handler: Box<dyn CoapHandler>) -> HandlerId {
        self.handlers.push(Some(handler));
        self.handlers.len() - 1
    }

    /// Removes a previously added handler. No-op if already removed.
    pub fn remove_handler(&mut self, id: HandlerId) {
        if let Some(slot) = self.handlers.get_mut(id) {
            *slot = None;
        }
    }

    /// Sends a request, invoking `callback` exactly once with the response, or with `None` if
    /// the transaction is reset or (for a confirmable request) exhausts its retransmits.
    pub fn send_request<F>(
        &mut self,
        now_ms: u64,
        endpoint: Endpoint,
        confirmable: bool,
        mut message: VecMessageEncoder,
        callback: F,
    ) -> Result<(), Error>
    where
        F: FnOnce(Option<OwnedImmutableMessage>) + 'static,
    {
        let mid = self.transactions.allocate_mid();
        let token: MsgToken = rand::random::<u32>().into();
        message.set_msg_id(mid);
        message.set_msg_token(token);
        message.set_msg_type(if confirmable { MsgType::Con } else { MsgType::Non });

        let bytes: Vec<u8> = message.into();
        self.transport.send(&endpoint, &bytes)?;
        self.transactions.track(
            &mut self.timers,
            now_ms,
            endpoint,
            mid,
            token,
            bytes,
            confirmable,
            callback,
        )?;
        Ok(())
    }

    /// Builds and sends a notification to every subscriber whose observed path is a prefix of
    /// `path` (§4.4). If a subscriber resets a notification, its subscription is dropped on the
    /// next [`Engine::poll`].
    pub fn notify_observers(
        &mut self,
        now_ms: u64,
        path: &str,
        content_format: ContentFormat,
        payload: &[u8],
    ) {
        for (endpoint, token, seq) in self.observers.notify(path) {
            let mut message = VecMessageEncoder::default();
            message.set_msg_code(MsgCode::SuccessContent);
            let _ = message.insert_option(option::OBSERVE, seq);
            let _ = message.insert_option(option::CONTENT_FORMAT, content_format);
            let _ = message.append_payload_bytes(payload);

            let resets = self.reset_notifications.clone();
            let result = self.send_request(now_ms, endpoint, true, message, move |response| {
                if response.is_none() {
                    resets.borrow_mut().push_back((endpoint, token));
                }
            });

            if let Err(err) = result {
                warn!("failed to send notification to {}: {}", endpoint, err);
            }
        }
    }

    /// Feeds one inbound datagram into the engine.
    pub fn receive(&mut self, now_ms: u64, source: Endpoint, bytes: &[u8]) {
        let msg = match StandardMessageParser::new(bytes) {
            Ok(msg) => msg,
            Err(_) => {
                debug!("dropping malformed datagram from {}", source);
                return;
            }
        };

        match msg.msg_type() {
            MsgType::Rst => {
                if let Some(cb) = self.transactions.resolve_by_mid(&mut self.timers, source, msg.msg_id())
                {
                    cb(None);
                }
                return;
            }
            MsgType::Ack if msg.msg_code() == MsgCode::Empty => {
                self.transactions.mark_acked(&mut self.timers, source, msg.msg_id());
                return;
            }
            MsgType::Ack => {
                if let Some(cb) = self.transactions.resolve_by_mid(&mut self.timers, source, msg.msg_id())
                {
                    cb(Some((&msg as &dyn MessageRead).to_owned()));
                }
                return;
            }
            MsgType::Con | MsgType::Non => {}
        }

        if let Some(cb) =
            self.transactions.resolve_by_token(&mut self.timers, source, msg.msg_token())
        {
            if msg.msg_type() == MsgType::Con {
                self.send_empty_ack(source, msg.msg_id());
            }
            cb(Some((&msg as &dyn MessageRead).to_owned()));
            return;
        }

        if msg.msg_type() == MsgType::Con {
            if let Some(cached) = self.transactions.cached_response(source, msg.msg_id()) {
                let _ = self.transport.send(&source, cached);
                return;
            }
        }

        let mut response = VecMessageEncoder::default();
        let mut processed = false;
        for handler in self.handlers.iter_mut().flatten() {
            match handler.handle(now_ms, source, &msg, &mut response) {
                HandlerResult::Processed => {
                    processed = true;
                    break;
                }
                HandlerResult::Continue => {
                    response = VecMessageEncoder::default();
                }
            }
        }

        if !processed {
            response = VecMessageEncoder::default();
            response.set_msg_code(MsgCode::ClientErrorNotFound);
        } else if msg.msg_code() == MsgCode::MethodGet && response.msg_code().is_success() {
            // A handler answered a GET; if the request asked to register (`Observe: 0`) or
            // deregister (`Observe: 1`) a subscription, act on it now that we know the read
            // succeeded. No handler gets a `&mut Engine` of its own (see `rd_client`/
            // `request_state` module docs for the same constraint), so this is done here.
            match msg.options().find_next_of(option::OBSERVE).transpose() {
                Ok(Some(0)) => {
                    if let Ok(path) = msg.options().extract_uri_path() {
                        self.observers.subscribe(source, msg.msg_token(), path);
                    }
                }
                Ok(Some(_)) => {
                    self.observers.unsubscribe(source, msg.msg_token());
                }
                _ => {}
            }
        }

        self.finalize_and_send(source, &msg, response);
    }

    /// Polls the transport for inbound datagrams, runs due timers, and resends any
    /// confirmable transaction whose backoff has elapsed.
    pub fn poll(&mut self, now_ms: u64) -> Result<(), Error> {
        let mut buf = [0u8; 2048];
        loop {
            match self.transport.recv(&mut buf) {
                Ok(Some((source, len))) => self.receive(now_ms, source, &buf[..len]),
                Ok(None) => break,
                Err(err) => {
                    warn!("transport recv error: {}", err);
                    break;
                }
            }
        }

        self.timers.run(now_ms);

        for id in self.transactions.take_due() {
            match self.transactions.advance_retransmit(&mut self.timers, now_ms, id) {
                Some(RetransmitOutcome::Resend { endpoint, packet }) => {
                    if let Err(err) = self.transport.send(&endpoint, &packet) {
                        warn!("retransmit to {} failed: {}", endpoint, err);
                    }
                }
                Some(RetransmitOutcome::GaveUp) | None => {}
            }
        }

        for (endpoint, token) in self.reset_notifications.borrow_mut().drain(..) {
            self.observers.unsubscribe(endpoint, token);
        }

        Ok(())
    }

    /// Milliseconds until the engine next needs to be polled for a timer, or `None` if
    /// nothing is scheduled.
    pub fn time_to_next(&self, now_ms: u64) -> Option<u64> {
        self.timers.time_to_next(now_ms)
    }

    /// Direct access to the timer wheel, so other components (e.g. the RD client, §4.9) can
    /// schedule their own periodic work on the same clock.
    pub fn timers_mut(&mut self) -> &mut TimerWheel {
        &mut self.timers
    }

    fn send_empty_ack(&mut self, destination: Endpoint, mid: MsgId) {
        let mut ack = VecMessageEncoder::default();
        ack.set_msg_type(MsgType::Ack);
        ack.set_msg_code(MsgCode::Empty);
        ack.set_msg_id(mid);
        let bytes: Vec<u8> = ack.into();
        if let Err(err) = self.transport.send(&destination, &bytes) {
            warn!("failed to send empty ack to {}: {}", destination, err);
        }
    }

    fn finalize_and_send(
        &mut self,
        destination: Endpoint,
        request: &dyn MessageRead,
        mut response: VecMessageEncoder,
    ) {
        let response_type = match request.msg_type() {
            MsgType::Con => MsgType::Ack,
            _ => MsgType::Non,
        };
        response.set_msg_type(response_type);
        response.set_msg_id(request.msg_id());
        response.set_msg_token(request.msg_token());

        let bytes: Vec<u8> = response.into();

        if request.msg_type() == MsgType::Con {
            self.transactions.remember_response(destination, request.msg_id(), bytes.clone());
        }

        if let Err(err) = self.transport.send(&destination, &bytes) {
            warn!("failed to send response to {}: {}", destination, err);
        }
    }
}
