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

//! Block-wise GET fetching (C10): issues successive Block2-numbered requests for one resource
//! and hands the assembled payload to a callback once the transfer completes or is abandoned.
//!
//! Grounded on `examples/original_source/apps/er-coap/er-coap-callback-api.c`'s
//! `progress_request`/`coap_request_callback`. The original resends the next block directly
//! from inside the transaction's response callback; a callback handed to
//! [`crate::coap::Engine::send_request`] here has no way back into the `&mut Engine` that owns
//! it (see [`crate::rd_client`] for the same constraint), so the response callback only records
//! the outcome into a shared cell and [`RequestState::poll`] — called by whatever already holds
//! `&mut Engine`, typically once per event-loop iteration — does the actual resending.

use crate::block::BlockInfo;
use crate::coap::Engine;
use crate::consts::MAX_BLOCK_FETCH_ATTEMPTS;
use crate::message::{MessageRead, MessageWrite, MsgCode, VecMessageEncoder};
use crate::option::{self, OptionInsertExt};
use crate::transport::{Endpoint, Transport};
use crate::{ContentFormat, Error};
use std::cell::RefCell;
use std::rc::Rc;

/// What arrived for one requested block, recorded by the response callback for
/// [`RequestState::poll`] to pick up.
struct ReceivedBlock {
    /// `false` if the transaction was reset or exhausted its retransmits
    /// (`state->response == NULL` in the original).
    ok: bool,
    num: u32,
    more: bool,
    szx: u8,
    payload: Vec<u8>,
    content_format: Option<ContentFormat>,
}

/// The final result of a block-wise fetch: the assembled payload and the content-format of its
/// first block, or `None` if the server never completed the transfer.
pub type FetchResult = Option<(Vec<u8>, Option<ContentFormat>)>;

/// Drives one block-wise GET to completion (C10).
pub struct RequestState {
    endpoint: Endpoint,
    path: String,
    accept: Option<ContentFormat>,
    payload: Vec<u8>,
    content_format: Option<ContentFormat>,
    next_block: u32,
    /// The block size (`szx`) the server granted in its most recent response; echoed back on
    /// the next block request, since the server may have reduced it from whatever was asked.
    block_szx: u8,
    mismatches: u8,
    awaiting_response: bool,
    done: bool,
    incoming: Rc<RefCell<Option<ReceivedBlock>>>,
    callback: Option<Box<dyn FnOnce(FetchResult)>>,
}

impl RequestState {
    /// Starts a fetch of `path` from `endpoint`. Nothing is sent until the first
    /// [`RequestState::poll`] call.
    pub fn new(
        endpoint: Endpoint,
        path: impl Into<String>,
        accept: Option<ContentFormat>,
        callback: impl FnOnce(FetchResult) + 'static,
    ) -> RequestState {
        RequestState {
            endpoint,
            path: path.into(),
            accept,
            payload: Vec::new(),
            content_format: None,
            next_block: 0,
            block_szx: BlockInfo::SZX_MAX,
            mismatches: 0,
            awaiting_response: false,
            done: false,
            incoming: Rc::new(RefCell::new(None)),
            callback: Some(Box::new(callback)),
        }
    }

    /// Whether the fetch has finished (successfully or not) and `callback` has been invoked.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Sends the next block if none is currently in flight, or processes the previous block's
    /// outcome and either advances, retries, or finishes (`coap_request_callback`, §4.5).
    pub fn poll<T: Transport>(&mut self, now_ms: u64, engine: &mut Engine<T>) -> Result<(), Error> {
        if self.done {
            return Ok(());
        }

        if !self.awaiting_response {
            self.send_block(now_ms, engine)?;
            return Ok(());
        }

        let received = match self.incoming.borrow_mut().take() {
            Some(block) => block,
            None => return Ok(()),
        };

        if !received.ok {
            self.finish(None);
            return Ok(());
        }

        if received.num != self.next_block {
            self.mismatches += 1;
            if self.mismatches >= MAX_BLOCK_FETCH_ATTEMPTS {
                self.finish(None);
                return Ok(());
            }
            self.awaiting_response = false;
            return Ok(());
        }

        if self.next_block == 0 {
            self.content_format = received.content_format;
        }
        self.payload.extend_from_slice(&received.payload);
        self.next_block += 1;
        self.block_szx = received.szx;

        if received.more {
            self.awaiting_response = false;
        } else {
            let payload = std::mem::take(&mut self.payload);
            let content_format = self.content_format;
            self.finish(Some((payload, content_format)));
        }

        Ok(())
    }

    fn send_block<T: Transport>(&mut self, now_ms: u64, engine: &mut Engine<T>) -> Result<(), Error> {
        let mut request = VecMessageEncoder::default();
        request.set_msg_code(MsgCode::MethodGet);
        for segment in self.path.split('/').filter(|s| !s.is_empty()) {
            request.insert_option(option::URI_PATH, segment)?;
        }
        if let Some(accept) = self.accept {
            request.insert_option(option::ACCEPT, accept)?;
        }
        if self.next_block > 0 {
            let block = BlockInfo::new(self.next_block, false, self.block_szx)
                .ok_or(Error::InvalidArgument)?;
            request.insert_option(option::BLOCK2, block)?;
        }

        let incoming = self.incoming.clone();
        engine.send_request(now_ms, self.endpoint, true, request, move |response| {
            let block = match response {
                Some(msg) => {
                    let (num, more, szx) = msg
                        .block2()
                        .map_or((0, false, BlockInfo::SZX_MAX), |b| (b.num(), b.more_flag(), b.szx()));
                    ReceivedBlock {
                        ok: true,
                        num,
                        more,
                        szx,
                        payload: msg.payload().to_vec(),
                        content_format: msg.content_format(),
                    }
                }
                None => ReceivedBlock {
                    ok: false,
                    num: 0,
                    more: false,
                    szx: BlockInfo::SZX_MAX,
                    payload: Vec::new(),
                    content_format: None,
                },
            };
            *incoming.borrow_mut() = Some(block);
        })?;

        self.awaiting_response = true;
        Ok(())
    }

    fn finish(&mut self, result: FetchResult) {
        self.done = true;
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::{CoapHandler, HandlerResult};
    use crate::transport::LoopbackTransport;
    use crate::EngineConfig;
    use std::cell::Cell;

    struct FixedBlockHandler {
        body: Vec<u8>,
        block_size: usize,
    }

    impl CoapHandler for FixedBlockHandler {
        fn handle(
            &mut self,
            _now_ms: u64,
            _source: Endpoint,
            request: &dyn MessageRead,
            response: &mut VecMessageEncoder,
        ) -> HandlerResult {
            let requested = request.block2().unwrap_or_else(|| BlockInfo::new(0, false, 0).unwrap());
            let start = requested.offset().min(self.body.len());
            let end = (start + self.block_size).min(self.body.len());
            let more = end < self.body.len();
            let block = BlockInfo::new(requested.num(), more, 0).unwrap();
            response.set_msg_code(MsgCode::SuccessContent);
            let _ = response.insert_option(option::BLOCK2, block);
            let _ = response.append_payload_bytes(&self.body[start..end]);
            HandlerResult::Processed
        }
    }

    #[test]
    fn reassembles_a_multi_block_response() {
        let server_ep = Endpoint::parse("coap://127.0.0.1:5683").unwrap();
        let client_ep = Endpoint::parse("coap://127.0.0.1:9999").unwrap();
        let (client_transport, server_transport) = LoopbackTransport::pair(client_ep, server_ep);

        let mut server = Engine::new(server_transport, EngineConfig::default());
        let body: Vec<u8> = (0u8..100).collect();
        server.add_handler(Box::new(FixedBlockHandler { body: body.clone(), block_size: 16 }));

        let mut client = Engine::new(client_transport, EngineConfig::default());

        let got = Rc::new(RefCell::new(None));
        let got2 = got.clone();
        let mut state = RequestState::new(server_ep, "3/0/0", None, move |result| {
            *got2.borrow_mut() = Some(result);
        });

        let mut now_ms = 0u64;
        for _ in 0..20 {
            state.poll(now_ms, &mut client).unwrap();
            server.poll(now_ms).unwrap();
            client.poll(now_ms).unwrap();
            if state.is_done() {
                break;
            }
            now_ms += 10;
        }

        let (payload, _) = got.borrow_mut().take().unwrap().unwrap();
        assert_eq!(payload, body);
    }

    #[test]
    fn gives_up_after_too_many_block_mismatches() {
        let server_ep = Endpoint::parse("coap://127.0.0.1:5683").unwrap();
        let client_ep = Endpoint::parse("coap://127.0.0.1:9999").unwrap();
        let (client_transport, server_transport) = LoopbackTransport::pair(client_ep, server_ep);

        struct AlwaysBlockZero;
        impl CoapHandler for AlwaysBlockZero {
            fn handle(
                &mut self,
                _now_ms: u64,
                _source: Endpoint,
                _request: &dyn MessageRead,
                response: &mut VecMessageEncoder,
            ) -> HandlerResult {
                response.set_msg_code(MsgCode::SuccessContent);
                let block = BlockInfo::new(0, true, 0).unwrap();
                let _ = response.insert_option(option::BLOCK2, block);
                let _ = response.append_payload_bytes(b"x");
                HandlerResult::Processed
            }
        }

        let mut server = Engine::new(server_transport, EngineConfig::default());
        server.add_handler(Box::new(AlwaysBlockZero));
        let mut client = Engine::new(client_transport, EngineConfig::default());

        let gave_up = Rc::new(Cell::new(false));
        let gave_up2 = gave_up.clone();
        let mut state = RequestState::new(server_ep, "3/0/0", None, move |result| {
            gave_up2.set(result.is_none());
        });

        let mut now_ms = 0u64;
        for _ in 0..20 {
            state.poll(now_ms, &mut client).unwrap();
            server.poll(now_ms).unwrap();
            client.poll(now_ms).unwrap();
            if state.is_done() {
                break;
            }
            now_ms += 10;
        }

        assert!(state.is_done());
        assert!(gave_up.get());
    }
}
