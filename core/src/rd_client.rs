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

//! The registration/bootstrap client (C9): the state machine that gets a device's endpoint
//! name known to a bootstrap server and then to a registration (LWM2M Server) server.
//!
//! Grounded on `examples/original_source/apps/oma-lwm2m/lwm2m-rd-client.c`'s `periodic_process`
//! and its `INIT`/`WAIT_NETWORK`/.../`REGISTRATION_DONE` state constants. The original drives
//! itself from an `ntimer` firing every 500 ms and performs its CoAP exchanges with the
//! blocking-looking `coap_send_request`/callback pair; here [`RdClient::poll`] is called once
//! per event-loop iteration and only does work once its own 500 ms tick
//! ([`crate::consts::RD_CLIENT_TICK_INTERVAL_MS`]) has elapsed, matching the single-threaded
//! cooperative model (§5, §4.9).

use crate::coap::Engine;
use crate::consts::{
    DEFAULT_REGISTRATION_LIFETIME_S, RD_CLIENT_NETWORK_WAIT_MS, RD_CLIENT_TICK_INTERVAL_MS,
};
use crate::dispatcher::Dispatcher;
use crate::link_format::LinkFormatWrite;
use crate::message::{MessageRead, MessageWrite, MsgCode, VecMessageEncoder};
use crate::object::Instance;
use crate::option::{self, OptionInsertExt, OptionIteratorExt};
use crate::transport::{Endpoint, Transport};
use crate::Error;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Mirrors the original's `INIT`..`REGISTRATION_DONE` constants (§4.9), extended with
/// `UpdateSent` for the registration-lifetime refresh the original never implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    WaitNetwork,
    DoBootstrap,
    BootstrapSent,
    BootstrapDone,
    DoRegistration,
    RegistrationSent,
    RegistrationDone,
    UpdateSent,
}

/// What a registration or update callback learned about the response, read back by the next
/// [`RdClient::poll`].
enum RequestOutcome {
    /// A `2.xx` response. `location_path` is `Some` only for the initial registration, which is
    /// the only exchange whose response carries a fresh `Location-Path` (§4.9).
    Success { location_path: Option<String> },

    /// No response (reset, or the transaction exhausted its retransmits), or a non-2.xx code
    /// (e.g. `4.00`/`4.04` on an Update whose registration expired server-side).
    Failed,
}

/// State toggled by a request callback, read back by the next [`RdClient::poll`]. A request
/// callback runs outside any borrow of the [`RdClient`] it belongs to (it is handed to
/// [`Engine::send_request`] as a `'static` closure), so it can only communicate through shared,
/// interior-mutable state rather than `&mut self`.
#[derive(Default)]
struct Shared {
    bootstrap_done: Cell<bool>,
    registration_outcome: RefCell<Option<RequestOutcome>>,
    update_outcome: RefCell<Option<RequestOutcome>>,
}

/// The registration/bootstrap client (C9).
pub struct RdClient {
    endpoint_name: String,
    state: State,
    next_tick_ms: u64,
    wait_until_network_check_ms: u64,
    network_ready: bool,

    use_bootstrap: bool,
    has_bootstrap_server_info: bool,
    bootstrap_server: Option<Endpoint>,
    bootstrapped: bool,

    use_registration: bool,
    has_registration_server_info: bool,
    registration_server: Option<Endpoint>,
    registered: bool,

    /// `lt=` seconds sent with registration and Update requests (§3 RD session data model).
    lifetime_s: u32,
    /// The `rd/<...>` path the server assigned on registration, read from the `Location-Path`
    /// of the `2.01` response; `POST`ed to for every subsequent Update (§4.9, §6).
    assigned_ep_path: Option<String>,
    /// Absolute clock reading at which the next Update is due (`lifetime_s / 2` after the last
    /// successful registration or update).
    next_update_ms: u64,

    shared: Rc<Shared>,
}

impl RdClient {
    /// Creates a client that will identify itself as `endpoint_name` (the LWM2M `ep=` query
    /// parameter) once a server is configured.
    pub fn new(endpoint_name: impl Into<String>) -> RdClient {
        RdClient {
            endpoint_name: endpoint_name.into(),
            state: State::Init,
            next_tick_ms: 0,
            wait_until_network_check_ms: 0,
            network_ready: true,
            use_bootstrap: false,
            has_bootstrap_server_info: false,
            bootstrap_server: None,
            bootstrapped: false,
            use_registration: false,
            has_registration_server_info: false,
            registration_server: None,
            registered: false,
            lifetime_s: DEFAULT_REGISTRATION_LIFETIME_S,
            assigned_ep_path: None,
            next_update_ms: 0,
            shared: Rc::new(Shared::default()),
        }
    }

    /// Sets the registration lifetime (`lt=` seconds) sent with registration and Update
    /// requests. Takes effect on the next registration or Update, whichever is sent first.
    pub fn set_lifetime_s(&mut self, lifetime_s: u32) {
        self.lifetime_s = lifetime_s;
    }

    /// The `rd/<assigned-endpoint>` path the server assigned on registration, if registered.
    pub fn assigned_ep_path(&self) -> Option<&str> {
        self.assigned_ep_path.as_deref()
    }

    fn update_interval_ms(&self) -> u64 {
        (self.lifetime_s as u64).saturating_mul(500)
    }

    /// Tells the client whether the transport currently has network access. The original
    /// consulted the RPL DAG directly (`has_network_access`); callers here own their own
    /// notion of "connected" and report it in.
    pub fn set_network_ready(&mut self, ready: bool) {
        self.network_ready = ready;
    }

    /// Configures (or reconfigures) the bootstrap server and re-enters the state machine from
    /// `INIT`, matching `lwm2m_rd_client_register_with_bootstrap_server`.
    pub fn set_bootstrap_server(&mut self, server: Endpoint) {
        self.bootstrap_server = Some(server);
        self.has_bootstrap_server_info = true;
        self.bootstrapped = false;
        self.registered = false;
        self.use_bootstrap = true;
        self.state = State::Init;
    }

    /// Configures (or reconfigures) the registration server and re-enters the state machine
    /// from `INIT`, matching `lwm2m_rd_client_register_with_server`.
    pub fn set_registration_server(&mut self, server: Endpoint) {
        self.registration_server = Some(server);
        self.has_registration_server_info = true;
        self.registered = false;
        self.use_registration = true;
        self.state = State::Init;
    }

    /// Whether the device is currently registered with its LWM2M server.
    pub fn is_registered(&self) -> bool {
        self.state == State::RegistrationDone && self.registered
    }

    /// Runs one tick of the state machine if at least
    /// [`crate::consts::RD_CLIENT_TICK_INTERVAL_MS`] has elapsed since the last one, sending at
    /// most one CoAP request (`periodic_process`, §4.9).
    pub fn poll<T: Transport>(
        &mut self,
        now_ms: u64,
        engine: &mut Engine<T>,
        dispatcher: &mut Dispatcher,
    ) -> Result<(), Error> {
        if now_ms < self.next_tick_ms {
            return Ok(());
        }
        self.next_tick_ms = now_ms + RD_CLIENT_TICK_INTERVAL_MS;

        // The object registry changed in a way that affects the registered object list
        // (`lwm2m_rd_client_set_update_rd`); the flag is only meaningful once we have something
        // registered to update, so it is left set until we get there.
        let update_needed =
            self.state == State::RegistrationDone && dispatcher.take_rd_update_needed();

        match self.state {
            State::Init => {
                self.state = State::WaitNetwork;
            }

            State::WaitNetwork => {
                if now_ms > self.wait_until_network_check_ms {
                    self.wait_until_network_check_ms = now_ms + RD_CLIENT_NETWORK_WAIT_MS;
                    if self.network_ready {
                        self.state =
                            if self.use_bootstrap { State::DoBootstrap } else { State::DoRegistration };
                    }
                }
            }

            State::DoBootstrap => {
                if self.use_bootstrap && !self.bootstrapped && self.has_bootstrap_server_info {
                    let server = self.bootstrap_server.expect("has_bootstrap_server_info implies Some");
                    let query = format!("ep={}", self.endpoint_name);
                    let mut request = VecMessageEncoder::default();
                    request.set_msg_code(MsgCode::MethodPost);
                    let _ = request.insert_option(option::URI_PATH, "bs");
                    let _ = request.insert_option(option::URI_QUERY, query.as_str());

                    let shared = self.shared.clone();
                    engine.send_request(now_ms, server, true, request, move |_response| {
                        shared.bootstrap_done.set(true);
                    })?;
                    self.state = State::BootstrapSent;
                }
            }

            State::BootstrapSent => {
                if self.shared.bootstrap_done.take() {
                    self.state = State::BootstrapDone;
                }
            }

            State::BootstrapDone => {
                // The bootstrap server is expected to have written a Security object instance
                // pointing at the registration server (§4.9); promoting that into
                // `registration_server` is the caller's job (it owns the object registry and
                // knows how to parse the Security URI resource), so we just fall back to
                // waiting if nothing showed up.
                if self.use_bootstrap {
                    if self.has_registration_server_info {
                        self.bootstrapped = true;
                        self.state = State::DoRegistration;
                    } else {
                        self.state = State::DoBootstrap;
                    }
                }
            }

            State::DoRegistration => {
                if self.use_registration && !self.registered && self.has_registration_server_info {
                    let server =
                        self.registration_server.expect("has_registration_server_info implies Some");
                    let payload = registration_payload(dispatcher);
                    let query = format!("ep={}&lt={}", self.endpoint_name, self.lifetime_s);

                    let mut request = VecMessageEncoder::default();
                    request.set_msg_code(MsgCode::MethodPost);
                    let _ = request.insert_option(option::URI_PATH, "rd");
                    let _ = request.insert_option(option::URI_QUERY, query.as_str());
                    let _ = request.append_payload_bytes(&payload);

                    let shared = self.shared.clone();
                    engine.send_request(now_ms, server, true, request, move |response| {
                        *shared.registration_outcome.borrow_mut() = Some(response_outcome(response));
                    })?;
                    self.state = State::RegistrationSent;
                }
                // Falls through to `RegistrationSent` below, matching the original's missing
                // `break` in this case arm (`lwm2m-rd-client.c`, `DO_REGISTRATION`): once a
                // registration is in flight there is nothing further to do this tick anyway.
            }

            State::RegistrationSent => {
                if let Some(outcome) = self.shared.registration_outcome.borrow_mut().take() {
                    match outcome {
                        RequestOutcome::Success { location_path } => {
                            if location_path.is_some() {
                                self.assigned_ep_path = location_path;
                            }
                            self.registered = true;
                            self.next_update_ms = now_ms + self.update_interval_ms();
                            self.state = State::RegistrationDone;
                        }
                        RequestOutcome::Failed => {
                            self.state = State::DoRegistration;
                        }
                    }
                }
            }

            State::RegistrationDone => {
                if update_needed || now_ms >= self.next_update_ms {
                    let server = match self.registration_server {
                        Some(server) if self.assigned_ep_path.is_some() => server,
                        _ => {
                            // No server, or we never learned an assigned path (e.g. the original
                            // registration's response carried no `Location-Path`): fall back to
                            // a full re-registration instead of an Update we can't address.
                            self.registered = false;
                            self.state = State::DoRegistration;
                            return Ok(());
                        }
                    };
                    let path = self.assigned_ep_path.as_deref().expect("checked above");
                    let query = format!("lt={}", self.lifetime_s);

                    let mut request = VecMessageEncoder::default();
                    request.set_msg_code(MsgCode::MethodPost);
                    for segment in path.split('/').filter(|s| !s.is_empty()) {
                        let _ = request.insert_option(option::URI_PATH, segment);
                    }
                    let _ = request.insert_option(option::URI_QUERY, query.as_str());

                    let shared = self.shared.clone();
                    engine.send_request(now_ms, server, true, request, move |response| {
                        *shared.update_outcome.borrow_mut() = Some(response_outcome(response));
                    })?;
                    self.state = State::UpdateSent;
                }
            }

            State::UpdateSent => {
                if let Some(outcome) = self.shared.update_outcome.borrow_mut().take() {
                    match outcome {
                        RequestOutcome::Success { .. } => {
                            self.next_update_ms = now_ms + self.update_interval_ms();
                            self.state = State::RegistrationDone;
                        }
                        RequestOutcome::Failed => {
                            self.registered = false;
                            self.state = State::DoRegistration;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Interprets a registration or Update response: `2.xx` is success (carrying `Location-Path`
/// when present), anything else (including no response at all) is failure.
fn response_outcome(response: Option<crate::message::OwnedImmutableMessage>) -> RequestOutcome {
    match response {
        Some(response) if response.msg_code().is_success() => {
            let location_path = response.options().extract_location_path().ok().filter(|p| !p.is_empty());
            RequestOutcome::Success { location_path }
        }
        _ => RequestOutcome::Failed,
    }
}

/// Builds the registration payload (`lwm2m_engine_get_rd_data`): a link-format listing of every
/// supported object, `</oid>` for a bare template or `</oid/iid>` for a concrete instance.
fn registration_payload(dispatcher: &Dispatcher) -> Vec<u8> {
    let mut buffer = String::new();
    {
        let mut writer = LinkFormatWrite::new(&mut buffer);
        for instance in dispatcher.registry().all() {
            let _ = writer.link(&instance_path(instance)).finish();
        }
        let _ = writer.finish();
    }
    buffer.into_bytes()
}

fn instance_path(instance: &Instance) -> String {
    match instance.iid() {
        Some(iid) => format!("/{}/{}", instance.oid(), iid),
        None => format!("/{}", instance.oid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::{CoapHandler, HandlerResult};
    use crate::transport::LoopbackTransport;
    use crate::EngineConfig;

    /// Stands in for the Resource Directory server endpoint (out of scope for this crate, §8
    /// Non-goals): answers `POST /rd?ep=...` with `2.01 Created` and a `Location-Path`, and any
    /// `POST` to that assigned path with `2.04 Changed`, counting how many of each it receives.
    struct FakeRdServer {
        assigned: &'static str,
        registrations: Rc<Cell<u32>>,
        updates: Rc<Cell<u32>>,
    }

    impl CoapHandler for FakeRdServer {
        fn handle(
            &mut self,
            _now_ms: u64,
            _source: Endpoint,
            request: &dyn MessageRead,
            response: &mut VecMessageEncoder,
        ) -> HandlerResult {
            if request.msg_code() != MsgCode::MethodPost {
                return HandlerResult::Continue;
            }
            let path = match request.options().extract_uri_path() {
                Ok(path) => path,
                Err(_) => return HandlerResult::Continue,
            };
            if path == "rd" {
                self.registrations.set(self.registrations.get() + 1);
                response.set_msg_code(MsgCode::SuccessCreated);
                let _ = response.insert_option(option::LOCATION_PATH, "rd");
                let _ = response.insert_option(option::LOCATION_PATH, self.assigned);
                HandlerResult::Processed
            } else if path == format!("rd/{}", self.assigned) {
                self.updates.set(self.updates.get() + 1);
                response.set_msg_code(MsgCode::SuccessChanged);
                HandlerResult::Processed
            } else {
                HandlerResult::Continue
            }
        }
    }

    #[test]
    fn registers_without_bootstrap() {
        let server_ep = Endpoint::parse("coap://127.0.0.1:5683").unwrap();
        let client_ep = Endpoint::parse("coap://127.0.0.1:9999").unwrap();
        let (client_transport, server_transport) = LoopbackTransport::pair(client_ep, server_ep);

        let mut server = Engine::new(server_transport, EngineConfig::default());
        server.add_handler(Box::new(FakeRdServer {
            assigned: "xyz",
            registrations: Rc::new(Cell::new(0)),
            updates: Rc::new(Cell::new(0)),
        }));

        let mut client_engine = Engine::new(client_transport, EngineConfig::default());
        let mut client_dispatcher = Dispatcher::new(EngineConfig::default());
        client_dispatcher.registry_mut().create_instance(3, 0).unwrap();

        let mut rd_client = RdClient::new("test-endpoint");
        rd_client.set_registration_server(server_ep);

        let mut now_ms = 0u64;
        for _ in 0..10 {
            rd_client.poll(now_ms, &mut client_engine, &mut client_dispatcher).unwrap();
            server.poll(now_ms).unwrap();
            client_engine.poll(now_ms).unwrap();
            if rd_client.is_registered() {
                break;
            }
            now_ms += RD_CLIENT_TICK_INTERVAL_MS;
        }

        assert!(rd_client.is_registered());
        assert_eq!(rd_client.assigned_ep_path(), Some("rd/xyz"));
    }

    #[test]
    fn sends_update_once_lifetime_half_elapses() {
        let server_ep = Endpoint::parse("coap://127.0.0.1:5683").unwrap();
        let client_ep = Endpoint::parse("coap://127.0.0.1:9999").unwrap();
        let (client_transport, server_transport) = LoopbackTransport::pair(client_ep, server_ep);

        let registrations = Rc::new(Cell::new(0));
        let updates = Rc::new(Cell::new(0));

        let mut server = Engine::new(server_transport, EngineConfig::default());
        server.add_handler(Box::new(FakeRdServer {
            assigned: "xyz",
            registrations: registrations.clone(),
            updates: updates.clone(),
        }));

        let mut client_engine = Engine::new(client_transport, EngineConfig::default());
        let mut client_dispatcher = Dispatcher::new(EngineConfig::default());
        client_dispatcher.registry_mut().create_instance(3, 0).unwrap();

        let mut rd_client = RdClient::new("test-endpoint");
        rd_client.set_lifetime_s(4);
        rd_client.set_registration_server(server_ep);

        let mut now_ms = 0u64;
        for _ in 0..20 {
            rd_client.poll(now_ms, &mut client_engine, &mut client_dispatcher).unwrap();
            server.poll(now_ms).unwrap();
            client_engine.poll(now_ms).unwrap();
            server.poll(now_ms).unwrap();
            client_engine.poll(now_ms).unwrap();
            now_ms += RD_CLIENT_TICK_INTERVAL_MS;
            if updates.get() > 0 {
                break;
            }
        }

        assert_eq!(registrations.get(), 1);
        assert!(updates.get() > 0, "expected at least one Update POST before lifetime/2 + epsilon");
    }

    #[test]
    fn registration_payload_lists_templates_and_instances() {
        let mut dispatcher = Dispatcher::new(EngineConfig::default());
        dispatcher.registry_mut().register_template(0);
        dispatcher.registry_mut().create_instance(3, 0).unwrap();

        let text = String::from_utf8(registration_payload(&dispatcher)).unwrap();
        assert!(text.contains("</0>"));
        assert!(text.contains("</3/0>"));
    }
}
