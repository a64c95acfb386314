//! End-to-end walkthrough of the registration-and-resource-read scenario described in §4.9/§7:
//! a device registers itself with its LWM2M server, the server learns the assigned `rd/<ep>`
//! path from the `Location-Path` of the `2.01` response, and then reads a resource back from
//! the device over the same engine pair.
//!
//! Exercised the way `examples/google-rust-async-coap/async-coap-tokio/tests/test.rs` exercises
//! the teacher's stack: as an external integration test driving the public API over real
//! message encode/decode, rather than a unit test poking at crate-internal state.

use lwm2m_client_core::coap::{CoapHandler, Engine, HandlerResult};
use lwm2m_client_core::codecs::LwM2mValue;
use lwm2m_client_core::dispatcher::Dispatcher;
use lwm2m_client_core::message::{MessageRead, MessageWrite, MsgCode, VecMessageEncoder};
use lwm2m_client_core::object::ResourceAccess;
use lwm2m_client_core::option::{self, OptionInsertExt, OptionIteratorExt};
use lwm2m_client_core::rd_client::RdClient;
use lwm2m_client_core::transport::{Endpoint, LoopbackTransport};
use lwm2m_client_core::ContentFormat;
use lwm2m_client_core::EngineConfig;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Stands in for the LWM2M server's Resource Directory endpoint (implementing a real RD server
/// is explicitly out of scope for this crate's Non-goals): accepts `POST /rd?ep=...&lt=...` and
/// assigns a fixed `Location-Path`, and remembers every subsequently GET-able endpoint so the
/// test can issue a read back to the device that just registered.
struct FakeLwm2mServer {
    assigned: &'static str,
    registrations: Rc<Cell<u32>>,
}

impl CoapHandler for FakeLwm2mServer {
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
        if path != "rd" {
            return HandlerResult::Continue;
        }
        let query = request.options().extract_uri_query().unwrap_or_default();
        assert!(
            query.iter().any(|q| q.contains("ep=device-1")),
            "registration query missing endpoint name: {:?}",
            query
        );
        assert!(query.iter().any(|q| q.contains("lt=")), "registration query missing lifetime: {:?}", query);

        self.registrations.set(self.registrations.get() + 1);
        response.set_msg_code(MsgCode::SuccessCreated);
        let _ = response.insert_option(option::LOCATION_PATH, "rd");
        let _ = response.insert_option(option::LOCATION_PATH, self.assigned);
        HandlerResult::Processed
    }
}

fn get_request(path: &str) -> VecMessageEncoder {
    let mut msg = VecMessageEncoder::default();
    msg.set_msg_code(MsgCode::MethodGet);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let _ = msg.insert_option(option::URI_PATH, segment);
    }
    msg
}

#[test]
fn device_registers_then_answers_a_resource_read() {
    let server_ep = Endpoint::parse("coap://127.0.0.1:5683").unwrap();
    let device_ep = Endpoint::parse("coap://127.0.0.1:9999").unwrap();
    let (device_transport, server_transport) = LoopbackTransport::pair(device_ep, server_ep);

    let registrations = Rc::new(Cell::new(0));
    let mut server_engine = Engine::new(server_transport, EngineConfig::default());
    server_engine.add_handler(Box::new(FakeLwm2mServer { assigned: "xyz", registrations: registrations.clone() }));

    let dispatcher = Rc::new(RefCell::new(Dispatcher::new(EngineConfig::default())));
    {
        let mut dispatcher = dispatcher.borrow_mut();
        dispatcher.registry_mut().create_instance(3, 0).unwrap();
        let instance = dispatcher.registry_mut().find_mut(3, 0).unwrap();
        instance.resources_mut().insert(0, LwM2mValue::String("ACME".to_owned()));
        instance.set_access(0, ResourceAccess::READABLE);
    }

    let mut device_engine = Engine::new(device_transport, EngineConfig::default());
    device_engine.add_handler(Box::new(dispatcher.clone()));

    let mut rd_client = RdClient::new("device-1");
    rd_client.set_registration_server(server_ep);

    let mut now_ms = 0u64;
    for _ in 0..10 {
        rd_client.poll(now_ms, &mut device_engine, &mut dispatcher.borrow_mut()).unwrap();
        server_engine.poll(now_ms).unwrap();
        device_engine.poll(now_ms).unwrap();
        if rd_client.is_registered() {
            break;
        }
        now_ms += 500;
    }

    assert!(rd_client.is_registered(), "device never reached REGISTRATION_DONE");
    assert_eq!(registrations.get(), 1);
    assert_eq!(rd_client.assigned_ep_path(), Some("rd/xyz"));

    let got = Rc::new(RefCell::new(None));
    let got2 = got.clone();
    server_engine
        .send_request(now_ms, device_ep, true, get_request("3/0/0"), move |response| {
            *got2.borrow_mut() = response;
        })
        .unwrap();

    device_engine.poll(now_ms).unwrap();
    server_engine.poll(now_ms).unwrap();

    let response = got.borrow_mut().take().expect("server never got a response to its GET");
    assert_eq!(response.msg_code(), MsgCode::SuccessContent);
    assert_eq!(response.payload(), b"ACME");
    assert_eq!(response.content_format(), Some(ContentFormat::LWM2M_TEXT_PLAIN));
}
