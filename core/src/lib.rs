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

//! A constrained-device implementation of an OMA LWM2M client stack, running on top of the
//! Constrained Application Protocol (CoAP) over UDP.
//!
//! Unlike a general-purpose CoAP library built around `async`/`await` and a thread pool, this
//! crate targets devices that run a single cooperative event loop: everything here blocks on
//! exactly three kinds of events (an inbound datagram, a timer expiring, or a completed request
//! callback), matching the execution model of the constrained devices this stack is meant to
//! run on.
//!
//! ## Layering
//!
//! * [`message`] and [`option`] implement the wire format of a single CoAP message
//!   ([IETF-RFC7252]).
//! * [`block`] implements the `Block1`/`Block2` bit-packed option value ([IETF-RFC7959]).
//! * [`timer`] is a single-threaded timer wheel used to schedule retransmissions and the RD
//!   client's periodic registration updates.
//! * [`transport`] defines the [`Transport`][transport::Transport] trait that a platform
//!   implements to hand this stack UDP (or DTLS-wrapped UDP) datagrams.
//! * [`coap`] ties the above together into a running [`coap::Engine`]: it assigns message ids,
//!   retransmits confirmable requests, matches responses to transactions, and tracks
//!   [IETF-RFC7641] observers.
//! * [`codecs`] implements the OMA-TLV, JSON and plain-text LWM2M resource encodings used to
//!   read and write resource values.
//! * [`object`] is the in-memory registry of LWM2M object/instance/resource callbacks that an
//!   application registers with the engine.
//! * [`dispatcher`] maps incoming CoAP requests onto LWM2M READ/WRITE/EXECUTE/DISCOVER/CREATE/
//!   DELETE operations against the object registry.
//! * [`rd_client`] drives the bootstrap and registration state machine against an LWM2M server.
//! * [`request_state`] is the callback-based client API an application uses to issue its own
//!   CoAP requests (used internally by the RD client, and available to applications that need
//!   to talk to other CoAP resources).
//!
//! [IETF-RFC7252]: https://tools.ietf.org/html/rfc7252
//! [IETF-RFC7641]: https://tools.ietf.org/html/rfc7641
//! [IETF-RFC7959]: https://tools.ietf.org/html/rfc7959
//!
//! ## Example
//!
//! ```no_run
//! use lwm2m_client_core::prelude::*;
//! use lwm2m_client_core::coap::Engine;
//! use lwm2m_client_core::EngineConfig;
//!
//! # struct MyTransport;
//! # impl Transport for MyTransport {
//! #   fn send(&mut self, _dest: &Endpoint, _bytes: &[u8]) -> Result<(), Error> { Ok(()) }
//! #   fn recv(&mut self, _buf: &mut [u8]) -> Result<Option<(Endpoint, usize)>, Error> { Ok(None) }
//! # }
//! let mut engine = Engine::new(MyTransport, EngineConfig::default());
//!
//! // Drive the engine from your platform's main loop, passing a millisecond clock reading:
//! # let now_ms = 0u64;
//! loop {
//!     engine.poll(now_ms).expect("engine poll failed");
//! #   break;
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

pub mod message;
pub mod option;

mod content_format;
pub use content_format::ContentFormat;

mod block;
pub use block::*;

mod config;
pub use config::EngineConfig;

pub mod consts;
#[doc(hidden)]
pub use consts::*;

mod error;
pub use error::*;

mod util;
use util::*;

pub mod link_format;
#[doc(hidden)]
pub use link_format::*;

pub mod timer;
pub mod transport;
pub mod coap;
pub mod codecs;
pub mod object;
pub mod dispatcher;
pub mod rd_client;
pub mod request_state;

#[doc(hidden)]
pub mod prelude {
    pub use super::ContentFormat;
    pub use super::EngineConfig;

    pub use super::message::MessageRead;
    pub use super::message::MessageWrite;
    pub use super::message::MsgCode;
    pub use super::message::MsgCodeClass;
    pub use super::message::MsgId;
    pub use super::message::MsgToken;
    pub use super::message::MsgType;

    pub use super::option;
    pub use option::OptionInsert;
    pub use option::OptionInsertExt;
    pub use option::OptionIterator;
    pub use option::OptionIteratorExt;
    pub use option::OptionKey;
    pub use option::OptionNumber;

    pub use super::transport::{Endpoint, Transport};

    pub use super::Error;
}
