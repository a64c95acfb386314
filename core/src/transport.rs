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

//! The seam between this crate and a platform's datagram transport.
//!
//! The engine never touches a socket directly: it is handed an implementation of
//! [`Transport`] at construction time. A production embedding supplies a UDP (or
//! DTLS-over-UDP) adapter; tests use [`LoopbackTransport`].

use crate::consts::{DEFAULT_PORT_COAP_DTLS, DEFAULT_PORT_COAP_UDP, URI_SCHEME_COAPS};
use crate::Error;
use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::net::{IpAddr, SocketAddr};

/// A transport-opaque destination: an address, a port, and whether the channel is secured.
///
/// Equality and hashing only consider address and port, matching the wire identity of a CoAP
/// endpoint; `secure` is descriptive only (§3, "`secure` is descriptive, not part of identity").
#[derive(Debug, Copy, Clone)]
pub struct Endpoint {
    addr: SocketAddr,
    secure: bool,
}

impl Endpoint {
    /// Creates a new endpoint from a socket address.
    pub fn new(addr: SocketAddr, secure: bool) -> Endpoint {
        Endpoint { addr, secure }
    }

    /// The underlying network address.
    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    /// True if this endpoint should be reached via a secured (DTLS) transport.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Parses an endpoint from its textual form: `coap://host:port`, `coaps://host:port`,
    /// `coap://[ipv6]:port`, or a bare address (defaulting to the non-secure CoAP port).
    ///
    /// Per Open Question 1 in the design notes, `coaps` strictly maps to port 5684 rather
    /// than reusing the non-secure default.
    pub fn parse(text: &str) -> Result<Endpoint, Error> {
        let with_scheme = if text.contains("://") {
            text.to_owned()
        } else {
            format!("coap://{}", text)
        };

        let url = url::Url::parse(&with_scheme).map_err(|_| Error::InvalidArgument)?;
        let secure = url.scheme() == URI_SCHEME_COAPS;
        let default_port = if secure { DEFAULT_PORT_COAP_DTLS } else { DEFAULT_PORT_COAP_UDP };
        let port = url.port().unwrap_or(default_port);

        let host = url.host_str().ok_or(Error::InvalidArgument)?;
        let ip: IpAddr = host.parse().map_err(|_| Error::HostLookupFailure)?;

        Ok(Endpoint { addr: SocketAddr::new(ip, port), secure })
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Endpoint {}

impl std::hash::Hash for Endpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.secure {
            write!(f, "coaps://{}", self.addr)
        } else {
            write!(f, "coap://{}", self.addr)
        }
    }
}

/// Platform hook for sending and receiving CoAP datagrams.
///
/// Implementations are expected to be non-blocking: [`Transport::recv`] returns `Ok(None)`
/// rather than blocking when no datagram is available, so the embedding event loop can poll
/// it alongside the timer wheel (§5, "exactly three suspension points").
pub trait Transport {
    /// Sends `bytes` to `dest`.
    fn send(&mut self, dest: &Endpoint, bytes: &[u8]) -> Result<(), Error>;

    /// Polls for an inbound datagram, copying it into `buf`.
    ///
    /// Returns `Ok(Some((source, len)))` on success, `Ok(None)` if nothing is pending, and
    /// `Err` on a transport-level failure (which the engine logs and otherwise ignores, per
    /// §7's "transport errors... are logged and dropped").
    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(Endpoint, usize)>, Error>;
}

/// An in-memory, paired-queue [`Transport`] used by tests in place of a real socket.
///
/// Two `LoopbackTransport`s created with [`LoopbackTransport::pair`] feed each other's
/// `recv`; anything sent on one shows up on the other's next `recv` call.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    local: Endpoint,
    inbox: std::rc::Rc<std::cell::RefCell<VecDeque<(Endpoint, Vec<u8>)>>>,
    peer_inbox: Option<std::rc::Rc<std::cell::RefCell<VecDeque<(Endpoint, Vec<u8>)>>>>,
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint {
            addr: SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 0),
            secure: false,
        }
    }
}

impl LoopbackTransport {
    /// Creates two transports wired to each other's `recv` queue.
    ///
    /// `local`/`remote` are the addresses each side reports as its peer's [`Endpoint`] when
    /// a datagram is received.
    pub fn pair(local: Endpoint, remote: Endpoint) -> (LoopbackTransport, LoopbackTransport) {
        let a_inbox = std::rc::Rc::new(std::cell::RefCell::new(VecDeque::new()));
        let b_inbox = std::rc::Rc::new(std::cell::RefCell::new(VecDeque::new()));

        let a = LoopbackTransport { local, inbox: a_inbox.clone(), peer_inbox: Some(b_inbox.clone()) };
        let b = LoopbackTransport { local: remote, inbox: b_inbox, peer_inbox: Some(a_inbox) };
        (a, b)
    }

    /// Number of datagrams currently queued for this transport's next `recv`.
    pub fn pending_len(&self) -> usize {
        self.inbox.borrow().len()
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, _dest: &Endpoint, bytes: &[u8]) -> Result<(), Error> {
        let peer = self.peer_inbox.as_ref().ok_or(Error::IOError)?;
        peer.borrow_mut().push_back((self.local, bytes.to_vec()));
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(Endpoint, usize)>, Error> {
        let mut inbox = self.inbox.borrow_mut();
        match inbox.pop_front() {
            Some((from, bytes)) => {
                if bytes.len() > buf.len() {
                    return Err(Error::OutOfSpace);
                }
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(Some((from, bytes.len())))
            }
            None => Ok(None),
        }
    }
}
