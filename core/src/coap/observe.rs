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

//! Per-`(endpoint, token)` Observe ([IETF-RFC7641]) subscriptions.
//!
//! `async-coap`'s observe support was only ever sketched as future work in its module docs,
//! so this is grounded directly on RFC 7641's subscription and sequence-counter semantics.
//!
//! [IETF-RFC7641]: https://tools.ietf.org/html/rfc7641

use crate::consts::OBSERVE_SEQUENCE_MODULUS;
use crate::message::MsgToken;
use crate::transport::Endpoint;
use std::collections::HashMap;

struct Subscription {
    path: String,
    seq: u32,
}

/// The observe registry (C4).
#[derive(Default)]
pub struct ObserveRegistry {
    subscriptions: HashMap<(Endpoint, MsgToken), Subscription>,
}

impl ObserveRegistry {
    /// Creates an empty registry.
    pub fn new() -> ObserveRegistry {
        ObserveRegistry::default()
    }

    /// Registers a new subscription from a GET request carrying `Observe: 0`.
    pub fn subscribe(&mut self, endpoint: Endpoint, token: MsgToken, path: String) {
        self.subscriptions.insert((endpoint, token), Subscription { path, seq: 0 });
    }

    /// Removes a subscription, e.g. on an explicit `Observe: 1` deregister request or when the
    /// client resets a notification.
    pub fn unsubscribe(&mut self, endpoint: Endpoint, token: MsgToken) -> bool {
        self.subscriptions.remove(&(endpoint, token)).is_some()
    }

    /// Removes every subscription held by `endpoint`, e.g. when the endpoint itself is torn
    /// down or deregisters from the LWM2M server.
    pub fn unsubscribe_all(&mut self, endpoint: Endpoint) {
        self.subscriptions.retain(|(ep, _), _| *ep != endpoint);
    }

    /// True if `endpoint` holds at least one subscription.
    pub fn has_subscriptions(&self, endpoint: Endpoint) -> bool {
        self.subscriptions.keys().any(|(ep, _)| *ep == endpoint)
    }

    /// Finds every subscription whose path is a prefix of (or equal to) `path`, bumping each
    /// one's sequence counter (mod 2^24) and returning the `(endpoint, token, seq)` triples the
    /// caller should build and enqueue a notification for.
    pub fn notify(&mut self, path: &str) -> Vec<(Endpoint, MsgToken, u32)> {
        let mut fired = Vec::new();
        for (&(endpoint, token), sub) in self.subscriptions.iter_mut() {
            if is_path_prefix(&sub.path, path) {
                sub.seq = (sub.seq + 1) % OBSERVE_SEQUENCE_MODULUS;
                fired.push((endpoint, token, sub.seq));
            }
        }
        fired
    }
}

/// True if every segment of `prefix` matches the corresponding segment of `path`, e.g.
/// `/3/0` is a prefix of `/3/0/13` but not of `/3/05`.
fn is_path_prefix(prefix: &str, path: &str) -> bool {
    let prefix_segments = path_segments(prefix);
    let path_segments = path_segments(path);
    prefix_segments.len() <= path_segments.len()
        && prefix_segments.iter().zip(path_segments.iter()).all(|(a, b)| a == b)
}

fn path_segments(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}
