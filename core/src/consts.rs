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

//! Module defining various CoAP- and LWM2M-related constants.

/// The standard default IP port number used for CoAP-over-UDP.
pub const DEFAULT_PORT_COAP_UDP: u16 = 5683;

/// The standard default IP port number used for CoAP-over-DTLS.
pub const DEFAULT_PORT_COAP_DTLS: u16 = 5684;

/// The standard URI scheme for vanilla CoAP-over-UDP on IP networks.
pub const URI_SCHEME_COAP: &str = "coap";

/// The standard URI scheme for CoAP-over-DTLS on IP networks.
pub const URI_SCHEME_COAPS: &str = "coaps";

/// Non-standard URI scheme for a [loopback interface](https://en.wikipedia.org/wiki/Loopback),
/// used by the in-memory transport in tests.
pub const URI_SCHEME_LOOPBACK: &str = "loop";

/// A fake hostname representing the "all CoAP devices" multicast address, or
/// the equivalent for a given network layer.
///
/// The trailing "dot" ensures it can never be interpreted as a partial domain name.
pub const ALL_COAP_DEVICES_HOSTNAME: &str = "all-coap-devices.";

/// Value for `OptionNumber::OBSERVE` when registering an observer.
///
/// Defined by [IETF-RFC7641](https://tools.ietf.org/html/rfc7641).
pub const OBSERVE_REGISTER: u32 = 0;

/// Value for `OptionNumber::OBSERVE` when deregistering an observer.
///
/// Defined by [IETF-RFC7641](https://tools.ietf.org/html/rfc7641).
pub const OBSERVE_DEREGISTER: u32 = 1;

/// Modulus applied to the Observe option sequence counter (2^24), per RFC 7641 §4.4.
pub const OBSERVE_SEQUENCE_MODULUS: u32 = 1 << 24;

/// LWM2M Security object id.
pub const LWM2M_OBJECT_SECURITY: u16 = 0;

/// LWM2M Server object id.
pub const LWM2M_OBJECT_SERVER: u16 = 1;

/// LWM2M Access Control object id.
pub const LWM2M_OBJECT_ACCESS_CONTROL: u16 = 2;

/// LWM2M Device object id.
pub const LWM2M_OBJECT_DEVICE: u16 = 3;

/// LWM2M Firmware object id.
pub const LWM2M_OBJECT_FIRMWARE: u16 = 5;

/// First object id reserved for IPSO smart objects (e.g. 3303 = temperature).
pub const LWM2M_OBJECT_IPSO_START: u16 = 3200;

/// Sentinel instance id denoting a generic/template object-registry entry,
/// used only at the wire and URI-parsing boundary; the registry itself represents
/// templates with a distinct enum variant rather than this value. See
/// [`crate::object::Instance`].
pub const LWM2M_INSTANCE_TEMPLATE: u16 = 0xFFFF;

/// Maximum number of attempts the callback client API will make to fetch successive
/// Block2 fragments of a single response before giving up (C10).
pub const MAX_BLOCK_FETCH_ATTEMPTS: u8 = 4;

/// Idle timeout, in milliseconds, after which an abandoned multi-resource read lock
/// is forcibly released (§4.8).
pub const MULTI_READ_LOCK_IDLE_TIMEOUT_MS: u64 = 1_000;

/// Interval, in milliseconds, at which the RD client state machine re-evaluates itself.
pub const RD_CLIENT_TICK_INTERVAL_MS: u64 = 500;

/// Backoff, in milliseconds, applied by the RD client while waiting for network access.
pub const RD_CLIENT_NETWORK_WAIT_MS: u64 = 10_000;

/// Default registration lifetime, in seconds, sent as `lt=` on registration and Update
/// requests when the application hasn't configured one explicitly (one day; the OMA LWM2M
/// default and the value used in the registration walkthrough, §4.9).
pub const DEFAULT_REGISTRATION_LIFETIME_S: u32 = 86_400;
