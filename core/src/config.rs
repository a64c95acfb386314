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

//! Tunable parameters for the transaction table, block-wise transfer and RD client.
//!
//! The upstream `lwm2m-contiki` sources spread these across a dozen `#define`s
//! (`COAP_MAX_RETRANSMIT`, `REST_MAX_CHUNK_SIZE`, `COAP_OBSERVE_REFRESH_INTERVAL`, ...).
//! Here they live as fields of one [`EngineConfig`] passed at construction time, in the
//! same spirit as `TransParams` from the upstream `async-coap` codebase, which exposed the
//! RFC 7252 §4.8 transmission parameters as overridable trait constants.

use std::time::Duration;

/// Runtime configuration for an [`crate::coap::Engine`] and the LWM2M layer built on top of it.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EngineConfig {
    /// Maximum number of retransmissions of a confirmable message before giving up.
    /// RFC 7252 §4.8 default: 4.
    pub max_retransmit: u32,

    /// Initial timeout before the first retransmission. RFC 7252 §4.8 default: 2s.
    pub ack_timeout: Duration,

    /// Randomization factor applied to `ack_timeout`. RFC 7252 §4.8 default: 1.5.
    pub ack_random_factor: f32,

    /// Maximum number of outstanding transactions tracked at once.
    pub max_transactions: usize,

    /// Block size (in bytes) offered when none is negotiated by the peer; also the cap that
    /// block-wise negotiation is never allowed to exceed (§6: "negotiates down but never up").
    pub max_block_size: usize,

    /// Size, in bytes, of the multi-resource read double buffer. §4.8 requires this to be
    /// `2 * max_block_size`.
    pub double_buffer_size: usize,

    /// Maximum number of reassembled Block1 chunks accepted for one incoming request body.
    pub max_chunks: usize,

    /// Idle timeout before an abandoned multi-resource read lock is force-released.
    pub multi_read_lock_idle_timeout: Duration,
}

impl EngineConfig {
    /// Calculates the delay before the `attempt`'th retransmission (1-based: `attempt == 1`
    /// is the wait between the first and second transmissions). `attempt == 0` returns zero.
    ///
    /// Applies the exponential backoff with jitter described in RFC 7252 §4.8.
    pub fn calc_retransmit_duration(&self, mut attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_secs(0);
        }

        if attempt > self.max_retransmit {
            attempt = self.max_retransmit;
        }

        attempt -= 1;

        let base = (self.ack_timeout.as_millis() as u64) << attempt;

        const JDIV: u64 = 512u64;
        let rmod: u64 = (JDIV as f32 * (self.ack_random_factor - 1.0)) as u64;
        let jmul = JDIV + rand::random::<u64>() % rmod.max(1);

        Duration::from_millis(base * jmul / JDIV)
    }
}

impl Default for EngineConfig {
    /// Standard transmission parameters recommended by [RFC 7252 §4.8].
    ///
    /// [RFC 7252 §4.8]: https://tools.ietf.org/html/rfc7252#section-4.8
    fn default() -> Self {
        let max_block_size = 1024;
        EngineConfig {
            max_retransmit: 4,
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
            max_transactions: 4,
            max_block_size,
            double_buffer_size: max_block_size * 2,
            max_chunks: 16,
            multi_read_lock_idle_timeout: Duration::from_millis(
                crate::consts::MULTI_READ_LOCK_IDLE_TIMEOUT_MS,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retransmit_backoff_grows_and_caps() {
        let config = EngineConfig::default();
        assert_eq!(config.calc_retransmit_duration(0), Duration::from_secs(0));

        let first = config.calc_retransmit_duration(1);
        let fifth = config.calc_retransmit_duration(5);
        let sixth = config.calc_retransmit_duration(6);

        assert!(first.as_millis() >= 2000 && first.as_millis() < 3000);
        // attempt beyond max_retransmit clamps to the same backoff exponent.
        assert_eq!(fifth.as_millis() / 1000, sixth.as_millis() / 1000);
    }
}
