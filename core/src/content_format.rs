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

use std::borrow::Cow;

/// A type for representing a CoAP Content-Format / Accept value.
///
/// Besides the handful of IANA-registered CoAP media types, this also carries the
/// LWM2M-specific media types used to select a [`crate::codecs`] reader/writer (§4.8).
#[derive(Debug, Copy, Eq, PartialEq, Hash, Clone, Ord, PartialOrd)]
pub struct ContentFormat(pub u16);

impl ContentFormat {
    /// From IETF-RFC7252. Alias: [`ContentFormat::TEXT_PLAIN`].
    pub const TEXT_PLAIN_UTF8: ContentFormat = ContentFormat(0);

    /// Alias for [`ContentFormat::TEXT_PLAIN_UTF8`], named per the LWM2M numeric media-type list.
    pub const TEXT_PLAIN: ContentFormat = ContentFormat(0);

    /// From IETF-RFC7252.
    pub const APPLICATION_LINK_FORMAT: ContentFormat = ContentFormat(40);

    /// Alias for [`ContentFormat::APPLICATION_LINK_FORMAT`], used for LWM2M Discover (§4.8).
    pub const LINK_FORMAT: ContentFormat = ContentFormat(40);

    /// From IETF-RFC7252.
    pub const APPLICATION_OCTET_STREAM: ContentFormat = ContentFormat(42);

    /// From IETF-RFC7252.
    pub const APPLICATION_JSON: ContentFormat = ContentFormat(50);

    /// LWM2M plain-text resource encoding, legacy numeric media type.
    pub const LWM2M_TEXT_PLAIN: ContentFormat = ContentFormat(1541);

    /// Legacy OMA LWM2M TLV media type, superseded by [`ContentFormat::LWM2M_TLV`] but still
    /// accepted for content negotiation.
    pub const LWM2M_TLV_LEGACY: ContentFormat = ContentFormat(11540);

    /// Legacy OMA LWM2M JSON media type, superseded by [`ContentFormat::LWM2M_JSON`] but still
    /// accepted for content negotiation.
    pub const LWM2M_JSON_LEGACY: ContentFormat = ContentFormat(11541);

    /// OMA LWM2M TLV media type (§4.8, §4.6).
    pub const LWM2M_TLV: ContentFormat = ContentFormat(11542);

    /// OMA LWM2M JSON media type (§4.8, §4.6).
    pub const LWM2M_JSON: ContentFormat = ContentFormat(11543);

    /// Returns the MIME name of this content format as a `&'static str`, if possible.
    pub fn static_name(self) -> Option<&'static str> {
        Some(match self {
            Self::TEXT_PLAIN_UTF8 => "text/plain;charset=utf-8",
            Self::APPLICATION_LINK_FORMAT => "application/link-format",
            Self::APPLICATION_OCTET_STREAM => "application/octet-stream",
            Self::APPLICATION_JSON => "application/json",
            Self::LWM2M_TLV => "application/vnd.oma.lwm2m+tlv",
            Self::LWM2M_JSON => "application/vnd.oma.lwm2m+json",
            Self::LWM2M_TLV_LEGACY => "application/vnd.oma.lwm2m+tlv",
            Self::LWM2M_JSON_LEGACY => "application/vnd.oma.lwm2m+json",
            _ => return None,
        })
    }

    /// Returns a MIME name for this content format.
    pub fn name(&self) -> Cow<'static, str> {
        if let Some(name) = self.static_name() {
            Cow::from(name)
        } else {
            Cow::from(self.to_string())
        }
    }

    /// Returns true if this content format is known to contain UTF8 text.
    pub fn is_utf8(self) -> bool {
        match self {
            Self::TEXT_PLAIN_UTF8 => true,
            Self::APPLICATION_LINK_FORMAT => true,
            Self::LWM2M_TEXT_PLAIN => true,
            _ => self.is_json(),
        }
    }

    /// Returns true if this content format is known to contain JSON.
    pub fn is_json(self) -> bool {
        matches!(self, Self::APPLICATION_JSON | Self::LWM2M_JSON | Self::LWM2M_JSON_LEGACY)
    }

    /// Returns true if this content format is one of the OMA-TLV variants.
    pub fn is_tlv(self) -> bool {
        matches!(self, Self::LWM2M_TLV | Self::LWM2M_TLV_LEGACY)
    }
}

impl core::fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(n) = self.static_name() {
            f.write_str(n)
        } else {
            write!(f, "application/x-coap-{}", self.0)
        }
    }
}
