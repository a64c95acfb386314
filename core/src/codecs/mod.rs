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

//! LWM2M payload codecs (C6): OMA-TLV, LWM2M-JSON, and plain text.
//!
//! `async-coap` speaks CoAP, not LWM2M payloads, so the wire layouts here are grounded
//! directly on the byte-level description of each format rather than on an existing Rust
//! implementation. The three codecs share the same reader/writer shape so the dispatcher
//! (C8) can pick one at runtime via `Content-Format`.

pub mod json;
pub mod plaintext;
pub mod tlv;

pub use json::{JsonReader, JsonWriter};
pub use plaintext::{PlainTextReader, PlainTextWriter};
pub use tlv::{TlvEntry, TlvReader, TlvWriter};

use crate::Error;
use std::convert::TryFrom;

/// A fixed-point rational: a signed mantissa with an explicit fractional-bit count, used in
/// place of IEEE 754 floats since the target device may have no FPU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Float32Fix {
    /// The value, scaled by `2^frac_bits`.
    pub mantissa: i64,

    /// How many of `mantissa`'s low bits are fractional.
    pub frac_bits: u8,
}

impl Float32Fix {
    /// Constructs a fixed-point value directly from its scaled mantissa.
    pub fn new(mantissa: i64, frac_bits: u8) -> Float32Fix {
        Float32Fix { mantissa, frac_bits }
    }

    /// Converts to a 64-bit float.
    pub fn to_f64(self) -> f64 {
        self.mantissa as f64 / (1i64 << self.frac_bits) as f64
    }

    /// Quantizes `value` to a fixed-point value with `frac_bits` fractional bits.
    pub fn from_f64(value: f64, frac_bits: u8) -> Float32Fix {
        Float32Fix { mantissa: (value * (1i64 << frac_bits) as f64).round() as i64, frac_bits }
    }
}

/// A single typed resource value, independent of the wire format it was read from or will be
/// written to.
#[derive(Debug, Clone, PartialEq)]
pub enum LwM2mValue {
    /// A signed integer resource (LWM2M "Integer").
    Int(i64),

    /// A fixed-point resource (LWM2M "Float").
    Float(Float32Fix),

    /// A boolean resource.
    Boolean(bool),

    /// A UTF-8 string resource.
    String(String),

    /// An opaque byte-string resource.
    Opaque(Vec<u8>),
}

/// One decoded value together with the id path below whatever object or instance the payload
/// was read relative to: `[rid]` for a plain resource, `[rid, riid]` for a resource instance
/// inside a multi-instance resource, or `[iid, rid]` / `[iid, rid, riid]` when the payload
/// spans a whole object (§4.6, "outer OBJECT_INSTANCE TLV descends with its id as iid").
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceValue {
    /// The id path below the payload's base URI.
    pub path: Vec<u16>,

    /// The decoded value. Codecs that cannot infer a type (TLV, plain text) fill this in as
    /// [`LwM2mValue::Opaque`]; the dispatcher reinterprets it via [`read_int`] etc. once it
    /// knows the resource's declared type from the object registry (C7).
    pub value: LwM2mValue,
}

/// Interprets `bytes` as a big-endian, minimally-encoded signed integer (1, 2, 4, or 8 bytes).
pub fn read_int(bytes: &[u8]) -> Result<i64, Error> {
    match bytes.len() {
        1 => Ok(bytes[0] as i8 as i64),
        2 => Ok(i16::from_be_bytes([bytes[0], bytes[1]]) as i64),
        4 => Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64),
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            Ok(i64::from_be_bytes(buf))
        }
        _ => Err(Error::ParseFailure),
    }
}

/// Encodes `value` as the shortest of the four integer widths that can represent it.
pub fn write_int(value: i64) -> Vec<u8> {
    if let Ok(v) = i8::try_from(value) {
        vec![v as u8]
    } else if let Ok(v) = i16::try_from(value) {
        v.to_be_bytes().to_vec()
    } else if let Ok(v) = i32::try_from(value) {
        v.to_be_bytes().to_vec()
    } else {
        value.to_be_bytes().to_vec()
    }
}

/// Interprets `bytes` as a single boolean byte (`0` or `1`).
pub fn read_boolean(bytes: &[u8]) -> Result<bool, Error> {
    match bytes {
        [0] => Ok(false),
        [1] => Ok(true),
        _ => Err(Error::ParseFailure),
    }
}

/// Encodes a boolean as a single byte.
pub fn write_boolean(value: bool) -> Vec<u8> {
    vec![value as u8]
}

/// Interprets `bytes` as a fixed-point value: one leading byte giving the fractional-bit
/// count, followed by a minimally-encoded signed-integer mantissa.
pub fn read_float32fix(bytes: &[u8]) -> Result<Float32Fix, Error> {
    let (frac_bits, mantissa_bytes) = bytes.split_first().ok_or(Error::ParseFailure)?;
    let mantissa = read_int(mantissa_bytes)?;
    Ok(Float32Fix::new(mantissa, *frac_bits))
}

/// Encodes a fixed-point value as its frac-bits byte followed by the mantissa.
pub fn write_float32fix(value: Float32Fix) -> Vec<u8> {
    let mut out = vec![value.frac_bits];
    out.extend(write_int(value.mantissa));
    out
}

/// Interprets `bytes` as a UTF-8 string resource.
pub fn read_string(bytes: &[u8]) -> Result<&str, Error> {
    std::str::from_utf8(bytes).map_err(|_| Error::ParseFailure)
}
