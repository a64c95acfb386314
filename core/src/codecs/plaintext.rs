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

//! Plain text (§4.6): a single value as ASCII, used when a request addresses exactly one
//! resource. Unlike TLV and JSON there is no id framing — the caller already knows which
//! resource the bytes belong to from the request URI.

use super::Float32Fix;
use crate::Error;

/// The number of decimal digits to render for a `frac_bits`-wide fixed-point value: enough to
/// round-trip without runaway expansion (`frac_bits * log10(2)`, rounded up, capped at 6).
fn decimal_digits_for(frac_bits: u8) -> usize {
    ((frac_bits as f64 * std::f64::consts::LOG10_2).ceil() as usize).min(6)
}

/// Parses a single plain-text value.
pub struct PlainTextReader;

impl PlainTextReader {
    pub fn read_int(bytes: &[u8]) -> Result<i64, Error> {
        std::str::from_utf8(bytes)
            .map_err(|_| Error::ParseFailure)?
            .trim()
            .parse()
            .map_err(|_| Error::ParseFailure)
    }

    pub fn read_float32fix(bytes: &[u8], frac_bits: u8) -> Result<Float32Fix, Error> {
        let text = std::str::from_utf8(bytes).map_err(|_| Error::ParseFailure)?.trim();
        let value: f64 = text.parse().map_err(|_| Error::ParseFailure)?;
        Ok(Float32Fix::from_f64(value, frac_bits))
    }

    pub fn read_boolean(bytes: &[u8]) -> Result<bool, Error> {
        match bytes {
            b"0" => Ok(false),
            b"1" => Ok(true),
            _ => Err(Error::ParseFailure),
        }
    }

    pub fn read_string(bytes: &[u8]) -> Result<&str, Error> {
        std::str::from_utf8(bytes).map_err(|_| Error::ParseFailure)
    }
}

/// Writes a single plain-text value.
pub struct PlainTextWriter;

impl PlainTextWriter {
    pub fn write_int(value: i64) -> Vec<u8> {
        value.to_string().into_bytes()
    }

    pub fn write_float32fix(value: Float32Fix) -> Vec<u8> {
        let digits = decimal_digits_for(value.frac_bits);
        format!("{:.*}", digits, value.to_f64()).into_bytes()
    }

    pub fn write_boolean(value: bool) -> Vec<u8> {
        if value { b"1".to_vec() } else { b"0".to_vec() }
    }

    pub fn write_string(value: &str) -> Vec<u8> {
        value.as_bytes().to_vec()
    }
}
