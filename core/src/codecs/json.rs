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

//! LWM2M-JSON (§4.6): `{"bn":"<base>","e":[{"n":"<path>","v":<value>},...]}`.
//!
//! The reader is a small hand-rolled token scanner rather than a general JSON parser, since the
//! only shape ever produced by an LWM2M peer is this flat `e` array of `n`/`v`/`sv`/`bv`/`ov`
//! pairs (§4.6, "token iterator for reader is state-machine-driven, tolerates whitespace").

use super::{LwM2mValue, ResourceValue};
use crate::Error;

/// Parses an LWM2M-JSON payload.
pub struct JsonReader;

impl JsonReader {
    /// Extracts every `{"n": ..., "v"|"sv"|"bv"|"ov": ...}` entry from the `"e"` array.
    ///
    /// Each entry's `"n"` is resolved relative to the payload's `"bn"` base name (if present)
    /// and split on `/` into a numeric id path; the value is returned untyped
    /// ([`LwM2mValue::Opaque`] for numbers parsed just far enough to round-trip, or
    /// directly-typed for strings/booleans, which JSON self-describes unlike TLV).
    pub fn read(text: &str) -> Result<Vec<ResourceValue>, Error> {
        let mut scanner = Scanner::new(text);
        let base = scanner.find_string_field("bn").unwrap_or_default();
        let entries_start = scanner.find_array_start("e").ok_or(Error::ParseFailure)?;
        scanner.pos = entries_start;

        let mut values = Vec::new();
        while let Some(object) = scanner.next_object() {
            let mut object_scanner = Scanner::new(object);
            let name = object_scanner.find_string_field("n").unwrap_or_default();
            let full_path = format!("{}{}", base, name);
            let path = parse_id_path(&full_path)?;

            let value = if let Some(s) = object_scanner.find_string_field("sv") {
                LwM2mValue::String(s)
            } else if let Some(b) = object_scanner.find_bool_field("bv") {
                LwM2mValue::Boolean(b)
            } else if let Some(raw) = object_scanner.find_raw_number_field("v") {
                LwM2mValue::Opaque(raw.into_bytes())
            } else if let Some(raw) = object_scanner.find_raw_number_field("ov") {
                LwM2mValue::Opaque(raw.into_bytes())
            } else {
                return Err(Error::ParseFailure);
            };

            values.push(ResourceValue { path, value });
        }
        Ok(values)
    }
}

fn parse_id_path(path: &str) -> Result<Vec<u16>, Error> {
    path.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u16>().map_err(|_| Error::ParseFailure))
        .collect()
}

/// A forgiving scanner over a JSON-ish object: finds `"key": value` pairs by substring search
/// rather than building a full parse tree, tolerating arbitrary whitespace around `:` and `,`.
struct Scanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Scanner<'a> {
        Scanner { text, pos: 0 }
    }

    fn find_string_field(&self, key: &str) -> Option<String> {
        let needle = format!("\"{}\"", key);
        let key_pos = self.text.find(&needle)?;
        let after_key = &self.text[key_pos + needle.len()..];
        let colon = after_key.find(':')?;
        let rest = after_key[colon + 1..].trim_start();
        let rest = rest.strip_prefix('"')?;
        let end = rest.find('"')?;
        Some(rest[..end].to_owned())
    }

    fn find_bool_field(&self, key: &str) -> Option<bool> {
        let needle = format!("\"{}\"", key);
        let key_pos = self.text.find(&needle)?;
        let after_key = &self.text[key_pos + needle.len()..];
        let colon = after_key.find(':')?;
        let rest = after_key[colon + 1..].trim_start();
        if rest.starts_with("true") {
            Some(true)
        } else if rest.starts_with("false") {
            Some(false)
        } else {
            None
        }
    }

    fn find_raw_number_field(&self, key: &str) -> Option<String> {
        let needle = format!("\"{}\"", key);
        let key_pos = self.text.find(&needle)?;
        let after_key = &self.text[key_pos + needle.len()..];
        let colon = after_key.find(':')?;
        let rest = after_key[colon + 1..].trim_start();
        let end = rest.find(|c: char| c == ',' || c == '}').unwrap_or(rest.len());
        Some(rest[..end].trim().to_owned())
    }

    fn find_array_start(&self, key: &str) -> Option<usize> {
        let needle = format!("\"{}\"", key);
        let key_pos = self.text.find(&needle)?;
        let after_key = &self.text[key_pos + needle.len()..];
        let colon = after_key.find(':')?;
        let bracket_rel = after_key[colon + 1..].find('[')?;
        Some(key_pos + needle.len() + colon + 1 + bracket_rel + 1)
    }

    /// Returns the next top-level `{...}` object in the array starting at `self.pos`,
    /// advancing past it. Returns `None` once the closing `]` is reached.
    fn next_object(&mut self) -> Option<&'a str> {
        let rest = &self.text[self.pos..];
        let start_rel = rest.find(|c: char| !c.is_whitespace() && c != ',')?;
        if rest.as_bytes()[start_rel] != b'{' {
            return None;
        }

        let mut depth = 0i32;
        for (i, c) in rest[start_rel..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let end = start_rel + i + 1;
                        self.pos += end;
                        return Some(&rest[start_rel..end]);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Builds an LWM2M-JSON payload.
pub struct JsonWriter {
    base: String,
    entries: Vec<String>,
}

impl JsonWriter {
    /// Creates a writer whose entry names are relative to `base` (e.g. `/3/0`).
    pub fn new(base: impl Into<String>) -> JsonWriter {
        JsonWriter { base: base.into(), entries: Vec::new() }
    }

    pub fn write_int(&mut self, rid: u16, value: i64) {
        self.entries.push(format!("{{\"n\":\"/{}\",\"v\":{}}}", rid, value));
    }

    pub fn write_float32fix(&mut self, rid: u16, value: super::Float32Fix) {
        self.entries.push(format!("{{\"n\":\"/{}\",\"v\":{}}}", rid, value.to_f64()));
    }

    pub fn write_boolean(&mut self, rid: u16, value: bool) {
        self.entries.push(format!("{{\"n\":\"/{}\",\"bv\":{}}}", rid, value));
    }

    pub fn write_string(&mut self, rid: u16, value: &str) {
        self.entries.push(format!("{{\"n\":\"/{}\",\"sv\":{}}}", rid, quote(value)));
    }

    /// Finishes the payload, framing the entries in `{"bn":"...","e":[...]}`.
    pub fn finish(self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str("{\"bn\":");
        out.push_str(&quote(&self.base));
        out.push_str(",\"e\":[");
        out.push_str(&self.entries.join(","));
        out.push_str("]}");
        out.into_bytes()
    }
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_int_and_string_entries() {
        let mut writer = JsonWriter::new("/3/0");
        writer.write_int(1, 42);
        writer.write_string(16, "U");
        let bytes = writer.finish();
        let text = std::str::from_utf8(&bytes).unwrap();

        let values = JsonReader::read(text).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].path, vec![3, 0, 1]);
        match &values[1].value {
            LwM2mValue::String(s) => assert_eq!(s, "U"),
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn tolerates_whitespace_between_entries() {
        let text = "{ \"bn\" : \"/3/0\" , \"e\" : [ { \"n\" : \"9\" , \"v\" : 80 } ] }";
        let values = JsonReader::read(text).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].path, vec![3, 0, 9]);
    }

    #[test]
    fn missing_entries_array_is_a_parse_failure() {
        assert!(matches!(JsonReader::read("{\"bn\":\"/3/0\"}"), Err(Error::ParseFailure)));
    }
}
