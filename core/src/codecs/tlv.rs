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

//! OMA-TLV (§4.6): a 1-byte type header (class, id-length, length-length or inline length),
//! an id (1 or 2 bytes), a length (0-3 bytes), and the value.

use super::{LwM2mValue, ResourceValue};
use crate::Error;

/// The four OMA-TLV type classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvClass {
    ObjectInstance = 0,
    ResourceInstance = 1,
    MultiResource = 2,
    Resource = 3,
}

impl TlvClass {
    fn from_bits(bits: u8) -> TlvClass {
        match bits {
            0 => TlvClass::ObjectInstance,
            1 => TlvClass::ResourceInstance,
            2 => TlvClass::MultiResource,
            _ => TlvClass::Resource,
        }
    }
}

/// A single parsed TLV entry: either a leaf carrying raw value bytes, or a container
/// (`ObjectInstance`/`MultiResource`) carrying nested entries.
#[derive(Debug, Clone, PartialEq)]
pub struct TlvEntry {
    pub class: TlvClass,
    pub id: u16,
    pub payload: TlvPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TlvPayload {
    Value(Vec<u8>),
    Children(Vec<TlvEntry>),
}

fn is_container(class: TlvClass) -> bool {
    matches!(class, TlvClass::ObjectInstance | TlvClass::MultiResource)
}

/// Parses a sequence of sibling TLV entries out of `bytes`.
pub struct TlvReader;

impl TlvReader {
    /// Parses `bytes` into a tree of entries, then flattens it into `ResourceValue`s whose
    /// `path` is the sequence of TLV ids from the root to each leaf. Leaves are returned as
    /// [`LwM2mValue::Opaque`]; callers reinterpret the bytes via [`super::read_int`] etc. once
    /// they know the resource's declared type.
    pub fn read(bytes: &[u8]) -> Result<Vec<ResourceValue>, Error> {
        let entries = parse_entries(bytes)?;
        let mut values = Vec::new();
        flatten(&entries, &mut Vec::new(), &mut values);
        Ok(values)
    }

    /// Parses `bytes` into the raw entry tree, for callers that need the class information
    /// (e.g. the dispatcher distinguishing a create-by-write `ObjectInstance` wrapper).
    pub fn read_entries(bytes: &[u8]) -> Result<Vec<TlvEntry>, Error> {
        parse_entries(bytes)
    }
}

fn flatten(entries: &[TlvEntry], prefix: &mut Vec<u16>, out: &mut Vec<ResourceValue>) {
    for entry in entries {
        prefix.push(entry.id);
        match &entry.payload {
            TlvPayload::Value(bytes) => {
                out.push(ResourceValue { path: prefix.clone(), value: LwM2mValue::Opaque(bytes.clone()) });
            }
            TlvPayload::Children(children) => flatten(children, prefix, out),
        }
        prefix.pop();
    }
}

fn parse_entries(mut bytes: &[u8]) -> Result<Vec<TlvEntry>, Error> {
    let mut entries = Vec::new();
    while !bytes.is_empty() {
        let (entry, rest) = parse_one(bytes)?;
        entries.push(entry);
        bytes = rest;
    }
    Ok(entries)
}

fn parse_one(bytes: &[u8]) -> Result<(TlvEntry, &[u8]), Error> {
    let header = *bytes.first().ok_or(Error::ParseFailure)?;
    let class = TlvClass::from_bits((header >> 6) & 0x3);
    let id_is_16bit = header & 0x20 != 0;
    let length_type = (header >> 3) & 0x3;

    let mut cursor = 1usize;

    let id = if id_is_16bit {
        let bytes = bytes.get(cursor..cursor + 2).ok_or(Error::ParseFailure)?;
        cursor += 2;
        u16::from_be_bytes([bytes[0], bytes[1]])
    } else {
        let b = *bytes.get(cursor).ok_or(Error::ParseFailure)?;
        cursor += 1;
        b as u16
    };

    let length = match length_type {
        0 => (header & 0x7) as usize,
        1 => {
            let b = *bytes.get(cursor).ok_or(Error::ParseFailure)?;
            cursor += 1;
            b as usize
        }
        2 => {
            let b = bytes.get(cursor..cursor + 2).ok_or(Error::ParseFailure)?;
            cursor += 2;
            ((b[0] as usize) << 8) | b[1] as usize
        }
        _ => {
            let b = bytes.get(cursor..cursor + 3).ok_or(Error::ParseFailure)?;
            cursor += 3;
            ((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize
        }
    };

    let value = bytes.get(cursor..cursor + length).ok_or(Error::ParseFailure)?;
    let rest = &bytes[cursor + length..];

    let payload = if is_container(class) {
        TlvPayload::Children(parse_entries(value)?)
    } else {
        TlvPayload::Value(value.to_vec())
    };

    Ok((TlvEntry { class, id, payload }, rest))
}

/// Builds a TLV payload out of a flat list of resources (or resource instances) for a single
/// object instance. Use [`TlvWriter::object_instance`] to additionally wrap the result in an
/// `ObjectInstance` container, e.g. for a create-by-write POST to an object URI.
pub struct TlvWriter {
    buf: Vec<u8>,
}

impl TlvWriter {
    pub fn new() -> TlvWriter {
        TlvWriter { buf: Vec::new() }
    }

    /// Appends a plain resource.
    pub fn resource(&mut self, id: u16, value: &[u8]) {
        encode_one(&mut self.buf, TlvClass::Resource, id, value);
    }

    /// Appends a multi-instance resource, wrapping each `(riid, value)` pair as a nested
    /// `ResourceInstance`.
    pub fn multi_resource(&mut self, id: u16, instances: &[(u16, Vec<u8>)]) {
        let mut inner = Vec::new();
        for (riid, value) in instances {
            encode_one(&mut inner, TlvClass::ResourceInstance, *riid, value);
        }
        encode_one(&mut self.buf, TlvClass::MultiResource, id, &inner);
    }

    /// Finishes the payload as a flat sequence of resources (for a single-instance write or
    /// read).
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    /// Wraps everything written so far in an `ObjectInstance` container with the given id, for
    /// an object-level (multi-instance) payload.
    pub fn finish_as_object_instance(self, iid: u16) -> Vec<u8> {
        let mut out = Vec::new();
        encode_one(&mut out, TlvClass::ObjectInstance, iid, &self.buf);
        out
    }
}

impl Default for TlvWriter {
    fn default() -> Self {
        TlvWriter::new()
    }
}

fn encode_one(out: &mut Vec<u8>, class: TlvClass, id: u16, value: &[u8]) {
    let id_is_16bit = id > 0xFF;
    let mut header = (class as u8) << 6;
    if id_is_16bit {
        header |= 0x20;
    }

    let length = value.len();
    if length <= 7 {
        header |= length as u8;
        out.push(header);
    } else if length <= 0xFF {
        header |= 0x08;
        out.push(header);
        out.push(length as u8);
    } else if length <= 0xFFFF {
        header |= 0x10;
        out.push(header);
        out.push((length >> 8) as u8);
        out.push(length as u8);
    } else {
        header |= 0x18;
        out.push(header);
        out.push((length >> 16) as u8);
        out.push((length >> 8) as u8);
        out.push(length as u8);
    }

    if id_is_16bit {
        out.extend_from_slice(&id.to_be_bytes());
    } else {
        out.push(id as u8);
    }

    out.extend_from_slice(value);
}
