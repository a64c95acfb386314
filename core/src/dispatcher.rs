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

//! The LWM2M request dispatcher (C8): routes a parsed CoAP request at `/{oid}/{iid}/{rid}`
//! to the object registry (C7), handling content negotiation, create-by-write, multi-resource
//! read/write and Discover.
//!
//! Grounded on `examples/original_source/apps/oma-lwm2m/lwm2m-engine.c`'s
//! `lwm2m_handler_callback`, `perform_multi_resource_read_op`, `perform_multi_resource_write_op`
//! and `create_instance`. The original streams a multi-resource read through a fixed
//! `2 * COAP_MAX_BLOCK_SIZE` double buffer one object-instance-callback-invocation at a time,
//! because its resource values only exist as C callback invocations, never materialized.
//! Here resource values already live in [`crate::object::ObjectRegistry`] as plain data, so a
//! multi-resource read instead serializes the whole answer once into a [`MultiReadLock`] and
//! slices it per Block2 request; the lock still enforces the original's single-reader-at-a-time
//! rule and 1 s idle timeout (§4.8, §5). The reverse direction — a write/create/execute body
//! too large for one datagram — is reassembled the same way the original collects `block1`
//! chunks into a bounded buffer before running the handler: [`Block1Reassembly`] accumulates
//! up to `max_chunks * max_block_size` bytes keyed by sender and path, acking each interior
//! chunk with `2.31 Continue` and only dispatching once the final block arrives.
//!
//! [`Engine::add_handler`][crate::coap::Engine::add_handler] takes exclusive ownership of its
//! handler, but [`crate::rd_client::RdClient`] also needs access to the same registry to build
//! a registration payload. Wrap the dispatcher in `Rc<RefCell<Dispatcher>>` (the blanket
//! [`CoapHandler`] impl on `Rc<RefCell<H>>` covers this) to give both the engine and the RD
//! client a handle to it.

use crate::block::BlockInfo;
use crate::codecs::json::{JsonReader, JsonWriter};
use crate::codecs::plaintext::{PlainTextReader, PlainTextWriter};
use crate::codecs::tlv::{TlvClass, TlvEntry, TlvPayload, TlvReader, TlvWriter};
use crate::codecs::{self, LwM2mValue};
use crate::coap::{CoapHandler, HandlerResult};
use crate::link_format::{LinkFormatWrite, LINK_ATTR_DIMENSION};
use crate::message::{MessageRead, MessageWrite, MsgCode, VecMessageEncoder};
use crate::object::{Instance, ObjectRegistry, ResourceAccess};
use crate::option::{self, OptionInsertExt, OptionIteratorExt};
use crate::transport::Endpoint;
use crate::{ContentFormat, EngineConfig, Error};
use std::fmt::Write as _;

/// Outcome of dispatching one LWM2M operation, mapped to a CoAP response code per §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LwM2mStatus {
    Created,
    Deleted,
    Changed,
    Content,
    BadRequest,
    NotFound,
    OperationNotAllowed,
    UnsupportedContentFormat,
    ServiceUnavailable,
    Error,
}

impl From<LwM2mStatus> for MsgCode {
    fn from(status: LwM2mStatus) -> MsgCode {
        match status {
            LwM2mStatus::Created => MsgCode::SuccessCreated,
            LwM2mStatus::Deleted => MsgCode::SuccessDeleted,
            LwM2mStatus::Changed => MsgCode::SuccessChanged,
            LwM2mStatus::Content => MsgCode::SuccessContent,
            LwM2mStatus::BadRequest => MsgCode::ClientErrorBadRequest,
            LwM2mStatus::NotFound => MsgCode::ClientErrorNotFound,
            LwM2mStatus::OperationNotAllowed => MsgCode::ClientErrorMethodNotAllowed,
            LwM2mStatus::UnsupportedContentFormat => MsgCode::ClientErrorUnsupportedMediaType,
            LwM2mStatus::ServiceUnavailable => MsgCode::ServerErrorServiceUnavailable,
            LwM2mStatus::Error => MsgCode::ServerErrorInternalServerError,
        }
    }
}

impl From<Error> for LwM2mStatus {
    fn from(_: Error) -> LwM2mStatus {
        LwM2mStatus::BadRequest
    }
}

/// A parsed `/{oid}[/{iid}[/{rid}]]` request path (§4.8).
#[derive(Debug, Clone, Copy)]
struct Path {
    oid: u16,
    iid: Option<u16>,
    rid: Option<u16>,
}

impl Path {
    fn level(&self) -> u8 {
        if self.rid.is_some() {
            3
        } else if self.iid.is_some() {
            2
        } else {
            1
        }
    }
}

/// Parses a `/`-joined decimal path into object/instance/resource ids, matching `parse_path`'s
/// "consume digits, expect a separating slash" state machine.
fn parse_path(path: &str) -> Option<Path> {
    let mut parts = path.split('/');
    let oid: u16 = parts.next()?.parse().ok()?;
    let iid = match parts.next() {
        Some(s) => Some(s.parse::<u16>().ok()?),
        None => None,
    };
    let rid = match (iid, parts.next()) {
        (Some(_), Some(s)) => Some(s.parse::<u16>().ok()?),
        (Some(_), None) => None,
        (None, Some(_)) => return None,
        (None, None) => None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(Path { oid, iid, rid })
}

/// Holds the serialized result of one multi-resource read (or Discover) across a sequence of
/// Block2-fetched requests, released after a single idle timeout (§4.8, §5).
struct MultiReadLock {
    key: (u16, Option<u16>, Option<u16>),
    holder: Endpoint,
    payload: Vec<u8>,
    content_format: ContentFormat,
    expires_at_ms: u64,
}

/// Collects a Block1-fragmented write/create/execute body into one contiguous payload, keyed by
/// the sender and the path it is writing to so an unrelated peer can't interleave into the same
/// reassembly (§4.8: "block1 collects incoming payload into a reassembly buffer").
struct Block1Reassembly {
    key: (Endpoint, u16, Option<u16>, Option<u16>),
    payload: Vec<u8>,
    content_format: ContentFormat,
}

/// The LWM2M dispatcher (C8).
pub struct Dispatcher {
    registry: ObjectRegistry,
    config: EngineConfig,
    multi_read: Option<MultiReadLock>,
    block1: Option<Block1Reassembly>,
    /// Set whenever a create, delete, or object-list-affecting write happens, so the RD client
    /// (C9) knows to send a registration Update (`lwm2m_rd_client_set_update_rd`).
    rd_update_needed: bool,
}

impl Dispatcher {
    pub fn new(config: EngineConfig) -> Dispatcher {
        Dispatcher {
            registry: ObjectRegistry::new(),
            config,
            multi_read: None,
            block1: None,
            rd_update_needed: false,
        }
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ObjectRegistry {
        &mut self.registry
    }

    /// Whether a change since the last call requires a registration Update. Clears the flag.
    pub fn take_rd_update_needed(&mut self) -> bool {
        std::mem::replace(&mut self.rd_update_needed, false)
    }

    fn max_block_szx(&self) -> u8 {
        szx_for_max_len(self.config.max_block_size)
    }

    fn handle_request(
        &mut self,
        now_ms: u64,
        source: Endpoint,
        request: &dyn MessageRead,
        response: &mut VecMessageEncoder,
    ) -> HandlerResult {
        let uri_path = match request.options().extract_uri_path() {
            Ok(path) => path,
            Err(_) => return HandlerResult::Continue,
        };

        if uri_path == "bs" && request.msg_code() == MsgCode::MethodPost {
            response.set_msg_code(MsgCode::SuccessChanged);
            return HandlerResult::Processed;
        }

        let path = match parse_path(&uri_path) {
            Some(path) => path,
            None => {
                if uri_path.is_empty() && request.msg_code() == MsgCode::MethodDelete {
                    self.registry.delete_all();
                    self.rd_update_needed = true;
                    response.set_msg_code(MsgCode::SuccessDeleted);
                    return HandlerResult::Processed;
                }
                return HandlerResult::Continue;
            }
        };

        let discover = request.msg_code() == MsgCode::MethodGet
            && request.accept() == Some(ContentFormat::LINK_FORMAT);

        let is_write = matches!(request.msg_code(), MsgCode::MethodPut)
            || (request.msg_code() == MsgCode::MethodPost && path.level() < 3);

        if is_write {
            if let Some(block) = request.block1() {
                match self.feed_block1(source, path, request, block) {
                    Ok(Some((format, payload))) => {
                        let status = self.handle_write(path, format, &payload);
                        response.set_msg_code(status.into());
                        return HandlerResult::Processed;
                    }
                    Ok(None) => {
                        response.set_msg_code(MsgCode::SuccessContinue);
                        let reply = BlockInfo::new(block.num(), false, block.szx())
                            .expect("block was already validated on parse");
                        let _ = response.insert_option(option::BLOCK1, reply);
                        return HandlerResult::Processed;
                    }
                    Err(status) => {
                        response.set_msg_code(status.into());
                        return HandlerResult::Processed;
                    }
                }
            }
        }

        let status = match request.msg_code() {
            MsgCode::MethodGet => self.handle_read(now_ms, source, path, discover, request, response),
            MsgCode::MethodPut => {
                let format = request.content_format().unwrap_or(ContentFormat::TEXT_PLAIN);
                self.handle_write(path, format, request.payload())
            }
            MsgCode::MethodPost if is_write => {
                let format = request.content_format().unwrap_or(ContentFormat::TEXT_PLAIN);
                self.handle_write(path, format, request.payload())
            }
            MsgCode::MethodPost => self.handle_execute(path, request.payload()),
            MsgCode::MethodDelete => self.handle_delete(path),
            _ => return HandlerResult::Continue,
        };

        if !matches!(request.msg_code(), MsgCode::MethodGet) {
            response.set_msg_code(status.into());
        }

        HandlerResult::Processed
    }

    fn handle_delete(&mut self, path: Path) -> LwM2mStatus {
        let iid = match path.iid {
            Some(iid) => iid,
            None => return LwM2mStatus::OperationNotAllowed,
        };
        if self.registry.delete_instance(path.oid, iid) {
            self.rd_update_needed = true;
            LwM2mStatus::Deleted
        } else {
            LwM2mStatus::NotFound
        }
    }

    fn handle_execute(&mut self, path: Path, args: &[u8]) -> LwM2mStatus {
        let (oid, iid, rid) = match (path.oid, path.iid, path.rid) {
            (oid, Some(iid), Some(rid)) => (oid, iid, rid),
            _ => return LwM2mStatus::OperationNotAllowed,
        };
        let instance = match self.registry.find_mut(oid, iid) {
            Some(instance) => instance,
            None => return LwM2mStatus::NotFound,
        };
        if !instance.access_of(rid).contains(ResourceAccess::EXECUTABLE) {
            return LwM2mStatus::OperationNotAllowed;
        }
        match instance.execute(rid, args) {
            Some(status) => status,
            None => LwM2mStatus::NotFound,
        }
    }

    // ---- write / create-by-write (§4.8) ----

    fn handle_write(&mut self, path: Path, format: ContentFormat, payload: &[u8]) -> LwM2mStatus {
        if let Some(rid) = path.rid {
            let iid = match path.iid {
                Some(iid) => iid,
                None => return LwM2mStatus::BadRequest,
            };
            return self.write_scalar(path.oid, iid, rid, format, payload);
        }

        let items = match parse_write_items(path, format, payload) {
            Ok(items) => items,
            Err(status) => return status,
        };

        if items.is_empty() {
            return LwM2mStatus::BadRequest;
        }

        let mut created_any = false;
        for item in items {
            match self.apply_write_item(item) {
                Ok(created) => created_any |= created,
                Err(status) => return status,
            }
        }
        self.rd_update_needed |= created_any;
        if created_any {
            LwM2mStatus::Created
        } else {
            LwM2mStatus::Changed
        }
    }

    /// Feeds one Block1-tagged chunk of a write/create/execute body into the reassembly buffer.
    /// Returns the completed `(content_format, payload)` once the block with `more=0` arrives,
    /// or `Ok(None)` while more chunks are still expected (§4.8).
    fn feed_block1(
        &mut self,
        source: Endpoint,
        path: Path,
        request: &dyn MessageRead,
        block: BlockInfo,
    ) -> Result<Option<(ContentFormat, Vec<u8>)>, LwM2mStatus> {
        let key = (source, path.oid, path.iid, path.rid);

        if block.num() == 0 {
            self.block1 = Some(Block1Reassembly {
                key,
                payload: Vec::new(),
                content_format: request.content_format().unwrap_or(ContentFormat::TEXT_PLAIN),
            });
        }

        let reassembly = match &mut self.block1 {
            Some(reassembly) if reassembly.key == key => reassembly,
            _ => return Err(LwM2mStatus::BadRequest),
        };

        if block.offset() != reassembly.payload.len() {
            self.block1 = None;
            return Err(LwM2mStatus::BadRequest);
        }

        let payload = request.payload();
        let max_len = self.config.max_block_size.saturating_mul(self.config.max_chunks);
        if reassembly.payload.len() + payload.len() > max_len {
            self.block1 = None;
            return Err(LwM2mStatus::BadRequest);
        }

        reassembly.payload.extend_from_slice(payload);

        if block.more_flag() {
            Ok(None)
        } else {
            let reassembly = self.block1.take().expect("matched Some above");
            Ok(Some((reassembly.content_format, reassembly.payload)))
        }
    }

    fn write_scalar(
        &mut self,
        oid: u16,
        iid: u16,
        rid: u16,
        format: ContentFormat,
        payload: &[u8],
    ) -> LwM2mStatus {
        let raw_value = if format.is_tlv() {
            match TlvReader::read(payload) {
                Ok(values) if values.len() == 1 => values.into_iter().next().unwrap().value,
                _ => return LwM2mStatus::BadRequest,
            }
        } else if format.is_json() {
            match JsonReader::read(match std::str::from_utf8(payload) {
                Ok(text) => text,
                Err(_) => return LwM2mStatus::BadRequest,
            }) {
                Ok(values) if values.len() == 1 => values.into_iter().next().unwrap().value,
                _ => return LwM2mStatus::BadRequest,
            }
        } else {
            LwM2mValue::Opaque(payload.to_vec())
        };

        let created = match self.get_or_create_instance(oid, iid) {
            Ok(created) => created,
            Err(status) => return status,
        };

        let instance = self.registry.find_mut(oid, iid).expect("just created or found above");
        if !created && !instance.access_of(rid).contains(ResourceAccess::WRITABLE) {
            return LwM2mStatus::OperationNotAllowed;
        }

        let existing = instance.resources().get(&rid).cloned();
        let coerced = match coerce_value(existing.as_ref(), raw_value, !format.is_tlv()) {
            Ok(value) => value,
            Err(status) => return status,
        };
        instance.resources_mut().insert(rid, coerced);

        self.rd_update_needed |= created;
        if created {
            LwM2mStatus::Created
        } else {
            LwM2mStatus::Changed
        }
    }

    /// Finds `oid/iid`, or creates it from a registered template (§4.8 create-by-write),
    /// returning whether a new instance was created.
    fn get_or_create_instance(&mut self, oid: u16, iid: u16) -> Result<bool, LwM2mStatus> {
        if self.registry.find(oid, iid).is_some() {
            return Ok(false);
        }
        if self.registry.find_template(oid).is_none() {
            return Err(LwM2mStatus::NotFound);
        }
        self.registry.create_instance(oid, iid).map_err(|_| LwM2mStatus::Error)?;
        Ok(true)
    }

    fn apply_write_item(&mut self, item: ParsedItem) -> Result<bool, LwM2mStatus> {
        let created = self.get_or_create_instance(item.oid, item.iid)?;
        let instance = self.registry.find_mut(item.oid, item.iid).expect("created or found above");
        if !created && !instance.access_of(item.rid).contains(ResourceAccess::WRITABLE) {
            return Err(LwM2mStatus::OperationNotAllowed);
        }
        instance.resources_mut().insert(item.rid, item.value);
        Ok(created)
    }

    // ---- read / discover (§4.8) ----

    fn handle_read(
        &mut self,
        now_ms: u64,
        source: Endpoint,
        path: Path,
        discover: bool,
        request: &dyn MessageRead,
        response: &mut VecMessageEncoder,
    ) -> LwM2mStatus {
        let requested_block =
            request.block2().unwrap_or_else(|| BlockInfo::new(0, false, self.max_block_szx()).unwrap());
        let key = (path.oid, path.iid, path.rid);

        if requested_block.num() > 0 {
            let has_matching_lock = matches!(
                &self.multi_read,
                Some(lock) if lock.key == key && lock.holder == source && lock.expires_at_ms > now_ms
            );
            if !has_matching_lock {
                return LwM2mStatus::ServiceUnavailable;
            }
        } else {
            if let Some(existing) = &self.multi_read {
                if existing.expires_at_ms > now_ms && (existing.key != key || existing.holder != source) {
                    return LwM2mStatus::ServiceUnavailable;
                }
            }
            let accept = request.accept().or_else(|| request.content_format());
            let (payload, content_format) = if discover {
                match self.build_discover_payload(path) {
                    Ok(result) => result,
                    Err(status) => return status,
                }
            } else {
                match self.build_read_payload(path, accept) {
                    Ok(result) => result,
                    Err(status) => return status,
                }
            };
            self.multi_read = Some(MultiReadLock {
                key,
                holder: source,
                payload,
                content_format,
                expires_at_ms: now_ms + self.config.multi_read_lock_idle_timeout.as_millis() as u64,
            });
        }

        let block = requested_block.clamped_to(self.max_block_szx());
        let lock = self.multi_read.as_mut().expect("populated above");
        let start = block.offset().min(lock.payload.len());
        let end = (start + block.len()).min(lock.payload.len());
        let more = end < lock.payload.len();
        let slice = lock.payload[start..end].to_vec();
        let content_format = lock.content_format;

        let _ = response.insert_option(option::CONTENT_FORMAT, content_format);
        let reply_block = BlockInfo::new(block.num(), more, block.szx()).expect("block within range");
        let _ = response.insert_option(option::BLOCK2, reply_block);
        let _ = response.append_payload_bytes(&slice);

        if more {
            lock.expires_at_ms = now_ms + self.config.multi_read_lock_idle_timeout.as_millis() as u64;
        } else {
            self.multi_read = None;
        }

        LwM2mStatus::Content
    }

    fn build_read_payload(
        &self,
        path: Path,
        accept: Option<ContentFormat>,
    ) -> Result<(Vec<u8>, ContentFormat), LwM2mStatus> {
        if let (Some(iid), Some(rid)) = (path.iid, path.rid) {
            let instance = self.registry.find(path.oid, iid).ok_or(LwM2mStatus::NotFound)?;
            if !instance.access_of(rid).contains(ResourceAccess::READABLE) {
                return Err(LwM2mStatus::OperationNotAllowed);
            }
            let value = instance.resources().get(&rid).ok_or(LwM2mStatus::NotFound)?;
            return Ok(encode_scalar(rid, value, accept));
        }

        let format = pick_multi_format(accept);
        let instances: Vec<&Instance> = match path.iid {
            Some(iid) => self.registry.find(path.oid, iid).into_iter().collect(),
            None => self.registry.instances_of(path.oid).collect(),
        };
        if instances.is_empty() {
            return Err(LwM2mStatus::NotFound);
        }

        if format.is_json() {
            let base = match path.iid {
                Some(iid) => format!("/{}/{}", path.oid, iid),
                None => format!("/{}", path.oid),
            };
            let mut writer = JsonWriter::new(base);
            for instance in instances {
                for (rid, value) in instance.resources() {
                    if !instance.access_of(*rid).contains(ResourceAccess::READABLE) {
                        continue;
                    }
                    write_json_entry(&mut writer, *rid, value);
                }
            }
            Ok((writer.finish(), format))
        } else {
            let mut out = Vec::new();
            for instance in instances {
                let mut writer = TlvWriter::new();
                for (rid, value) in instance.resources() {
                    if !instance.access_of(*rid).contains(ResourceAccess::READABLE) {
                        continue;
                    }
                    writer.resource(*rid, &encode_tlv_value(value));
                }
                if path.iid.is_none() {
                    out.extend(writer.finish_as_object_instance(instance.iid().unwrap_or(0)));
                } else {
                    out.extend(writer.finish());
                }
            }
            Ok((out, format))
        }
    }

    fn build_discover_payload(&self, path: Path) -> Result<(Vec<u8>, ContentFormat), LwM2mStatus> {
        let instances: Vec<&Instance> = match path.iid {
            Some(iid) => self.registry.find(path.oid, iid).into_iter().collect(),
            None => self.registry.instances_of(path.oid).collect(),
        };
        if instances.is_empty() {
            return Err(LwM2mStatus::NotFound);
        }

        let mut buffer = String::new();
        {
            let mut writer = LinkFormatWrite::new(&mut buffer);
            for instance in instances {
                let iid = instance.iid().unwrap_or(0);
                for (rid, _) in instance.resources() {
                    if let Some(rid_filter) = path.rid {
                        if *rid != rid_filter {
                            continue;
                        }
                    }
                    let link = format!("/{}/{}/{}", path.oid, iid, rid);
                    let mut entry = writer.link(&link);
                    if let Some(dim) = instance.dim_of(*rid) {
                        entry = entry.attr_u16(LINK_ATTR_DIMENSION, dim);
                    }
                    let _ = entry.finish();
                }
            }
            let _ = writer.finish();
        }
        Ok((buffer.into_bytes(), ContentFormat::LINK_FORMAT))
    }
}

impl CoapHandler for Dispatcher {
    fn handle(
        &mut self,
        now_ms: u64,
        source: Endpoint,
        request: &dyn MessageRead,
        response: &mut VecMessageEncoder,
    ) -> HandlerResult {
        self.handle_request(now_ms, source, request, response)
    }
}

fn szx_for_max_len(max_len: usize) -> u8 {
    for szx in (0..=BlockInfo::SZX_MAX).rev() {
        if (1usize << (szx as usize + 4)) <= max_len {
            return szx;
        }
    }
    0
}

struct ParsedItem {
    oid: u16,
    iid: u16,
    rid: u16,
    value: LwM2mValue,
}

fn parse_write_items(path: Path, format: ContentFormat, payload: &[u8]) -> Result<Vec<ParsedItem>, LwM2mStatus> {
    if format.is_tlv() {
        let entries = TlvReader::read_entries(payload).map_err(|_| LwM2mStatus::BadRequest)?;
        let mut items = Vec::new();
        flatten_tlv_entries(path, &entries, &mut items)?;
        Ok(items)
    } else if format.is_json() {
        let text = std::str::from_utf8(payload).map_err(|_| LwM2mStatus::BadRequest)?;
        let values = JsonReader::read(text).map_err(|_| LwM2mStatus::BadRequest)?;
        let mut items = Vec::new();
        for entry in values {
            // A sender's "bn" base may or may not already include the object id from the
            // request URI depending on how it terminates its base path; tolerate either.
            let mut segments = entry.path.as_slice();
            if segments.first() == Some(&path.oid) {
                segments = &segments[1..];
            }
            let (iid, rid) = match (path.iid, segments) {
                (Some(iid), [rid]) => (iid, *rid),
                (Some(iid), [rid, _riid]) => (iid, *rid),
                (None, [iid, rid]) => (*iid, *rid),
                (None, [iid, rid, _riid]) => (*iid, *rid),
                _ => return Err(LwM2mStatus::BadRequest),
            };
            items.push(ParsedItem { oid: path.oid, iid, rid, value: entry.value });
        }
        Ok(items)
    } else {
        Err(LwM2mStatus::UnsupportedContentFormat)
    }
}

fn flatten_tlv_entries(
    path: Path,
    entries: &[TlvEntry],
    out: &mut Vec<ParsedItem>,
) -> Result<(), LwM2mStatus> {
    for entry in entries {
        match entry.class {
            TlvClass::ObjectInstance => {
                let iid = entry.id;
                match &entry.payload {
                    TlvPayload::Children(children) => {
                        let inner = Path { oid: path.oid, iid: Some(iid), rid: None };
                        flatten_tlv_entries(inner, children, out)?;
                    }
                    TlvPayload::Value(_) => return Err(LwM2mStatus::BadRequest),
                }
            }
            TlvClass::Resource => {
                let iid = path.iid.ok_or(LwM2mStatus::BadRequest)?;
                let bytes = match &entry.payload {
                    TlvPayload::Value(bytes) => bytes.clone(),
                    TlvPayload::Children(_) => return Err(LwM2mStatus::BadRequest),
                };
                out.push(ParsedItem { oid: path.oid, iid, rid: entry.id, value: LwM2mValue::Opaque(bytes) });
            }
            TlvClass::MultiResource => {
                let iid = path.iid.ok_or(LwM2mStatus::BadRequest)?;
                // No per-resource-instance storage (§7, REDESIGN FLAGS): re-encode the whole
                // multi-resource as a single opaque aggregate keyed by its own id.
                let mut writer = TlvWriter::new();
                if let TlvPayload::Children(children) = &entry.payload {
                    for child in children {
                        if let TlvPayload::Value(bytes) = &child.payload {
                            writer.resource(child.id, bytes);
                        }
                    }
                }
                out.push(ParsedItem { oid: path.oid, iid, rid: entry.id, value: LwM2mValue::Opaque(writer.finish()) });
            }
            TlvClass::ResourceInstance => return Err(LwM2mStatus::BadRequest),
        }
    }
    Ok(())
}

fn coerce_value(
    existing: Option<&LwM2mValue>,
    raw: LwM2mValue,
    as_text: bool,
) -> Result<LwM2mValue, LwM2mStatus> {
    let bytes = match &raw {
        LwM2mValue::Opaque(bytes) => bytes.as_slice(),
        // JSON self-describing strings/booleans arrive already typed; pass through untouched.
        other => return Ok(other.clone()),
    };

    let coerced = match existing {
        Some(LwM2mValue::Int(_)) => LwM2mValue::Int(if as_text {
            PlainTextReader::read_int(bytes).map_err(|_| LwM2mStatus::BadRequest)?
        } else {
            codecs::read_int(bytes).map_err(|_| LwM2mStatus::BadRequest)?
        }),
        Some(LwM2mValue::Float(f)) => LwM2mValue::Float(if as_text {
            PlainTextReader::read_float32fix(bytes, f.frac_bits).map_err(|_| LwM2mStatus::BadRequest)?
        } else {
            codecs::read_float32fix(bytes).map_err(|_| LwM2mStatus::BadRequest)?
        }),
        Some(LwM2mValue::Boolean(_)) => LwM2mValue::Boolean(if as_text {
            PlainTextReader::read_boolean(bytes).map_err(|_| LwM2mStatus::BadRequest)?
        } else {
            codecs::read_boolean(bytes).map_err(|_| LwM2mStatus::BadRequest)?
        }),
        Some(LwM2mValue::String(_)) | None => {
            LwM2mValue::String(std::str::from_utf8(bytes).map_err(|_| LwM2mStatus::BadRequest)?.to_owned())
        }
        Some(LwM2mValue::Opaque(_)) => LwM2mValue::Opaque(bytes.to_vec()),
    };
    Ok(coerced)
}

fn pick_multi_format(accept: Option<ContentFormat>) -> ContentFormat {
    match accept {
        Some(format) if format.is_json() => ContentFormat::LWM2M_JSON,
        _ => ContentFormat::LWM2M_TLV,
    }
}

fn encode_scalar(rid: u16, value: &LwM2mValue, accept: Option<ContentFormat>) -> (Vec<u8>, ContentFormat) {
    if let Some(format) = accept {
        if format.is_tlv() {
            let mut writer = TlvWriter::new();
            writer.resource(rid, &encode_tlv_value(value));
            return (writer.finish(), ContentFormat::LWM2M_TLV);
        }
        if format.is_json() {
            let mut writer = JsonWriter::new(String::new());
            write_json_entry(&mut writer, rid, value);
            return (writer.finish(), ContentFormat::LWM2M_JSON);
        }
    }
    match value {
        LwM2mValue::Int(v) => (PlainTextWriter::write_int(*v), ContentFormat::LWM2M_TEXT_PLAIN),
        LwM2mValue::Float(v) => (PlainTextWriter::write_float32fix(*v), ContentFormat::LWM2M_TEXT_PLAIN),
        LwM2mValue::Boolean(v) => (PlainTextWriter::write_boolean(*v), ContentFormat::LWM2M_TEXT_PLAIN),
        LwM2mValue::String(v) => (PlainTextWriter::write_string(v), ContentFormat::LWM2M_TEXT_PLAIN),
        LwM2mValue::Opaque(v) => (v.clone(), ContentFormat::APPLICATION_OCTET_STREAM),
    }
}

fn encode_tlv_value(value: &LwM2mValue) -> Vec<u8> {
    match value {
        LwM2mValue::Int(v) => codecs::write_int(*v),
        LwM2mValue::Float(v) => codecs::write_float32fix(*v),
        LwM2mValue::Boolean(v) => codecs::write_boolean(*v),
        LwM2mValue::String(v) => v.as_bytes().to_vec(),
        LwM2mValue::Opaque(v) => v.clone(),
    }
}

fn write_json_entry(writer: &mut JsonWriter, rid: u16, value: &LwM2mValue) {
    match value {
        LwM2mValue::Int(v) => writer.write_int(rid, *v),
        LwM2mValue::Float(v) => writer.write_float32fix(rid, *v),
        LwM2mValue::Boolean(v) => writer.write_boolean(rid, *v),
        LwM2mValue::String(v) => writer.write_string(rid, v),
        LwM2mValue::Opaque(v) => writer.write_string(rid, &base16(v)),
    }
}

fn base16(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::Engine;
    use crate::message::MsgType;
    use crate::transport::LoopbackTransport;

    fn device_instance(dispatcher: &mut Dispatcher) {
        dispatcher.registry_mut().register_template(3);
        dispatcher.registry_mut().create_instance(3, 0).unwrap();
        let instance = dispatcher.registry_mut().find_mut(3, 0).unwrap();
        instance.resources_mut().insert(0, LwM2mValue::String("ACME".to_owned()));
        instance.set_access(0, ResourceAccess::READABLE);
    }

    fn request(code: MsgCode, path: &str) -> VecMessageEncoder {
        let mut msg = VecMessageEncoder::default();
        msg.set_msg_type(MsgType::Con);
        msg.set_msg_code(code);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let _ = msg.insert_option(option::URI_PATH, segment);
        }
        msg
    }

    #[test]
    fn reads_a_single_resource_as_plain_text() {
        let mut dispatcher = Dispatcher::new(EngineConfig::default());
        device_instance(&mut dispatcher);

        let req = request(MsgCode::MethodGet, "3/0/0");
        let bytes: Vec<u8> = req.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();

        let mut response = VecMessageEncoder::default();
        let source = Endpoint::parse("coap://127.0.0.1:5683").unwrap();
        let result = dispatcher.handle(0, source, &parsed, &mut response);
        assert!(matches!(result, HandlerResult::Processed));

        let bytes: Vec<u8> = response.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();
        assert_eq!(parsed.msg_code(), MsgCode::SuccessContent);
        assert_eq!(parsed.payload(), b"ACME");
        assert_eq!(parsed.content_format(), Some(ContentFormat::LWM2M_TEXT_PLAIN));
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut dispatcher = Dispatcher::new(EngineConfig::default());
        dispatcher.registry_mut().register_template(1);
        dispatcher.registry_mut().create_instance(1, 0).unwrap();
        dispatcher.registry_mut().find_mut(1, 0).unwrap().resources_mut().insert(1, LwM2mValue::Int(0));

        let mut req = request(MsgCode::MethodPut, "1/0/1");
        let _ = req.append_payload_bytes(b"42");
        let bytes: Vec<u8> = req.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();

        let mut response = VecMessageEncoder::default();
        let source = Endpoint::parse("coap://127.0.0.1:5683").unwrap();
        dispatcher.handle(0, source, &parsed, &mut response);
        let bytes: Vec<u8> = response.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();
        assert_eq!(parsed.msg_code(), MsgCode::SuccessChanged);

        assert_eq!(
            dispatcher.registry().find(1, 0).unwrap().resources().get(&1),
            Some(&LwM2mValue::Int(42))
        );
    }

    #[test]
    fn block1_reassembles_a_fragmented_write() {
        let mut dispatcher = Dispatcher::new(EngineConfig::default());
        dispatcher.registry_mut().register_template(1);
        dispatcher.registry_mut().create_instance(1, 0).unwrap();
        dispatcher.registry_mut().find_mut(1, 0).unwrap().resources_mut().insert(5, LwM2mValue::String(String::new()));

        let source = Endpoint::parse("coap://127.0.0.1:5683").unwrap();
        let full_value = format!("{}{}", "A".repeat(16), "B".repeat(4));
        let chunks: Vec<&str> = [&full_value[0..16], &full_value[16..20]].to_vec();

        for (num, chunk) in chunks.iter().enumerate() {
            let mut req = request(MsgCode::MethodPut, "1/0/5");
            let more = num + 1 < chunks.len();
            let block = BlockInfo::new(num as u32, more, 0).unwrap(); // szx=0 -> 16-byte blocks
            let _ = req.insert_option(option::BLOCK1, block);
            let _ = req.append_payload_bytes(chunk.as_bytes());
            let bytes: Vec<u8> = req.into();
            let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();

            let mut response = VecMessageEncoder::default();
            dispatcher.handle(0, source, &parsed, &mut response);
            let bytes: Vec<u8> = response.into();
            let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();

            if more {
                assert_eq!(parsed.msg_code(), MsgCode::SuccessContinue);
            } else {
                assert_eq!(parsed.msg_code(), MsgCode::SuccessChanged);
            }
        }

        assert_eq!(
            dispatcher.registry().find(1, 0).unwrap().resources().get(&5),
            Some(&LwM2mValue::String(full_value))
        );
    }

    #[test]
    fn block1_out_of_order_chunk_is_rejected() {
        let mut dispatcher = Dispatcher::new(EngineConfig::default());
        dispatcher.registry_mut().register_template(1);
        dispatcher.registry_mut().create_instance(1, 0).unwrap();

        let source = Endpoint::parse("coap://127.0.0.1:5683").unwrap();
        let mut req = request(MsgCode::MethodPut, "1/0/5");
        let block = BlockInfo::new(3, true, 3).unwrap();
        let _ = req.insert_option(option::BLOCK1, block);
        let _ = req.append_payload_bytes(b"stray");
        let bytes: Vec<u8> = req.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();

        let mut response = VecMessageEncoder::default();
        dispatcher.handle(0, source, &parsed, &mut response);
        let bytes: Vec<u8> = response.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();
        assert_eq!(parsed.msg_code(), MsgCode::ClientErrorBadRequest);
    }

    #[test]
    fn delete_removes_the_instance() {
        let mut dispatcher = Dispatcher::new(EngineConfig::default());
        dispatcher.registry_mut().create_instance(3, 0).unwrap();

        let req = request(MsgCode::MethodDelete, "3/0");
        let bytes: Vec<u8> = req.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();

        let mut response = VecMessageEncoder::default();
        let source = Endpoint::parse("coap://127.0.0.1:5683").unwrap();
        dispatcher.handle(0, source, &parsed, &mut response);
        let bytes: Vec<u8> = response.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();
        assert_eq!(parsed.msg_code(), MsgCode::SuccessDeleted);
        assert!(dispatcher.registry().find(3, 0).is_none());
        assert!(dispatcher.take_rd_update_needed());
    }

    #[test]
    fn execute_invokes_the_registered_handler() {
        let mut dispatcher = Dispatcher::new(EngineConfig::default());
        dispatcher.registry_mut().create_instance(3, 0).unwrap();
        let invoked = std::rc::Rc::new(std::cell::Cell::new(false));
        let invoked2 = invoked.clone();
        dispatcher.registry_mut().find_mut(3, 0).unwrap().set_executable(
            4,
            Box::new(move |_args| {
                invoked2.set(true);
                LwM2mStatus::Changed
            }),
        );

        let req = request(MsgCode::MethodPost, "3/0/4");
        let bytes: Vec<u8> = req.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();

        let mut response = VecMessageEncoder::default();
        let source = Endpoint::parse("coap://127.0.0.1:5683").unwrap();
        dispatcher.handle(0, source, &parsed, &mut response);
        let bytes: Vec<u8> = response.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();
        assert_eq!(parsed.msg_code(), MsgCode::SuccessChanged);
        assert!(invoked.get());
    }

    #[test]
    fn create_by_write_promotes_a_template_to_an_instance() {
        let mut dispatcher = Dispatcher::new(EngineConfig::default());
        dispatcher.registry_mut().register_template(16);

        let mut writer = TlvWriter::new();
        writer.resource(0, b"hello");
        let payload = writer.finish_as_object_instance(0);

        let mut req = request(MsgCode::MethodPost, "16");
        let _ = req.insert_option(option::CONTENT_FORMAT, ContentFormat::LWM2M_TLV);
        let _ = req.append_payload_bytes(&payload);
        let bytes: Vec<u8> = req.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();

        let mut response = VecMessageEncoder::default();
        let source = Endpoint::parse("coap://127.0.0.1:5683").unwrap();
        dispatcher.handle(0, source, &parsed, &mut response);
        let bytes: Vec<u8> = response.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();
        assert_eq!(parsed.msg_code(), MsgCode::SuccessCreated);
        assert!(dispatcher.registry().find(16, 0).is_some());
    }

    #[test]
    fn service_unavailable_when_a_different_reader_is_mid_block_transfer() {
        let mut dispatcher = Dispatcher::new(EngineConfig { max_block_size: 16, ..EngineConfig::default() });
        dispatcher.registry_mut().create_instance(3, 0).unwrap();
        for rid in 0..20u16 {
            dispatcher
                .registry_mut()
                .find_mut(3, 0)
                .unwrap()
                .resources_mut()
                .insert(rid, LwM2mValue::Int(rid as i64));
        }

        let req = request(MsgCode::MethodGet, "3/0");
        let bytes: Vec<u8> = req.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();
        let mut response = VecMessageEncoder::default();
        let reader_a = Endpoint::parse("coap://127.0.0.1:1111").unwrap();
        dispatcher.handle(0, reader_a, &parsed, &mut response);
        let bytes: Vec<u8> = response.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();
        assert_eq!(parsed.msg_code(), MsgCode::SuccessContent);
        assert!(parsed.block2().unwrap().more_flag());

        let req = request(MsgCode::MethodGet, "3/0");
        let bytes: Vec<u8> = req.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();
        let mut response = VecMessageEncoder::default();
        let reader_b = Endpoint::parse("coap://127.0.0.1:2222").unwrap();
        dispatcher.handle(0, reader_b, &parsed, &mut response);
        let bytes: Vec<u8> = response.into();
        let parsed = crate::message::StandardMessageParser::new(&bytes).unwrap();
        assert_eq!(parsed.msg_code(), MsgCode::ServerErrorServiceUnavailable);
    }

    #[test]
    fn wires_into_an_engine_as_a_coap_handler() {
        let server_ep = Endpoint::parse("coap://127.0.0.1:5683").unwrap();
        let client_ep = Endpoint::parse("coap://127.0.0.1:9999").unwrap();
        let (client_transport, server_transport) = LoopbackTransport::pair(client_ep, server_ep);

        let mut dispatcher = Dispatcher::new(EngineConfig::default());
        device_instance(&mut dispatcher);

        let mut server = Engine::new(server_transport, EngineConfig::default());
        server.add_handler(Box::new(dispatcher));
        let mut client = Engine::new(client_transport, EngineConfig::default());

        let req = request(MsgCode::MethodGet, "3/0/0");
        let got = std::rc::Rc::new(std::cell::RefCell::new(None));
        let got2 = got.clone();
        client
            .send_request(0, server_ep, true, req, move |resp| {
                *got2.borrow_mut() = resp;
            })
            .unwrap();

        server.poll(0).unwrap();
        client.poll(0).unwrap();

        let response = got.borrow_mut().take().unwrap();
        assert_eq!(response.msg_code(), MsgCode::SuccessContent);
        assert_eq!(response.payload(), b"ACME");
    }
}
