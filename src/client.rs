// Copyright 2026 The logix Authors. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Client for Allen-Bradley Logix controllers: browse, read, write

use super::cip::{self, Envelope, Reply, Request};
use super::connection::{self, Connection};
use super::constant::*;
use super::eip::{self, Identity, Options};
use super::epath::EPath;
use super::error::Error;
use super::symbols::{self, TagInfo};
use super::template::{self, TemplateCache};
use super::transport::Transport;
use super::value::{self, PlcValue, TagValue};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disconnected,
    Unconnected,
    Connected,
}

/// Messaging mode and negotiated payload of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub connected: bool,
    pub size: u16,
}

/// One client per controller. A client owns exactly one session, one
/// sender context and, when connected, one sequence counter; requests on
/// it are strictly ordered with no pipelining.
pub struct Client<T: Transport> {
    transport: T,
    route: Vec<u8>,
    state: State,
    connection: Option<Connection>,
    templates: TemplateCache,
    symbols: HashMap<String, TagInfo>,
    next_serial: u16,
}

impl Client<eip::Transport> {
    /// Connect over TCP, register the session and, unless suppressed by
    /// the options, attempt a Forward Open.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use logix::{client::Client, eip};
    /// use std::net::{IpAddr, Ipv4Addr};
    /// use std::time::Duration;
    ///
    /// let addr = Ipv4Addr::new(192, 168, 1, 10);
    /// let mut opts = eip::Options::new(IpAddr::from(addr), 0);
    /// opts.read_timeout = Duration::from_secs(2);
    /// opts.write_timeout = Duration::from_secs(2);
    ///
    /// let mut cl = match Client::connect(opts) {
    ///     Ok(cl) => cl,
    ///     Err(e) => {
    ///         println!("{:?}", e.to_string());
    ///         return;
    ///     }
    /// };
    ///
    /// for value in cl.read(&["Counter"]).unwrap() {
    ///     println!("{}: {:?}", value.name, value.error);
    /// }
    /// ```
    pub fn connect(options: Options) -> Result<Client<eip::Transport>, Error> {
        let transport = eip::Transport::connect(options.clone())?;
        Client::new(transport, &options)
    }
}

impl<T: Transport> Client<T> {
    /// Build a client over any registered-session transport. Used directly
    /// by tests and by `connect` for the TCP transport.
    pub fn new(mut transport: T, options: &Options) -> Result<Client<T>, Error> {
        transport.register_session()?;
        let mut client = Client {
            transport,
            route: options.route_path(),
            state: State::Unconnected,
            connection: None,
            templates: TemplateCache::new(),
            symbols: HashMap::new(),
            next_serial: 1,
        };
        if !options.skip_forward_open && !options.micro800 {
            let serial = client.next_serial;
            client.next_serial = client.next_serial.wrapping_add(2);
            match connection::forward_open(&mut client.transport, &client.route, serial) {
                Ok(conn) => {
                    client.connection = Some(conn);
                    client.state = State::Connected;
                }
                // messaging continues via UCMM or direct
                Err(e) => warn!(error = %e, "Forward Open failed, continuing unconnected"),
            }
        }
        Ok(client)
    }

    /// Close the circuit (best effort) and unregister the session.
    /// Errors are swallowed; a dead controller cannot block teardown.
    pub fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            if let Err(e) = connection::forward_close(&mut self.transport, &self.route, &conn) {
                warn!(error = %e, "Forward Close failed");
            }
        }
        self.transport.close();
        self.state = State::Disconnected;
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connected: self.state == State::Connected,
            size: self.payload_size(),
        }
    }

    fn payload_size(&self) -> u16 {
        match &self.connection {
            Some(conn) => conn.size,
            None => PAYLOAD_STANDARD,
        }
    }

    /// ListIdentity over the session's own TCP stream.
    pub fn identity(&mut self) -> Result<Identity, Error> {
        self.transport.list_identity()
    }

    /// NOP to the Identity object, proving the circuit alive. A no-op
    /// when unconnected.
    pub fn keepalive(&mut self) -> Result<(), Error> {
        if self.connection.is_none() {
            return Ok(());
        }
        let reply = self.send(&connection::keepalive_request())?;
        if connection::keepalive_ok(reply.status) {
            return Ok(());
        }
        warn!(status = reply.status, "keepalive rejected, dropping circuit");
        self.connection = None;
        self.state = State::Unconnected;
        Err(reply.status_error())
    }

    // The dispatcher: pick the envelope once per request from session
    // state, send, and downgrade the session on classifying failures.
    fn send(&mut self, request: &Request) -> Result<Reply, Error> {
        let connected = self.connection.is_some();
        let result = match self.connection.as_mut() {
            Some(conn) => cip::send(
                &mut self.transport,
                Envelope::Connected { connection: conn },
                request,
            ),
            None if !self.route.is_empty() => cip::send(
                &mut self.transport,
                Envelope::RoutedUcmm { route: &self.route },
                request,
            ),
            None => cip::send(&mut self.transport, Envelope::Direct, request),
        };
        match &result {
            Err(Error::Protocol(reason)) if connected => {
                // sequence desync or framing error: the circuit is gone
                warn!(reason = %reason, "dropping desynchronized circuit");
                self.connection = None;
                self.state = State::Unconnected;
            }
            Err(Error::Protocol(_)) | Err(Error::Transport(_)) | Err(Error::Encapsulation(_)) => {
                self.connection = None;
                self.state = State::Disconnected;
            }
            _ => {}
        }
        result
    }

    // ---------- symbol browsing ----------

    /// Program names discovered at controller scope, `Program:` prefix
    /// stripped.
    pub fn programs(&mut self) -> Result<Vec<String>, Error> {
        let tags = self.browse(None)?;
        Ok(tags
            .iter()
            .filter(|tag| tag.is_program_entry())
            .map(|tag| tag.name["Program:".len()..].to_string())
            .collect())
    }

    /// Readable tags at controller scope.
    pub fn controller_tags(&mut self) -> Result<Vec<TagInfo>, Error> {
        Ok(self
            .browse(None)?
            .into_iter()
            .filter(TagInfo::is_readable)
            .collect())
    }

    /// Readable tags of one program, names rewritten to carry the program
    /// prefix.
    pub fn program_tags(&mut self, program: &str) -> Result<Vec<TagInfo>, Error> {
        let scope = if program.starts_with("Program:") {
            program.to_string()
        } else {
            format!("Program:{}", program)
        };
        Ok(self
            .browse(Some(&scope))?
            .into_iter()
            .filter(TagInfo::is_readable)
            .collect())
    }

    /// Readable tags at controller scope and in every discovered program.
    pub fn all_tags(&mut self) -> Result<Vec<TagInfo>, Error> {
        let controller = self.browse(None)?;
        let programs: Vec<String> = controller
            .iter()
            .filter(|tag| tag.is_program_entry())
            .map(|tag| tag.name.clone())
            .collect();
        let mut out: Vec<TagInfo> = controller
            .into_iter()
            .filter(TagInfo::is_readable)
            .collect();
        for program in programs {
            out.extend(self.program_tags(&program)?);
        }
        Ok(out)
    }

    // Paginated GetInstanceAttributeList: partial transfer means another
    // page exists at last_instance + 1. The page cap guards against a
    // controller that never stops paging.
    fn browse(&mut self, scope: Option<&str>) -> Result<Vec<TagInfo>, Error> {
        let mut out = Vec::new();
        let mut cursor = 0u32;
        for _ in 0..SYMBOL_PAGE_CAP {
            let request = symbols::attribute_list_request(scope, cursor);
            let reply = self.send(&request)?;
            if !reply.is_ok_or_partial() {
                return Err(reply.status_error());
            }
            let mut page = symbols::parse_attribute_list(&reply.data)?;
            let last_instance = match page.last() {
                Some(tag) => tag.instance_id,
                None => break,
            };
            cursor = last_instance + 1;

            for tag in page.iter_mut() {
                if let Some(program) = scope {
                    if !tag.name.starts_with("Program:") {
                        tag.name = format!("{}.{}", program, tag.name);
                    }
                }
                if tag.array_rank() > 0 && tag.dimensions.is_empty() && tag.is_readable() {
                    if let Err(e) = self.resolve_dimensions(scope, tag) {
                        if !e.is_transient() {
                            debug!(tag = %tag.name, error = %e, "array dimensions unresolved");
                        } else {
                            return Err(e);
                        }
                    }
                }
                self.symbols.insert(tag.name.clone(), tag.clone());
            }
            out.extend(page);
            if reply.status == STATUS_OK {
                break;
            }
        }
        debug!(scope = scope.unwrap_or("<controller>"), count = out.len(), "symbols browsed");
        Ok(out)
    }

    // Attribute 8 (byte count) divided by the atomic element size gives a
    // 1-D dimension; attribute 3 (dimensions) is the fallback for
    // controllers that lack attribute 8.
    fn resolve_dimensions(&mut self, scope: Option<&str>, tag: &mut TagInfo) -> Result<(), Error> {
        let reply = self.send(&symbols::byte_count_request(scope, tag.instance_id))?;
        if reply.status == STATUS_OK {
            let size = element_size(tag.type_code);
            if size > 0 {
                let bytes = symbols::parse_byte_count(&reply.data)?;
                tag.dimensions = vec![bytes / size as u32];
                return Ok(());
            }
        }
        let reply = self.send(&symbols::dimensions_request(scope, tag.instance_id))?;
        if reply.status != STATUS_OK {
            return Err(reply.status_error());
        }
        tag.dimensions = symbols::parse_dimensions(&reply.data)?;
        Ok(())
    }

    // ---------- template resolution ----------

    // At most one fetch per id per session: parses and permanent failures
    // are both cached; transient failures are not, so a reconnect reprobes.
    fn ensure_template(&mut self, id: u16) -> Result<(), Error> {
        if id == 0 {
            return Err(Error::Template {
                id,
                reason: "structure type code with id 0 is invalid".to_string(),
            });
        }
        if self.templates.get(id).is_some() {
            return Ok(());
        }
        if let Some(reason) = self.templates.failure(id) {
            return Err(Error::Template {
                id,
                reason: reason.to_string(),
            });
        }
        match self.fetch_template(id) {
            Ok(parsed) => {
                let nested: Vec<u16> = parsed
                    .members
                    .iter()
                    .filter(|member| !member.hidden && is_struct(member.type_code))
                    .map(|member| template_id(member.type_code))
                    .collect();
                info!(id, name = %parsed.name, members = parsed.members.len(), "template parsed");
                self.templates.insert(parsed);
                for nested_id in nested {
                    self.ensure_template(nested_id)?;
                }
                Ok(())
            }
            Err(e) => {
                if !e.is_transient() {
                    self.templates.insert_failure(id, e.to_string());
                }
                Err(e)
            }
        }
    }

    fn fetch_template(&mut self, id: u16) -> Result<template::Template, Error> {
        let reply = self.send(&template::attributes_request(id))?;
        if reply.status != STATUS_OK {
            return Err(reply.status_error());
        }
        let attrs = template::parse_attributes(&reply.data)?;
        let total = template::definition_len(&attrs)?;

        // large templates fragment; keep reading at increasing offsets
        // until the accumulated size matches
        let chunk = (self.payload_size() as usize).saturating_sub(64).max(64);
        let mut block: Vec<u8> = Vec::with_capacity(total);
        while block.len() < total {
            let want = (total - block.len()).min(chunk) as u16;
            let reply = self.send(&template::read_request(id, block.len() as u32, want))?;
            if !reply.is_ok_or_partial() {
                return Err(reply.status_error());
            }
            if reply.data.is_empty() {
                return Err(Error::Protocol(
                    "template read made no progress".to_string(),
                ));
            }
            block.extend_from_slice(&reply.data);
            if reply.status == STATUS_OK {
                break;
            }
        }
        template::parse_definition(id, &attrs, &block)
    }

    // ---------- tag reads ----------

    /// Read a batch of tags. Atomic scalars are grouped into Multiple
    /// Service Packets; arrays and structures are read individually, with
    /// chunked and fragmented fallbacks; UDTs that reject whole-structure
    /// reads are expanded into their atomic leaves, which appear in the
    /// result under their dotted paths.
    ///
    /// Per-tag failures populate [`TagValue::error`]; only a dead session
    /// fails the whole call.
    pub fn read(&mut self, names: &[&str]) -> Result<Vec<TagValue>, Error> {
        let limit = self.batch_limit();
        let mut slots: Vec<Vec<TagValue>> = names.iter().map(|_| Vec::new()).collect();

        let mut scalars: Vec<usize> = Vec::new();
        let mut individual: Vec<usize> = Vec::new();
        for (i, name) in names.iter().enumerate() {
            match self.symbols.get(*name) {
                Some(info) if info.is_struct() => individual.push(i),
                Some(info) if info.array_rank() > 0 && !info.dimensions.is_empty() => {
                    individual.push(i)
                }
                // unknown tags and arrays of unknown size read as scalars
                _ => scalars.push(i),
            }
        }

        for chunk in scalars.chunks(limit) {
            let chunk_names: Vec<&str> = chunk.iter().map(|i| names[*i]).collect();
            let read = self.read_batch(&chunk_names)?;
            for (slot, tag_value) in chunk.iter().zip(read) {
                slots[*slot].push(tag_value);
            }
        }
        for i in individual {
            slots[i] = self.read_structured(names[i])?;
        }
        Ok(slots.into_iter().flatten().collect())
    }

    /// Read one tag with an explicit element count.
    pub fn read_with_count(&mut self, name: &str, count: u16) -> Result<TagValue, Error> {
        let path = match EPath::parse_tag(name) {
            Ok(path) => path,
            Err(e) => return Ok(TagValue::failed(name, e.to_string())),
        };
        let reply = self.send(&read_tag_request(path, count))?;
        match reply.status {
            STATUS_OK => {
                let mut tag_value = parse_read_data(name, &reply.data, count);
                self.fix_struct_type(&mut tag_value);
                Ok(tag_value)
            }
            STATUS_PARTIAL_TRANSFER => self.read_fragmented(name, count, None),
            _ => Ok(TagValue::failed(name, reply.status_error().to_string())),
        }
    }

    fn batch_limit(&self) -> usize {
        if self.connection.is_some() {
            MSP_BATCH_CONNECTED
        } else {
            MSP_BATCH_UNCONNECTED
        }
    }

    // One MSP of single-element ReadTags. Embedded failures mark their
    // slot; the batch as a whole succeeds.
    fn read_batch(&mut self, names: &[&str]) -> Result<Vec<TagValue>, Error> {
        let mut out: Vec<TagValue> = names
            .iter()
            .map(|name| TagValue::failed(name, "not read".to_string()))
            .collect();
        let mut requests: Vec<Request> = Vec::new();
        let mut valid: Vec<usize> = Vec::new();
        for (i, name) in names.iter().enumerate() {
            match EPath::parse_tag(name) {
                Ok(path) => {
                    requests.push(read_tag_request(path, 1));
                    valid.push(i);
                }
                Err(e) => out[i].error = Some(e.to_string()),
            }
        }
        if requests.is_empty() {
            return Ok(out);
        }
        // a batch of one needs no container
        if requests.len() == 1 {
            let slot = valid[0];
            let reply = self.send(&requests[0])?;
            out[slot] = if reply.is_ok_or_partial() {
                let mut tag_value = parse_read_data(names[slot], &reply.data, 1);
                self.fix_struct_type(&mut tag_value);
                tag_value
            } else {
                TagValue::failed(names[slot], reply.status_error().to_string())
            };
            return Ok(out);
        }

        let reply = self.send(&cip::multiple_service(&requests))?;
        // 0x1E means some embedded services failed; the container itself
        // succeeded and every slot still parses
        if reply.status != STATUS_OK && reply.status != STATUS_EMBEDDED_SERVICE_ERROR {
            let message = reply.status_error().to_string();
            for i in &valid {
                out[*i].error = Some(message.clone());
            }
            return Ok(out);
        }
        let embedded = cip::split_multiple(&reply.data)?;
        if embedded.len() != valid.len() {
            return Err(Error::Protocol(format!(
                "MSP returned {} replies for {} services",
                embedded.len(),
                valid.len()
            )));
        }
        for (slot, service_reply) in valid.iter().zip(embedded) {
            out[*slot] = if service_reply.is_ok_or_partial() {
                let mut tag_value = parse_read_data(names[*slot], &service_reply.data, 1);
                self.fix_struct_type(&mut tag_value);
                tag_value
            } else {
                TagValue::failed(names[*slot], service_reply.status_error().to_string())
            };
        }
        Ok(out)
    }

    // Arrays and structures: whole read first, then chunked or fragmented
    // recovery on partial transfer, then member expansion when the
    // controller rejects whole-structure reads outright.
    fn read_structured(&mut self, name: &str) -> Result<Vec<TagValue>, Error> {
        let info = match self.symbols.get(name) {
            Some(info) => info.clone(),
            None => return Ok(vec![TagValue::failed(name, "tag not discovered".to_string())]),
        };
        let count = info.elements().min(u16::MAX as u32) as u16;

        let mut expected = None;
        if info.is_struct() {
            match self.ensure_template(info.template_id()) {
                Ok(()) => {
                    if let Some(parsed) = self.templates.get(info.template_id()) {
                        expected = Some(parsed.size as usize * count as usize + 2);
                    }
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => debug!(tag = name, error = %e, "reading structure without template"),
            }
        }

        let path = match EPath::parse_tag(name) {
            Ok(path) => path,
            Err(e) => return Ok(vec![TagValue::failed(name, e.to_string())]),
        };
        let reply = self.send(&read_tag_request(path, count))?;
        match reply.status {
            STATUS_OK => {
                let mut tag_value = parse_read_data(name, &reply.data, count);
                self.fix_struct_type(&mut tag_value);
                Ok(vec![tag_value])
            }
            STATUS_PARTIAL_TRANSFER if info.array_rank() > 0 => {
                self.read_chunked(name, &info, &reply, count).map(|v| vec![v])
            }
            STATUS_PARTIAL_TRANSFER => self.read_fragmented(name, count, expected).map(|v| vec![v]),
            _ if info.is_struct() => {
                warn!(
                    tag = name,
                    status = reply.status,
                    "whole-structure read rejected, expanding members"
                );
                self.read_expanded(name, &info)
            }
            _ => Ok(vec![TagValue::failed(name, reply.status_error().to_string())]),
        }
    }

    // Explicit index syntax recovery: Tag[offset] reads of up to 100
    // elements, sized to the connection payload minus request overhead.
    // A chunk that fails to advance terminates the loop with the partial
    // result.
    fn read_chunked(
        &mut self,
        name: &str,
        info: &TagInfo,
        first: &Reply,
        total: u16,
    ) -> Result<TagValue, Error> {
        let element = if info.is_struct() {
            match self.templates.get(info.template_id()) {
                Some(parsed) => parsed.size as usize,
                None => 0,
            }
        } else {
            element_size(info.type_code)
        };
        if element == 0 {
            return Ok(TagValue::failed(
                name,
                "element size unknown, cannot chunk".to_string(),
            ));
        }

        let mut tag_value = parse_read_data(name, &first.data, total);
        if !tag_value.is_ok() {
            return Ok(tag_value);
        }
        let handle_len = if tag_value.type_code == TYPE_STRUCT_MARKER {
            2
        } else {
            0
        };
        let per_chunk = ((self.payload_size() as usize).saturating_sub(100) / element)
            .max(1)
            .min(100);
        let mut got = tag_value.bytes.len().saturating_sub(handle_len) / element;

        while got < total as usize {
            let want = per_chunk.min(total as usize - got);
            let path = match EPath::parse_tag(&format!("{}[{}]", name, got)) {
                Ok(path) => path,
                Err(e) => {
                    tag_value.error = Some(e.to_string());
                    break;
                }
            };
            let reply = self.send(&read_tag_request(path, want as u16))?;
            if !reply.is_ok_or_partial() {
                warn!(tag = name, offset = got, status = reply.status, "chunked read stopped");
                break;
            }
            let chunk = parse_read_data(name, &reply.data, want as u16);
            if !chunk.is_ok() {
                break;
            }
            let skip = if chunk.type_code == TYPE_STRUCT_MARKER { 2 } else { 0 };
            let data = chunk.bytes.get(skip..).unwrap_or(&[]);
            let advanced = data.len() / element;
            if advanced == 0 {
                warn!(tag = name, offset = got, "chunked read made no progress");
                break;
            }
            tag_value.bytes.extend_from_slice(data);
            got += advanced;
        }
        tag_value.element_count = got.min(u16::MAX as usize) as u16;
        self.fix_struct_type(&mut tag_value);
        Ok(tag_value)
    }

    // ReadTagFragmented with a growing byte offset. The first reply
    // carries the type code (and structure handle); later replies carry
    // only bytes. Partial transfer keeps the loop going until success or
    // the expected size is reached.
    fn read_fragmented(
        &mut self,
        name: &str,
        count: u16,
        expected: Option<usize>,
    ) -> Result<TagValue, Error> {
        let path = match EPath::parse_tag(name) {
            Ok(path) => path,
            Err(e) => return Ok(TagValue::failed(name, e.to_string())),
        };
        let mut acc: Vec<u8> = Vec::new();
        let mut wire_type: Option<u16> = None;
        let mut handle_len = 0usize;
        loop {
            let offset = acc.len().saturating_sub(handle_len) as u32;
            let mut data = vec![0u8; 6];
            LittleEndian::write_u16(&mut data[..2], count);
            LittleEndian::write_u32(&mut data[2..], offset);
            let request = Request::with_data(SVC_READ_TAG_FRAGMENTED, path.clone(), data);
            let reply = self.send(&request)?;
            if !reply.is_ok_or_partial() {
                return Ok(TagValue::failed(name, reply.status_error().to_string()));
            }
            let payload: &[u8] = match wire_type {
                None => {
                    if reply.data.len() < 2 {
                        return Ok(TagValue::failed(
                            name,
                            "fragmented reply shorter than its type code".to_string(),
                        ));
                    }
                    let t = LittleEndian::read_u16(&reply.data[..2]);
                    wire_type = Some(t);
                    if t == TYPE_STRUCT_MARKER {
                        handle_len = 2;
                    }
                    &reply.data[2..]
                }
                Some(_) => &reply.data,
            };
            if payload.is_empty() && reply.status == STATUS_PARTIAL_TRANSFER {
                return Ok(TagValue::failed(
                    name,
                    "fragmented read made no progress".to_string(),
                ));
            }
            acc.extend_from_slice(payload);
            if reply.status == STATUS_OK {
                break;
            }
            if let Some(total) = expected {
                if acc.len() >= total {
                    break;
                }
            }
        }
        let mut tag_value = TagValue {
            name: name.to_string(),
            type_code: wire_type.unwrap_or(0),
            bytes: acc,
            element_count: count,
            error: None,
        };
        self.fix_struct_type(&mut tag_value);
        Ok(tag_value)
    }

    // Some controllers disallow direct reads of certain UDTs; expand the
    // structure into its atomic leaves and batch those instead. Leaf
    // results carry the dotted path Parent.Child.Leaf.
    fn read_expanded(&mut self, name: &str, info: &TagInfo) -> Result<Vec<TagValue>, Error> {
        let mut leaves: Vec<(String, u16, u16)> = Vec::new();
        if let Err(e) = template::leaf_paths(&self.templates, info.template_id(), name, &mut leaves)
        {
            return Ok(vec![TagValue::failed(name, e.to_string())]);
        }
        if leaves.is_empty() {
            return Ok(vec![TagValue::failed(
                name,
                "template has no readable members".to_string(),
            )]);
        }

        let limit = self.batch_limit();
        let mut out = Vec::with_capacity(leaves.len());
        for chunk in leaves.chunks(limit) {
            let mut requests = Vec::with_capacity(chunk.len());
            for (path, _, count) in chunk {
                // leaf paths come from template member names, always valid
                let epath = match EPath::parse_tag(path) {
                    Ok(epath) => epath,
                    Err(e) => {
                        out.push(TagValue::failed(path, e.to_string()));
                        continue;
                    }
                };
                requests.push((path.clone(), read_tag_request(epath, *count), *count));
            }
            let msp =
                cip::multiple_service(&requests.iter().map(|(_, r, _)| r.clone()).collect::<Vec<_>>());
            let reply = self.send(&msp)?;
            if reply.status != STATUS_OK && reply.status != STATUS_EMBEDDED_SERVICE_ERROR {
                let message = reply.status_error().to_string();
                for (path, _, _) in &requests {
                    out.push(TagValue::failed(path, message.clone()));
                }
                continue;
            }
            let embedded = cip::split_multiple(&reply.data)?;
            for ((path, _, count), service_reply) in requests.iter().zip(embedded) {
                out.push(if service_reply.is_ok_or_partial() {
                    parse_read_data(path, &service_reply.data, *count)
                } else {
                    TagValue::failed(path, service_reply.status_error().to_string())
                });
            }
        }
        Ok(out)
    }

    // Replace the wire structure marker with the discovered type code so
    // decoding can find the template.
    fn fix_struct_type(&self, tag_value: &mut TagValue) {
        if tag_value.type_code != TYPE_STRUCT_MARKER {
            return;
        }
        if let Some(info) = self.symbols.get(&tag_value.name) {
            if info.is_struct() {
                tag_value.type_code = info.type_code;
            }
        }
    }

    /// Decode a read result against this session's template cache.
    pub fn decode(&self, tag_value: &TagValue) -> Result<PlcValue, Error> {
        tag_value.decode(&self.templates)
    }

    // ---------- writes ----------

    /// Write a value. The target type comes from a template member lookup
    /// for dotted UDT paths, else the discovered type code, else inference
    /// from the supplied value.
    pub fn write(&mut self, name: &str, value: PlcValue) -> Result<(), Error> {
        let target = self.write_type(name, &value)?;
        let encoded = value::coerce(&value, target)?;
        let element_count = match &value {
            PlcValue::Array(items) => items.len() as u16,
            _ => 1,
        };

        let path = EPath::parse_tag(name)?;
        let mut data = vec![0u8; 4];
        LittleEndian::write_u16(&mut data[..2], target);
        LittleEndian::write_u16(&mut data[2..4], element_count);
        data.extend_from_slice(&encoded);

        let reply = self.send(&Request::with_data(SVC_WRITE_TAG, path, data))?;
        if reply.status != STATUS_OK {
            return Err(reply.status_error());
        }
        debug!(tag = name, type_code = target, elements = element_count, "wrote tag");
        Ok(())
    }

    fn write_type(&mut self, name: &str, value: &PlcValue) -> Result<u16, Error> {
        if let Some(member) = self.member_type(name)? {
            return Ok(member);
        }
        if let Some(info) = self.symbols.get(&strip_indices(name)) {
            if !info.is_struct() {
                return Ok(base_type(info.type_code));
            }
        }
        value::infer_type(value)
    }

    // Walk a dotted path through the template tree: the longest known
    // symbol prefix is the base tag, the remaining segments are members.
    fn member_type(&mut self, name: &str) -> Result<Option<u16>, Error> {
        let segments: Vec<&str> = name.split('.').collect();
        if segments.len() < 2 {
            return Ok(None);
        }
        for split in (1..segments.len()).rev() {
            let base_key = strip_indices(&segments[..split].join("."));
            let info = match self.symbols.get(&base_key) {
                Some(info) => info.clone(),
                None => continue,
            };
            if !info.is_struct() {
                return Ok(None);
            }
            self.ensure_template(info.template_id())?;

            let mut current_id = info.template_id();
            let mut found: Option<u16> = None;
            for segment in &segments[split..] {
                let member_name = segment.split('[').next().unwrap_or(segment);
                let member_code = {
                    let parsed = self.templates.get(current_id).ok_or(Error::Template {
                        id: current_id,
                        reason: "not cached".to_string(),
                    })?;
                    match parsed
                        .members
                        .iter()
                        .find(|member| member.name == member_name)
                    {
                        Some(member) => member.type_code,
                        None => {
                            return Err(Error::InvalidInput(format!(
                                "no member {:?} in template {:?}",
                                member_name, parsed.name
                            )))
                        }
                    }
                };
                if is_struct(member_code) {
                    current_id = template_id(member_code);
                    self.ensure_template(current_id)?;
                }
                found = Some(member_code);
            }
            return match found {
                Some(code) if !is_struct(code) => Ok(Some(base_type(code))),
                Some(_) => Err(Error::InvalidInput(
                    "whole-structure member writes need an atomic leaf path".to_string(),
                )),
                None => Ok(None),
            };
        }
        Ok(None)
    }
}

fn read_tag_request(path: EPath, count: u16) -> Request {
    let mut data = vec![0u8; 2];
    LittleEndian::write_u16(&mut data, count);
    Request::with_data(SVC_READ_TAG, path, data)
}

// type_code(2) | [structure handle(2)] | payload; the handle stays at the
// head of the bytes for the decoder to strip
fn parse_read_data(name: &str, data: &[u8], element_count: u16) -> TagValue {
    if data.len() < 2 {
        return TagValue::failed(name, "read reply shorter than its type code".to_string());
    }
    TagValue {
        name: name.to_string(),
        type_code: LittleEndian::read_u16(&data[..2]),
        bytes: data[2..].to_vec(),
        element_count,
        error: None,
    }
}

// "Udts[3].Member" -> "Udts.Member", the symbol table key
fn strip_indices(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_index = false;
    for c in name.chars() {
        match c {
            '[' => in_index = true,
            ']' => in_index = false,
            _ if !in_index => out.push(c),
            _ => {}
        }
    }
    out
}

/// ListIdentity over UDP broadcast; replies are collected until the
/// timeout elapses and returned in arrival order.
pub fn discover(broadcast: Ipv4Addr, timeout: Duration) -> Result<Vec<Identity>, Error> {
    eip::list_identity_udp(broadcast, timeout)
}

/// Discovery against the directed broadcast address of a CIDR subnet.
pub fn discover_subnet(cidr: &str, timeout: Duration) -> Result<Vec<Identity>, Error> {
    eip::list_identity_udp(subnet_broadcast(cidr)?, timeout)
}

fn subnet_broadcast(cidr: &str) -> Result<Ipv4Addr, Error> {
    let mut parts = cidr.splitn(2, '/');
    let address = parts
        .next()
        .unwrap_or("")
        .parse::<Ipv4Addr>()
        .map_err(|e| Error::InvalidInput(format!("bad CIDR address {:?}: {}", cidr, e)))?;
    let prefix = parts
        .next()
        .ok_or_else(|| Error::InvalidInput(format!("CIDR {:?} missing prefix length", cidr)))?
        .parse::<u32>()
        .map_err(|e| Error::InvalidInput(format!("bad CIDR prefix in {:?}: {}", cidr, e)))?;
    if prefix > 32 {
        return Err(Error::InvalidInput(format!(
            "CIDR prefix /{} out of range",
            prefix
        )));
    }
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    Ok(Ipv4Addr::from(u32::from(address) | !mask))
}
