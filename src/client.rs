// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The external interface: opaque `TagId` handles over `create`/`destroy`/
//! `read`/`write`/`get_*`/`set_*`/`lock`/`unlock`, backed by one `Session`
//! per gateway shared across every tag that names it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use once_cell::sync::OnceCell;

use super::constant::EIP_PORT;
use super::dialect::Dialect;
use super::error::Error;
use super::path::{encode_pccc_name, TagPath};
use super::registry;
use super::session::Session;
use super::tag::TagInner;

/// opaque handle a caller holds for the lifetime of one tag, matching the
/// original driver's `int32_t` tag handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagId(i32);

fn session_cache() -> &'static Mutex<HashMap<String, Weak<Session>>> {
    static CACHE: OnceCell<Mutex<HashMap<String, Weak<Session>>>> = OnceCell::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn session_for(gateway: &str, timeout: Duration) -> Result<Arc<Session>, Error> {
    let mut cache = session_cache().lock().map_err(|_| Error::Lock)?;
    if let Some(existing) = cache.get(gateway).and_then(Weak::upgrade) {
        if existing.status() >= 0 {
            return Ok(existing);
        }
    }

    let session = Session::connect(gateway, EIP_PORT, timeout)?;
    cache.insert(gateway.to_string(), Arc::downgrade(&session));
    Ok(session)
}

/// Parses an attribute string, opens (or reuses) the gateway's session, and
/// returns a new tag handle. See `path::TagPath` for the attribute grammar.
pub fn create(attr_str: &str, timeout: Duration) -> Result<TagId, Error> {
    let path = TagPath::parse(attr_str)?;
    let dialect = Dialect::from_cpu(path.cpu);
    let encoded_name = encode_pccc_name(&path.name)?;

    // validated before the session is opened, so a tag whose size can
    // never fit a PCCC packet fails fast without touching the network.
    super::tag::check_packet_budget(path.elem_size, path.elem_count, encoded_name.len())?;

    let session = session_for(&path.gateway, timeout)?;
    let id = registry::reserve_id();
    let tag = TagInner::new(
        id,
        session,
        dialect,
        encoded_name,
        path.conn_path,
        path.elem_size,
        path.elem_count,
        path.read_cache_ms,
    )?;
    registry::insert(tag)?;
    Ok(TagId(id))
}

pub fn destroy(id: TagId) -> Result<(), Error> {
    registry::remove(id.0)
}

pub fn status(id: TagId) -> Result<i32, Error> {
    Ok(registry::get(id.0)?.status())
}

pub fn read(id: TagId, timeout: Duration) -> Result<(), Error> {
    registry::get(id.0)?.read(timeout)
}

pub fn write(id: TagId, timeout: Duration) -> Result<(), Error> {
    registry::get(id.0)?.write(timeout)
}

pub fn lock(id: TagId) -> Result<(), Error> {
    registry::get(id.0)?.lock();
    Ok(())
}

pub fn unlock(id: TagId) -> Result<(), Error> {
    registry::get(id.0)?.unlock()
}

pub fn size(id: TagId) -> Result<usize, Error> {
    Ok(registry::get(id.0)?.size())
}

pub fn decode_error(rc: i32) -> &'static str {
    super::error::decode_error(rc)
}

macro_rules! getter {
    ($name:ident, $ty:ty, $width:expr, $read:path) => {
        pub fn $name(id: TagId, offset: usize) -> Result<$ty, Error> {
            let tag = registry::get(id.0)?;
            let bytes = tag.get_bytes(offset, $width)?;
            Ok($read(&bytes))
        }
    };
}

macro_rules! setter {
    ($name:ident, $ty:ty, $width:expr, $write:path) => {
        pub fn $name(id: TagId, offset: usize, value: $ty) -> Result<(), Error> {
            let tag = registry::get(id.0)?;
            let mut bytes = [0u8; $width];
            $write(&mut bytes, value);
            tag.set_bytes(offset, &bytes)
        }
    };
}

getter!(get_uint16, u16, 2, LittleEndian::read_u16);
getter!(get_uint32, u32, 4, LittleEndian::read_u32);
getter!(get_uint64, u64, 8, LittleEndian::read_u64);
getter!(get_int16, i16, 2, LittleEndian::read_i16);
getter!(get_int32, i32, 4, LittleEndian::read_i32);
getter!(get_int64, i64, 8, LittleEndian::read_i64);
getter!(get_float32, f32, 4, LittleEndian::read_f32);
getter!(get_float64, f64, 8, LittleEndian::read_f64);

setter!(set_uint16, u16, 2, LittleEndian::write_u16);
setter!(set_uint32, u32, 4, LittleEndian::write_u32);
setter!(set_uint64, u64, 8, LittleEndian::write_u64);
setter!(set_int16, i16, 2, LittleEndian::write_i16);
setter!(set_int32, i32, 4, LittleEndian::write_i32);
setter!(set_int64, i64, 8, LittleEndian::write_i64);
setter!(set_float32, f32, 4, LittleEndian::write_f32);
setter!(set_float64, f64, 8, LittleEndian::write_f64);

pub fn get_uint8(id: TagId, offset: usize) -> Result<u8, Error> {
    let tag = registry::get(id.0)?;
    Ok(tag.get_bytes(offset, 1)?[0])
}

pub fn get_int8(id: TagId, offset: usize) -> Result<i8, Error> {
    Ok(get_uint8(id, offset)? as i8)
}

pub fn set_uint8(id: TagId, offset: usize, value: u8) -> Result<(), Error> {
    let tag = registry::get(id.0)?;
    tag.set_bytes(offset, &[value])
}

pub fn set_int8(id: TagId, offset: usize, value: i8) -> Result<(), Error> {
    set_uint8(id, offset, value as u8)
}
