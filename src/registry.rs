// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The process-wide table that hands out the opaque integer `TagId` the
//! external interface is built around, and lets `client.rs` go from that
//! id back to the `Arc<TagInner>` it names.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use super::error::Error;
use super::tag::TagInner;

static NEXT_ID: AtomicI32 = AtomicI32::new(1);

fn table() -> &'static Mutex<HashMap<i32, Arc<TagInner>>> {
    static TABLE: OnceCell<Mutex<HashMap<i32, Arc<TagInner>>>> = OnceCell::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// allocates a fresh id and files `tag` under it. `tag.id` must already be
/// set to the id this call will use; see `client::create`.
pub(crate) fn insert(tag: Arc<TagInner>) -> Result<i32, Error> {
    let id = tag.id;
    table().lock().map_err(|_| Error::Lock)?.insert(id, tag);
    Ok(id)
}

/// reserves the next id without inserting anything, so a `TagInner` can be
/// built with its final id already baked in (`status()`/logging reads it).
pub(crate) fn reserve_id() -> i32 {
    loop {
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        if id > 0 {
            return id;
        }
    }
}

pub(crate) fn get(id: i32) -> Result<Arc<TagInner>, Error> {
    table()
        .lock()
        .map_err(|_| Error::Lock)?
        .get(&id)
        .cloned()
        .ok_or(Error::NullPtr)
}

pub(crate) fn remove(id: i32) -> Result<(), Error> {
    table().lock().map_err(|_| Error::Lock)?.remove(&id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::session::Session;

    #[test]
    fn insert_get_remove_round_trip() {
        let id = reserve_id();
        let session = Session::test_stub();
        let tag = TagInner::new(id, session, Dialect::Plc5Slc, vec![4, b'N', b'7', b':', b'0', 0], [0, 0], 2, 1, 0).unwrap();
        insert(tag).unwrap();

        assert!(get(id).is_ok());
        remove(id).unwrap();
        assert!(matches!(get(id).unwrap_err(), Error::NullPtr));
    }

    #[test]
    fn get_unknown_id_errors() {
        assert!(matches!(get(i32::MAX).unwrap_err(), Error::NullPtr));
    }
}
