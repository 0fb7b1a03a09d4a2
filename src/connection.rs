// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! A CIP Forward-Open "class 3" connected session, layered on top of
//! `Session`. PCCC tags never set `needs_connection` (see
//! `Cpu::needs_connection`), so this type exists only so that
//! `Tag::status` has something to fold in for dialects that *do* need one;
//! it is intentionally a thin stand-in rather than a full Forward-Open
//! implementation, which is out of scope (this crate is not a general
//! CIP stack).

use std::sync::atomic::{AtomicI32, Ordering};

use super::error::STATUS_OK;

#[derive(Debug)]
pub struct Connection {
    status: AtomicI32,
}

impl Connection {
    pub fn new() -> Connection {
        Connection {
            status: AtomicI32::new(STATUS_OK),
        }
    }

    pub fn status(&self) -> i32 {
        self.status.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, status: i32) {
        self.status.store(status, Ordering::SeqCst);
    }
}

impl Default for Connection {
    fn default() -> Self {
        Connection::new()
    }
}
