// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! A client library for reading and writing named tags on Allen-Bradley
//! PLC-5, SLC, and ControlLogix processors over EtherNet/IP, using the
//! legacy PCCC command dialect rather than native CIP tag access.
//!
//! # Examples
//! ```no_run
//! use ab_eip_pccc::client;
//! use std::time::Duration;
//!
//! let tag = client::create(
//!     "protocol=ab_eip&gateway=10.17.45.37&cpu=SLC&elem_size=2&elem_count=1&name=N7:0",
//!     Duration::from_secs(5),
//! )
//! .unwrap();
//!
//! client::read(tag, Duration::from_secs(5)).unwrap();
//! let value = client::get_int16(tag, 0).unwrap();
//! println!("N7:0 = {}", value);
//! client::destroy(tag).unwrap();
//! ```

pub mod client;
mod codec;
mod connection;
mod constant;
mod dialect;
pub mod error;
mod path;
mod pccc;
mod registry;
mod request;
mod session;
mod tag;

pub use client::TagId;
