// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! A `Request` carries one outbound PCCC/EIP packet and, once the session's
//! tickler has a reply, the response bytes in the same buffer.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::constant::MAX_PCCC_PACKET_SIZE;

#[derive(Debug)]
pub struct RequestState {
    /// reused for outbound request bytes, then overwritten with the reply
    pub data: Vec<u8>,
    /// bytes of `data` that make up the request to send
    pub request_size: usize,
    /// gate the tickler checks before writing this request to the socket
    pub send_request: bool,
    /// set by the tickler once a full reply has been deposited in `data`
    pub resp_received: bool,
    pub num_retries_left: u32,
    pub retry_interval: Duration,
    /// the sequence id this request's reply must echo back
    pub conn_seq: u16,
    /// set by the tickler if the request could not be completed
    pub error: Option<crate::error::Error>,
    /// when the session last wrote this request's bytes to the socket
    pub sent_at: Option<Instant>,
}

impl RequestState {
    fn new(num_retries: u32, retry_interval: Duration) -> Self {
        RequestState {
            data: vec![0u8; MAX_PCCC_PACKET_SIZE],
            request_size: 0,
            send_request: false,
            resp_received: false,
            num_retries_left: num_retries,
            retry_interval,
            conn_seq: 0,
            error: None,
            sent_at: None,
        }
    }
}

/// Shared handle to a `RequestState`. Cloning an `Arc<Mutex<RequestState>>`
/// is the reference count `session_add_request`/`tag.reqs[0]` each hold in
/// the original design; dropping the last clone frees the buffer.
pub type Request = Arc<Mutex<RequestState>>;

pub fn new_request(num_retries: u32, retry_interval: Duration) -> Request {
    Arc::new(Mutex::new(RequestState::new(num_retries, retry_interval)))
}
