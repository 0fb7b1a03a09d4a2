// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! One TCP connection to a PLC gateway: the Register Session handshake, the
//! FIFO of in-flight requests, the sequence id source, and the background
//! tickler thread that drives socket I/O so callers never block on the
//! network inside a library call they didn't ask to block on.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace, warn};

use super::codec::{EncapHeader, ENCAP_HEADER_SIZE};
use super::constant::{AB_EIP_OK, AB_EIP_REGISTER_SESSION, MAX_PCCC_PACKET_SIZE};
use super::error::{Error, STATUS_OK, STATUS_PENDING};
use super::request::Request;

/// how often the tickler wakes up to check for new work, timeouts, and
/// the read socket, when nothing is already pending.
const TICKLE_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Registering,
    Ready,
    Broken,
}

pub struct Session {
    gateway: String,
    stream: Mutex<TcpStream>,
    session_handle: AtomicU32,
    seq_id: AtomicU16,
    /// STATUS_OK, STATUS_PENDING, or a negative `Error::code()`
    status: Mutex<i32>,
    lifecycle: Mutex<Lifecycle>,
    requests: Mutex<VecDeque<Request>>,
    in_flight: Mutex<Option<Request>>,
}

impl Session {
    /// Connects to `gateway:44818`, performs the Register Session
    /// handshake, and spawns the tickler thread.
    pub fn connect(gateway: &str, port: u16, timeout: Duration) -> Result<Arc<Session>, Error> {
        let addr = format!("{}:{}", gateway, port);
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(Error::from)?
            .next()
            .ok_or_else(|| Error::InvalidPath(format!("could not resolve {}", addr)))?;

        debug!("session: connecting to {}", socket_addr);
        let stream = TcpStream::connect_timeout(&socket_addr, timeout)?;
        stream.set_read_timeout(Some(TICKLE_INTERVAL))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true).ok();

        let session = Arc::new(Session {
            gateway: gateway.to_string(),
            stream: Mutex::new(stream),
            session_handle: AtomicU32::new(0),
            seq_id: AtomicU16::new(1),
            status: Mutex::new(STATUS_PENDING),
            lifecycle: Mutex::new(Lifecycle::Registering),
            requests: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(None),
        });

        session.register(timeout)?;

        let tickler_session = Arc::downgrade(&session);
        thread::spawn(move || Session::tickle_loop(tickler_session));

        Ok(session)
    }

    fn register(&self, timeout: Duration) -> Result<(), Error> {
        let mut buf = vec![0u8; ENCAP_HEADER_SIZE + 4];
        let hdr = EncapHeader::new(AB_EIP_REGISTER_SESSION, 4, 0, [0u8; 8]);
        hdr.write_to(&mut buf[..ENCAP_HEADER_SIZE]);
        LittleEndian::write_u16(&mut buf[ENCAP_HEADER_SIZE..ENCAP_HEADER_SIZE + 2], 1); // protocol version
        LittleEndian::write_u16(&mut buf[ENCAP_HEADER_SIZE + 2..], 0); // option flags

        let mut stream = self.stream.lock().map_err(|_| Error::Lock)?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.write_all(&buf)?;

        let mut resp_hdr = [0u8; ENCAP_HEADER_SIZE];
        stream.read_exact(&mut resp_hdr)?;
        let hdr = EncapHeader::read_from(&resp_hdr)
            .ok_or_else(|| Error::BadData("short register-session reply".to_string()))?;

        if hdr.command != AB_EIP_REGISTER_SESSION {
            return Err(Error::BadData(format!(
                "unexpected reply command {:#06x} to register session",
                hdr.command
            )));
        }
        if hdr.status != AB_EIP_OK {
            return Err(Error::RemoteErr {
                code: hdr.status as i32,
            });
        }

        let mut rest = vec![0u8; hdr.length as usize];
        if !rest.is_empty() {
            stream.read_exact(&mut rest)?;
        }

        stream.set_read_timeout(Some(TICKLE_INTERVAL))?;

        self.session_handle
            .store(hdr.session_handle, Ordering::SeqCst);
        *self.lifecycle.lock().map_err(|_| Error::Lock)? = Lifecycle::Ready;
        *self.status.lock().map_err(|_| Error::Lock)? = STATUS_OK;
        debug!(
            "session: registered with {} as handle {:#010x}",
            self.gateway, hdr.session_handle
        );
        Ok(())
    }

    pub fn session_handle(&self) -> u32 {
        self.session_handle.load(Ordering::SeqCst)
    }

    /// atomically returns the next u16 sequence id, wrapping on overflow.
    pub fn next_seq_id(&self) -> u16 {
        // 0 is never issued so a freshly-zeroed `conn_seq` reads as "unset".
        loop {
            let prev = self.seq_id.fetch_add(1, Ordering::SeqCst);
            let id = prev.wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }

    pub fn status(&self) -> i32 {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn gateway(&self) -> &str {
        &self.gateway
    }

    /// pushes a ready-to-send request onto the FIFO.
    pub fn add_request(&self, req: Request) -> Result<(), Error> {
        if self.status() < 0 {
            return Err(Error::Create);
        }
        let mut q = self.requests.lock().map_err(|_| Error::Lock)?;
        q.push_back(req);
        Ok(())
    }

    fn set_broken(&self, err: Error) {
        warn!("session {}: marking broken: {}", self.gateway, err);
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = err.code();
        *self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()) = Lifecycle::Broken;
    }

    /// runs until the last strong `Arc<Session>` (held by tags and the
    /// session cache) goes away, at which point `upgrade` fails and the
    /// thread exits, letting the `Session` itself drop.
    fn tickle_loop(weak: Weak<Session>) {
        loop {
            let session = match weak.upgrade() {
                Some(s) => s,
                None => return,
            };
            if let Err(e) = session.tickle_once() {
                session.set_broken(e);
                return;
            }
            thread::sleep(TICKLE_INTERVAL);
        }
    }

    /// one pass: send a queued request if nothing is in flight, then try a
    /// non-blocking-ish read (bounded by the socket's short read timeout).
    fn tickle_once(&self) -> Result<(), Error> {
        {
            let mut in_flight = self.in_flight.lock().map_err(|_| Error::Lock)?;
            if in_flight.is_none() {
                let mut q = self.requests.lock().map_err(|_| Error::Lock)?;
                if let Some(req) = q.pop_front() {
                    drop(q);
                    self.send_request(&req)?;
                    *in_flight = Some(req);
                }
            }
        }

        self.try_receive()?;
        self.check_timeout()?;
        Ok(())
    }

    fn send_request(&self, req: &Request) -> Result<(), Error> {
        let mut state = req.lock().map_err(|_| Error::Lock)?;
        let mut stream = self.stream.lock().map_err(|_| Error::Lock)?;
        trace!("session {}: sending {} bytes", self.gateway, state.request_size);
        stream.write_all(&state.data[..state.request_size])?;
        state.send_request = false;
        state.sent_at = Some(std::time::Instant::now());
        Ok(())
    }

    fn try_receive(&self) -> Result<(), Error> {
        let mut stream = self.stream.lock().map_err(|_| Error::Lock)?;
        let mut hdr_buf = [0u8; ENCAP_HEADER_SIZE];

        match stream.read(&mut hdr_buf[..1]) {
            Ok(0) => return Err(Error::Io(std::io::ErrorKind::ConnectionReset)),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        stream.read_exact(&mut hdr_buf[1..])?;

        let hdr = EncapHeader::read_from(&hdr_buf)
            .ok_or_else(|| Error::BadData("short encap header".to_string()))?;

        let mut payload = vec![0u8; hdr.length as usize];
        if !payload.is_empty() {
            stream.read_exact(&mut payload)?;
        }
        drop(stream);

        let mut in_flight = self.in_flight.lock().map_err(|_| Error::Lock)?;
        let req = match in_flight.take() {
            Some(r) => r,
            None => {
                warn!("session {}: reply with nothing in flight, discarding", self.gateway);
                return Ok(());
            }
        };

        {
            let mut state = req.lock().map_err(|_| Error::Lock)?;
            let total = ENCAP_HEADER_SIZE + payload.len();
            if state.data.len() < total {
                state.data.resize(total, 0);
            }
            hdr.write_to(&mut state.data[..ENCAP_HEADER_SIZE]);
            state.data[ENCAP_HEADER_SIZE..total].copy_from_slice(&payload);
            state.resp_received = true;
        }
        Ok(())
    }

    /// retries a timed-out in-flight request, or fails it once retries are
    /// exhausted so the caller's response checker can surface `ERR_TIMEOUT`.
    fn check_timeout(&self) -> Result<(), Error> {
        let mut in_flight = self.in_flight.lock().map_err(|_| Error::Lock)?;
        let req = match in_flight.as_ref() {
            Some(r) => Arc::clone(r),
            None => return Ok(()),
        };

        let timed_out = {
            let state = req.lock().map_err(|_| Error::Lock)?;
            !state.resp_received
                && state
                    .sent_at
                    .map(|t| t.elapsed() >= state.retry_interval)
                    .unwrap_or(false)
        };

        if !timed_out {
            return Ok(());
        }

        let should_retry = {
            let mut state = req.lock().map_err(|_| Error::Lock)?;
            if state.num_retries_left > 0 {
                state.num_retries_left -= 1;
                true
            } else {
                false
            }
        };

        if should_retry {
            drop(in_flight);
            warn!("session {}: retrying timed-out request", self.gateway);
            self.send_request(&req)?;
        } else {
            let mut state = req.lock().map_err(|_| Error::Lock)?;
            state.error = Some(Error::Timeout);
            state.resp_received = true;
            *in_flight = None;
        }
        Ok(())
    }

    /// cancels whatever is in flight for `req`, e.g. because the owning tag
    /// was destroyed. A reply arriving later for this slot is simply
    /// dropped since nobody still references it.
    pub fn cancel(&self, req: &Request) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if let Some(current) = in_flight.as_ref() {
                if Arc::ptr_eq(current, req) {
                    *in_flight = None;
                }
            }
        }
        if let Ok(mut q) = self.requests.lock() {
            q.retain(|r| !Arc::ptr_eq(r, req));
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("gateway", &self.gateway)
            .field("session_handle", &self.session_handle())
            .field("status", &self.status())
            .finish()
    }
}

#[allow(dead_code)]
pub(crate) fn max_packet_size() -> usize {
    MAX_PCCC_PACKET_SIZE
}

#[cfg(test)]
impl Session {
    /// a `Session` with a live loopback socket but no registered handle and
    /// no tickler thread, for unit tests that only exercise tag-level
    /// bookkeeping. The crate's protocol behavior is covered by the
    /// integration tests, which run a real mock PLC over the socket.
    pub(crate) fn test_stub() -> Arc<Session> {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        let addr = listener.local_addr().expect("local addr");
        thread::spawn(move || {
            let _ = listener.accept();
        });
        let stream = TcpStream::connect(addr).expect("connect to loopback listener");
        stream.set_read_timeout(Some(TICKLE_INTERVAL)).ok();

        Arc::new(Session {
            gateway: "test-stub".to_string(),
            stream: Mutex::new(stream),
            session_handle: AtomicU32::new(0),
            seq_id: AtomicU16::new(1),
            status: Mutex::new(STATUS_OK),
            lifecycle: Mutex::new(Lifecycle::Ready),
            requests: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(None),
        })
    }
}
