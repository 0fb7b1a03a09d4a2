//! End-to-end tests against a small hand-rolled EIP/PCCC server: register
//! session, then typed read/write requests for both the direct (PLC-5/SLC)
//! and Unconnected-Send-wrapped (ControlLogix) dialects.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use ab_eip_pccc::client;

const ENCAP_HEADER_SIZE: usize = 24;
const CPF_PREFIX_SIZE: usize = 16; // interface_handle + router_timeout + item_count + NAI hdr + UDI hdr

fn write_u16(buf: &mut [u8], v: u16) {
    buf[0] = (v & 0xFF) as u8;
    buf[1] = (v >> 8) as u8;
}

fn write_u32(buf: &mut [u8], v: u32) {
    buf[0] = (v & 0xFF) as u8;
    buf[1] = ((v >> 8) & 0xFF) as u8;
    buf[2] = ((v >> 16) & 0xFF) as u8;
    buf[3] = ((v >> 24) & 0xFF) as u8;
}

fn read_u16(buf: &[u8]) -> u16 {
    buf[0] as u16 | ((buf[1] as u16) << 8)
}

fn encap_header(command: u16, length: u16, session_handle: u32) -> Vec<u8> {
    let mut out = vec![0u8; ENCAP_HEADER_SIZE];
    write_u16(&mut out[0..2], command);
    write_u16(&mut out[2..4], length);
    write_u32(&mut out[4..8], session_handle);
    out
}

fn register_session_response(session_handle: u32) -> Vec<u8> {
    let mut out = encap_header(0x0065, 4, session_handle);
    out.extend_from_slice(&[1, 0, 0, 0]); // protocol version, options
    out
}

/// wraps a CIP payload in the standard EIP + unconnected CPF framing this
/// crate's own `pccc::wrap_encap` produces.
fn wrap_encap(command: u16, session_handle: u32, cip_payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[0u8; 4]); // interface_handle
    body.extend_from_slice(&[1, 0]); // router_timeout
    body.extend_from_slice(&[2, 0]); // item_count
    body.extend_from_slice(&[0, 0, 0, 0]); // NAI item, zero length
    let mut udi_hdr = [0u8; 4];
    write_u16(&mut udi_hdr[0..2], 0x00B2);
    write_u16(&mut udi_hdr[2..4], cip_payload.len() as u16);
    body.extend_from_slice(&udi_hdr);
    body.extend_from_slice(cip_payload);

    let mut out = encap_header(command, body.len() as u16, session_handle);
    out.extend_from_slice(&body);
    out
}

fn encode_dt_byte(out: &mut Vec<u8>, data_type: u8, data_size: u8) {
    out.push((data_type << 4) | data_size);
}

fn build_read_reply(session_handle: u32, seq: u16, elem_size: usize, data: &[u8]) -> Vec<u8> {
    let mut cip = Vec::new();
    cip.push(0xCB); // reply service
    cip.push(0); // reserved
    cip.push(0); // general status OK
    cip.push(0); // extended status words
    cip.push(0); // pccc status OK
    let mut seqb = [0u8; 2];
    write_u16(&mut seqb, seq);
    cip.extend_from_slice(&seqb);
    let data_type = if elem_size == 4 { 0x0A } else { 0x08 };
    encode_dt_byte(&mut cip, data_type, elem_size as u8);
    cip.extend_from_slice(data);
    wrap_encap(0x006F, session_handle, &cip)
}

fn build_write_reply(session_handle: u32, seq: u16) -> Vec<u8> {
    let mut cip = Vec::new();
    cip.push(0xCD);
    cip.push(0);
    cip.push(0);
    cip.push(0);
    cip.push(0);
    let mut seqb = [0u8; 2];
    write_u16(&mut seqb, seq);
    cip.extend_from_slice(&seqb);
    wrap_encap(0x006F, session_handle, &cip)
}

fn build_nak_reply(session_handle: u32, seq: u16, pccc_status: u8) -> Vec<u8> {
    let mut cip = Vec::new();
    cip.push(0xCB);
    cip.push(0);
    cip.push(0);
    cip.push(0);
    cip.push(pccc_status);
    let mut seqb = [0u8; 2];
    write_u16(&mut seqb, seq);
    cip.extend_from_slice(&seqb);
    wrap_encap(0x006F, session_handle, &cip)
}

/// locates the PCCC Execute command within a captured request packet and
/// returns `(function_byte, seq_id)`. Handles both the direct and the
/// Unconnected-Send-wrapped dialects, whose CIP payloads this crate's own
/// `pccc::wrap_encap`/`build_pccc_execute` lay out at fixed offsets.
fn find_pccc_request(raw: &[u8]) -> (u8, u16) {
    let cip_off = ENCAP_HEADER_SIZE + CPF_PREFIX_SIZE;
    let pccc_off = if raw[cip_off] == 0x52 {
        cip_off + 10 // past the Unconnected Send's fixed CM wrapper fields
    } else {
        cip_off
    };
    let function = raw[pccc_off + 17];
    let seq = read_u16(&raw[pccc_off + 15..pccc_off + 17]);
    (function, seq)
}

fn read_one_packet(stream: &mut TcpStream) -> Vec<u8> {
    let mut hdr = [0u8; ENCAP_HEADER_SIZE];
    stream.read_exact(&mut hdr).expect("read encap header");
    let len = read_u16(&hdr[2..4]) as usize;
    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).expect("read encap payload");
    }
    let mut out = hdr.to_vec();
    out.extend_from_slice(&payload);
    out
}

/// Spawns a mock PLC that handles the register-session handshake and then
/// calls `responder` once per subsequent request, writing back whatever
/// bytes it returns. Returns the bound address.
fn spawn_mock_plc<F>(mut responder: F) -> std::net::SocketAddr
where
    F: FnMut(u8, u16) -> Vec<u8> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let (mut stream, _) = match listener.accept() {
            Ok(s) => s,
            Err(_) => return,
        };
        stream.set_nodelay(true).ok();

        let _register = read_one_packet(&mut stream);
        stream
            .write_all(&register_session_response(0xCAFEBABE))
            .ok();

        loop {
            let mut hdr_probe = [0u8; 1];
            match stream.read(&mut hdr_probe) {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let mut rest = vec![0u8; ENCAP_HEADER_SIZE - 1];
            if stream.read_exact(&mut rest).is_err() {
                return;
            }
            let mut hdr = hdr_probe.to_vec();
            hdr.extend_from_slice(&rest);
            let len = read_u16(&hdr[2..4]) as usize;
            let mut payload = vec![0u8; len];
            if len > 0 && stream.read_exact(&mut payload).is_err() {
                return;
            }
            let mut raw = hdr;
            raw.extend_from_slice(&payload);

            let (function, seq) = find_pccc_request(&raw);
            let reply = responder(function, seq);
            if stream.write_all(&reply).is_err() {
                return;
            }
        }
    });

    addr
}

fn attr_str(addr: std::net::SocketAddr, cpu: &str, path: &str, elem_size: usize, name: &str) -> String {
    format!(
        "protocol=ab_eip&gateway={}&path={}&cpu={}&elem_size={}&elem_count=1&name={}",
        addr, path, cpu, elem_size, name
    )
}

/// tests run in the same binary in parallel, so this must tolerate being
/// called more than once.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn reads_int_from_plc5_dialect() {
    init_logging();
    let addr = spawn_mock_plc(|function, seq| {
        assert_eq!(function, 0x68);
        build_read_reply(0xCAFEBABE, seq, 2, &[0x34, 0x12])
    });

    let tag = client::create(
        &attr_str(addr, "PLC5", "1,0", 2, "N7:0"),
        Duration::from_secs(2),
    )
    .unwrap();
    client::read(tag, Duration::from_secs(2)).unwrap();
    assert_eq!(client::get_int16(tag, 0).unwrap(), 0x1234);
    client::destroy(tag).unwrap();
}

#[test]
fn reads_real_from_lgx_dialect() {
    init_logging();
    let addr = spawn_mock_plc(|function, seq| {
        assert_eq!(function, 0x68);
        build_read_reply(0xCAFEBABE, seq, 4, &[0x00, 0x00, 0x80, 0x3F]) // 1.0f32 LE
    });

    let tag = client::create(
        &attr_str(addr, "LGX", "1,0", 4, "F8:3"),
        Duration::from_secs(2),
    )
    .unwrap();
    client::read(tag, Duration::from_secs(2)).unwrap();
    assert!((client::get_float32(tag, 0).unwrap() - 1.0).abs() < f32::EPSILON);
    client::destroy(tag).unwrap();
}

#[test]
fn write_then_read_round_trips_through_buffer() {
    init_logging();
    let addr = spawn_mock_plc(|function, seq| {
        if function == 0xAA {
            build_write_reply(0xCAFEBABE, seq)
        } else {
            build_read_reply(0xCAFEBABE, seq, 2, &[0x2A, 0x00])
        }
    });

    let tag = client::create(
        &attr_str(addr, "SLC", "1,0", 2, "N7:1"),
        Duration::from_secs(2),
    )
    .unwrap();

    client::set_int16(tag, 0, 42).unwrap();
    client::write(tag, Duration::from_secs(2)).unwrap();

    client::read(tag, Duration::from_secs(2)).unwrap();
    assert_eq!(client::get_int16(tag, 0).unwrap(), 42);
    client::destroy(tag).unwrap();
}

#[test]
fn second_read_within_cache_window_skips_the_wire() {
    init_logging();
    let hits = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let hits_cb = hits.clone();
    let addr = spawn_mock_plc(move |_function, seq| {
        hits_cb.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        build_read_reply(0xCAFEBABE, seq, 2, &[0x01, 0x00])
    });

    let attrs = format!(
        "{}&read_cache_ms=5000",
        attr_str(addr, "SLC", "1,0", 2, "N7:2")
    );
    let tag = client::create(&attrs, Duration::from_secs(2)).unwrap();

    client::read(tag, Duration::from_secs(2)).unwrap();
    client::read(tag, Duration::from_secs(2)).unwrap();
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    client::destroy(tag).unwrap();
}

#[test]
fn oversized_tag_is_rejected_at_create() {
    init_logging();
    let err = client::create(
        "protocol=ab_eip&gateway=127.0.0.1:1&cpu=SLC&elem_size=2&elem_count=1000&name=N7:0",
        Duration::from_millis(100),
    )
    .unwrap_err();
    assert_eq!(err.code(), ab_eip_pccc::error::Error::TooLarge.code());
}

#[test]
fn pccc_nak_surfaces_as_remote_err() {
    init_logging();
    let addr = spawn_mock_plc(|_function, seq| build_nak_reply(0xCAFEBABE, seq, 0x10));

    let tag = client::create(
        &attr_str(addr, "SLC", "1,0", 2, "N7:3"),
        Duration::from_secs(2),
    )
    .unwrap();

    let err = client::read(tag, Duration::from_secs(2)).unwrap_err();
    assert!(matches!(err, ab_eip_pccc::error::Error::RemoteErr { code: 0x10 }));
    client::destroy(tag).unwrap();
}

#[test]
fn many_threads_reading_one_cached_tag_stay_consistent() {
    init_logging();
    let addr = spawn_mock_plc(|_function, seq| build_read_reply(0xCAFEBABE, seq, 2, &[0x07, 0x00]));

    let attrs = format!(
        "{}&read_cache_ms=2000",
        attr_str(addr, "SLC", "1,0", 2, "N7:4")
    );
    let tag = client::create(&attrs, Duration::from_secs(2)).unwrap();
    client::read(tag, Duration::from_secs(2)).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            thread::spawn(move || {
                client::read(tag, Duration::from_secs(2)).unwrap();
                client::get_int16(tag, 0).unwrap()
            })
        })
        .collect();

    for h in handles {
        assert_eq!(h.join().unwrap(), 7);
    }
    client::destroy(tag).unwrap();
}
