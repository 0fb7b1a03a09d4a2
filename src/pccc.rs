// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! PCCC-over-EIP request/response codec: builds the read and write
//! packets for both the direct (PLC-5/SLC) and Unconnected-Send-wrapped
//! (ControlLogix) dialects, and parses the reply into either an
//! `ERR_REMOTE_ERR`/`ERR_BAD_DATA` or the payload bytes to copy into a tag.
//!
//! The CIP response layout below (reply_service/general_status/
//! extended_status_size, then the PCCC status/seq/data) is this crate's own
//! consistent definition of the Execute-PCCC reply, since the pack this
//! crate was grounded on does not carry the header that defines the exact
//! struct libplctag uses on the wire for the reply half. It satisfies every
//! check in order: EIP command/status, CIP general status, PCCC status,
//! then the DT-byte-encoded payload.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace, warn};

use super::codec::{decode_dt_byte, encode_dt_byte, EncapHeader, ENCAP_HEADER_SIZE};
use super::constant::{
    AB_EIP_CMD_PCCC_EXECUTE, AB_EIP_CMD_UNCONNECTED_SEND, AB_EIP_ITEM_NAI, AB_EIP_ITEM_UDI,
    AB_EIP_OK, AB_EIP_PCCC_TYPED_CMD, AB_EIP_PCCC_TYPED_READ_FUNC, AB_EIP_PCCC_TYPED_WRITE_FUNC,
    AB_EIP_READ_RR_DATA, AB_EIP_SECS_PER_TICK, AB_EIP_SEND_UNIT_DATA, AB_EIP_TIMEOUT_TICKS,
    AB_EIP_VENDOR_ID, AB_EIP_VENDOR_SN, AB_PCCC_DATA_ARRAY, AB_PCCC_DATA_INT, AB_PCCC_DATA_REAL,
};
use super::dialect::Dialect;
use super::error::Error;

/// fixed bytes of the PCCC Execute reply this crate's overhead budget is
/// computed against.
const READ_RESPONSE_OVERHEAD: usize = 25;

pub(crate) fn read_overhead() -> usize {
    READ_RESPONSE_OVERHEAD
}

/// the write path's overhead is dominated by the request it sends, not the
/// (empty-bodied) reply, so it scales with the encoded tag name.
pub(crate) fn write_overhead(encoded_name_len: usize) -> usize {
    25 + encoded_name_len
}

/// Assembles the CIP "Execute PCCC" service request: service code, request
/// path to the PCCC Execute object, the PCCC ID block, and the PCCC payload
/// itself. Shared by both dialects; the caller decides whether this goes
/// directly in the CPF UDI item or gets wrapped in an Unconnected Send.
fn build_pccc_execute(seq_id: u16, function: u8, elem_count: u16, encoded_name: &[u8], tail: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + encoded_name.len() + tail.len());

    out.push(AB_EIP_CMD_PCCC_EXECUTE);
    out.push(2); // req_path_size, in words
    out.extend_from_slice(&[0x20, 0x67, 0x24, 0x01]); // class 0x67 PCCC Execute, instance 1

    out.push(7); // request_id_size, always 7
    let mut field = [0u8; 2];
    LittleEndian::write_u16(&mut field, AB_EIP_VENDOR_ID);
    out.extend_from_slice(&field);
    let mut field4 = [0u8; 4];
    LittleEndian::write_u32(&mut field4, AB_EIP_VENDOR_SN);
    out.extend_from_slice(&field4);

    out.push(AB_EIP_PCCC_TYPED_CMD);
    out.push(0); // pccc_status, always 0 in a request
    LittleEndian::write_u16(&mut field, seq_id);
    out.extend_from_slice(&field);
    out.push(function);
    LittleEndian::write_u16(&mut field, elem_count);
    out.extend_from_slice(&field);

    out.extend_from_slice(encoded_name);
    out.extend_from_slice(tail);
    out
}

/// Wraps a CIP PCCC Execute command in a Connection-Manager Unconnected
/// Send, for the ControlLogix dialect.
fn wrap_unconnected_send(embedded: &[u8], conn_path: [u8; 2]) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedded.len() + 16);

    out.push(AB_EIP_CMD_UNCONNECTED_SEND);
    out.push(2);
    out.extend_from_slice(&[0x20, 0x06, 0x24, 0x01]); // Connection Manager, instance 1
    out.push(AB_EIP_SECS_PER_TICK);
    out.push(AB_EIP_TIMEOUT_TICKS);

    let mut len_field = [0u8; 2];
    LittleEndian::write_u16(&mut len_field, embedded.len() as u16);
    out.extend_from_slice(&len_field);
    out.extend_from_slice(embedded);
    if embedded.len() % 2 != 0 {
        out.push(0); // pad
    }

    out.push(1); // route_path_size, in words
    out.push(conn_path[1]); // slot
    out.push(conn_path[0]); // backplane
    out
}

/// Wraps a CIP payload (either a bare PCCC Execute, or an Unconnected Send
/// carrying one) in the EIP encapsulation header and the CPF unconnected
/// framing.
fn wrap_encap(session_handle: u32, cip_payload: &[u8]) -> Vec<u8> {
    let mut cpf_body = Vec::with_capacity(cip_payload.len() + 12);
    let mut field = [0u8; 2];

    LittleEndian::write_u16(&mut field, 1); // router_timeout, seconds
    cpf_body.extend_from_slice(&[0u8; 4]); // interface_handle, always 0
    cpf_body.extend_from_slice(&field);
    LittleEndian::write_u16(&mut field, 2); // item_count
    cpf_body.extend_from_slice(&field);
    LittleEndian::write_u16(&mut field, AB_EIP_ITEM_NAI);
    cpf_body.extend_from_slice(&field);
    LittleEndian::write_u16(&mut field, 0); // NAI length
    cpf_body.extend_from_slice(&field);
    LittleEndian::write_u16(&mut field, AB_EIP_ITEM_UDI);
    cpf_body.extend_from_slice(&field);
    LittleEndian::write_u16(&mut field, cip_payload.len() as u16);
    cpf_body.extend_from_slice(&field);
    cpf_body.extend_from_slice(cip_payload);

    let mut out = vec![0u8; ENCAP_HEADER_SIZE];
    let hdr = EncapHeader::new(
        AB_EIP_READ_RR_DATA,
        cpf_body.len() as u16,
        session_handle,
        [0u8; 8],
    );
    hdr.write_to(&mut out);
    out.extend_from_slice(&cpf_body);
    out
}

/// Builds a complete typed-read PCCC/EIP packet, ready to hand to the
/// session for sending.
pub(crate) fn build_read_request(
    dialect: Dialect,
    session_handle: u32,
    seq_id: u16,
    encoded_name: &[u8],
    elem_count: u16,
    conn_path: [u8; 2],
) -> Vec<u8> {
    // the "duplicate" transfer size after the name is required by observed
    // PLC behavior.
    let mut dup = [0u8; 2];
    LittleEndian::write_u16(&mut dup, elem_count);

    let cmd = build_pccc_execute(seq_id, AB_EIP_PCCC_TYPED_READ_FUNC, elem_count, encoded_name, &dup);

    let cip_payload = match dialect {
        Dialect::Plc5Slc => cmd,
        Dialect::LgxPccc => wrap_unconnected_send(&cmd, conn_path),
    };

    trace!("pccc: built read request, {} cip bytes", cip_payload.len());
    wrap_encap(session_handle, &cip_payload)
}

/// Builds a complete typed-write PCCC/EIP packet. Only 2-byte INT and
/// 4-byte REAL elements are supported.
pub(crate) fn build_write_request(
    dialect: Dialect,
    session_handle: u32,
    seq_id: u16,
    encoded_name: &[u8],
    elem_size: usize,
    conn_path: [u8; 2],
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    let data_type = match elem_size {
        2 => AB_PCCC_DATA_INT,
        4 => AB_PCCC_DATA_REAL,
        other => {
            return Err(Error::NotAllowed(format!(
                "write of elem_size {} is not allowed; only 2 (INT) and 4 (REAL) are supported",
                other
            )))
        }
    };

    let mut element_def = Vec::new();
    encode_dt_byte(&mut element_def, data_type as u16, elem_size as u16);

    let mut array_def = Vec::new();
    encode_dt_byte(
        &mut array_def,
        AB_PCCC_DATA_ARRAY as u16,
        (element_def.len() + data.len()) as u16,
    );

    let mut tail = Vec::with_capacity(array_def.len() + element_def.len() + data.len());
    tail.extend_from_slice(&array_def);
    tail.extend_from_slice(&element_def);
    tail.extend_from_slice(data);

    let elem_count = (data.len() / elem_size) as u16;
    let cmd = build_pccc_execute(
        seq_id,
        AB_EIP_PCCC_TYPED_WRITE_FUNC,
        elem_count,
        encoded_name,
        &tail,
    );

    let cip_payload = match dialect {
        Dialect::Plc5Slc => cmd,
        Dialect::LgxPccc => wrap_unconnected_send(&cmd, conn_path),
    };

    trace!("pccc: built write request, {} cip bytes", cip_payload.len());
    Ok(wrap_encap(session_handle, &cip_payload))
}

/// bytes of the CIP response preamble before the PCCC-specific fields:
/// reply_service(1) + reserved(1) + general_status(1) + extended_status_size(1)
const CIP_RESPONSE_PREAMBLE: usize = 4;

fn cip_payload(raw: &[u8]) -> Result<(EncapHeader, &[u8]), Error> {
    let hdr = EncapHeader::read_from(raw)
        .ok_or_else(|| Error::BadData("short encap header in reply".to_string()))?;

    if hdr.command != AB_EIP_READ_RR_DATA && hdr.command != AB_EIP_SEND_UNIT_DATA {
        return Err(Error::BadData(format!(
            "unexpected EIP packet type received: {:#06x}",
            hdr.command
        )));
    }
    if hdr.status != AB_EIP_OK {
        return Err(Error::RemoteErr {
            code: hdr.status as i32,
        });
    }

    let body = &raw[ENCAP_HEADER_SIZE..ENCAP_HEADER_SIZE + hdr.length as usize];
    // CPF: interface_handle(4) + router_timeout(2) + item_count(2) + NAI(4) + UDI header(4)
    if body.len() < 16 {
        return Err(Error::BadData("short CPF body in reply".to_string()));
    }
    let udi_len = LittleEndian::read_u16(&body[14..16]) as usize;
    let cip = &body[16..];
    if cip.len() < udi_len {
        return Err(Error::BadData("truncated CIP payload in reply".to_string()));
    }
    Ok((hdr, &cip[..udi_len]))
}

fn check_cip_general_status(cip: &[u8]) -> Result<usize, Error> {
    if cip.len() < CIP_RESPONSE_PREAMBLE {
        return Err(Error::BadData("short CIP response preamble".to_string()));
    }
    let general_status = cip[2];
    if general_status != 0 {
        return Err(Error::RemoteErr {
            code: general_status as i32,
        });
    }
    let ext_status_words = cip[3] as usize;
    Ok(CIP_RESPONSE_PREAMBLE + ext_status_words * 2)
}

/// Parses a completed read reply and returns the bytes to copy into the
/// tag's data buffer, validating every layer of the reply in order.
pub(crate) fn check_read_response(raw: &[u8], expected_seq: u16, tag_size: usize) -> Result<Vec<u8>, Error> {
    let (_hdr, cip) = cip_payload(raw)?;
    let pccc_off = check_cip_general_status(cip)?;

    if cip.len() < pccc_off + 3 {
        return Err(Error::BadData("short PCCC header in reply".to_string()));
    }
    let pccc_status = cip[pccc_off];
    if pccc_status != 0 {
        warn!("pccc: remote NAK, status {:#04x}", pccc_status);
        return Err(Error::RemoteErr {
            code: pccc_status as i32,
        });
    }
    let pccc_seq = LittleEndian::read_u16(&cip[pccc_off + 1..pccc_off + 3]);
    if pccc_seq != expected_seq {
        return Err(Error::BadData(format!(
            "PCCC reply seq {} does not match request seq {}",
            pccc_seq, expected_seq
        )));
    }

    let data = &cip[pccc_off + 3..];
    let (outer_type, _outer_len, mut consumed) = decode_dt_byte(data)
        .ok_or_else(|| Error::BadData("unable to decode PCCC response data type".to_string()))?;

    if outer_type == AB_PCCC_DATA_ARRAY as u16 {
        let (_elem_type, _elem_len, inner_consumed) = decode_dt_byte(&data[consumed..])
            .ok_or_else(|| Error::BadData("unable to decode PCCC array element type".to_string()))?;
        consumed += inner_consumed;
    }

    let payload = &data[consumed..];
    if payload.len() > tag_size {
        return Err(Error::TooLarge);
    }
    debug!("pccc: read reply carries {} payload bytes", payload.len());
    Ok(payload.to_vec())
}

/// Parses a completed write reply. PCCC write replies carry no data, so
/// this is the same validation as the read path minus the payload copy.
pub(crate) fn check_write_response(raw: &[u8], expected_seq: u16) -> Result<(), Error> {
    let (_hdr, cip) = cip_payload(raw)?;
    let pccc_off = check_cip_general_status(cip)?;

    if cip.len() < pccc_off + 3 {
        return Err(Error::BadData("short PCCC header in reply".to_string()));
    }
    let pccc_status = cip[pccc_off];
    if pccc_status != 0 {
        return Err(Error::RemoteErr {
            code: pccc_status as i32,
        });
    }
    let pccc_seq = LittleEndian::read_u16(&cip[pccc_off + 1..pccc_off + 3]);
    if pccc_seq != expected_seq {
        return Err(Error::BadData(format!(
            "PCCC reply seq {} does not match request seq {}",
            pccc_seq, expected_seq
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;

    fn encode_ok_read_reply(seq: u16, dt: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut cip = Vec::new();
        cip.push(0xCB); // reply service
        cip.push(0); // reserved
        cip.push(0); // general status OK
        cip.push(0); // extended status words
        cip.push(0); // pccc status OK
        let mut seqb = [0u8; 2];
        LittleEndian::write_u16(&mut seqb, seq);
        cip.extend_from_slice(&seqb);
        cip.extend_from_slice(dt);
        cip.extend_from_slice(payload);

        let mut body = Vec::new();
        body.extend_from_slice(&[0u8; 4]);
        let mut f = [0u8; 2];
        LittleEndian::write_u16(&mut f, 1);
        body.extend_from_slice(&f);
        LittleEndian::write_u16(&mut f, 2);
        body.extend_from_slice(&f);
        LittleEndian::write_u16(&mut f, AB_EIP_ITEM_NAI);
        body.extend_from_slice(&f);
        LittleEndian::write_u16(&mut f, 0);
        body.extend_from_slice(&f);
        LittleEndian::write_u16(&mut f, AB_EIP_ITEM_UDI);
        body.extend_from_slice(&f);
        LittleEndian::write_u16(&mut f, cip.len() as u16);
        body.extend_from_slice(&f);
        body.extend_from_slice(&cip);

        let mut out = vec![0u8; ENCAP_HEADER_SIZE];
        let hdr = EncapHeader::new(AB_EIP_READ_RR_DATA, body.len() as u16, 0x1234, [0u8; 8]);
        hdr.write_to(&mut out);
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn build_read_request_standard_matches_layout() {
        let req = build_read_request(Dialect::Plc5Slc, 0x1234, 7, b"\x04N7:0", 1, [0, 0]);
        let hdr = EncapHeader::read_from(&req).unwrap();
        assert_eq!(hdr.command, AB_EIP_READ_RR_DATA);
        assert_eq!(hdr.session_handle, 0x1234);

        let cip = &req[ENCAP_HEADER_SIZE + 16..];
        assert_eq!(cip[0], AB_EIP_CMD_PCCC_EXECUTE);
        assert_eq!(&cip[2..6], &[0x20, 0x67, 0x24, 0x01]);
    }

    #[test]
    fn build_read_request_ucmm_has_unconnected_send_wrapper() {
        let req = build_read_request(Dialect::LgxPccc, 1, 1, b"\x04F8:3", 1, [0, 1]);
        let cip = &req[ENCAP_HEADER_SIZE + 16..];
        assert_eq!(cip[0], AB_EIP_CMD_UNCONNECTED_SEND);
        assert_eq!(&cip[2..6], &[0x20, 0x06, 0x24, 0x01]);
    }

    #[test]
    fn check_read_response_extracts_int_payload() {
        let mut dt = Vec::new();
        encode_dt_byte(&mut dt, AB_PCCC_DATA_INT as u16, 2);
        let reply = encode_ok_read_reply(7, &dt, &[0x34, 0x12]);
        let out = check_read_response(&reply, 7, 2).unwrap();
        assert_eq!(out, vec![0x34, 0x12]);
    }

    #[test]
    fn check_read_response_rejects_mismatched_seq() {
        let mut dt = Vec::new();
        encode_dt_byte(&mut dt, AB_PCCC_DATA_INT as u16, 2);
        let reply = encode_ok_read_reply(7, &dt, &[0x34, 0x12]);
        let err = check_read_response(&reply, 8, 2).unwrap_err();
        assert!(matches!(err, Error::BadData(_)));
    }

    #[test]
    fn check_read_response_rejects_oversized_payload() {
        let mut dt = Vec::new();
        encode_dt_byte(&mut dt, AB_PCCC_DATA_INT as u16, 2);
        let reply = encode_ok_read_reply(1, &dt, &[0x34, 0x12]);
        let err = check_read_response(&reply, 1, 1).unwrap_err();
        assert_eq!(err, Error::TooLarge);
    }

    #[test]
    fn write_request_rejects_unsupported_elem_size() {
        let err = build_write_request(Dialect::Plc5Slc, 1, 1, b"\x04N7:0", 1, [0, 0], &[0u8]).unwrap_err();
        assert!(matches!(err, Error::NotAllowed(_)));
    }

    #[test]
    fn write_request_encodes_array_and_element_dt_bytes() {
        let data = [0x01u8, 0x00, 0x02, 0x00];
        let req = build_write_request(Dialect::Plc5Slc, 1, 1, b"\x04N7:0", 2, [0, 0], &data).unwrap();
        // sanity: request is non-empty and carries the raw data near the tail
        assert!(req.windows(data.len()).any(|w| w == data));
    }
}
