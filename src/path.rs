// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Parses the `protocol=...&gateway=...&name=...` attribute string into a
//! `TagPath`, and encodes a PCCC tag address into the bytes that go out on
//! the wire as `encoded_name`.

use super::constant::Cpu;
use super::error::Error;

#[derive(Debug, Clone)]
pub struct TagPath {
    pub protocol: String,
    pub gateway: String,
    /// CIP route: `{backplane, slot}`, parsed from `path=1,0`
    pub conn_path: [u8; 2],
    pub cpu: Cpu,
    pub elem_size: usize,
    pub elem_count: usize,
    pub name: String,
    pub read_cache_ms: u64,
    pub debug: u8,
}

impl TagPath {
    pub fn parse(attr_str: &str) -> Result<TagPath, Error> {
        let mut protocol = None;
        let mut gateway = None;
        let mut conn_path = [0u8, 0u8];
        let mut cpu = None;
        let mut elem_size = None;
        let mut elem_count = None;
        let mut name = None;
        let mut read_cache_ms = 0u64;
        let mut debug = 0u8;

        for kv in attr_str.split('&') {
            if kv.is_empty() {
                continue;
            }
            let mut it = kv.splitn(2, '=');
            let key = it.next().unwrap_or("");
            let value = it.next().ok_or_else(|| {
                Error::InvalidPath(format!("attribute '{}' has no value", key))
            })?;

            match key {
                "protocol" => protocol = Some(value.to_string()),
                "gateway" => gateway = Some(value.to_string()),
                "path" => {
                    let parts: Vec<&str> = value.split(',').collect();
                    if parts.len() != 2 {
                        return Err(Error::InvalidPath(format!(
                            "path '{}' must be 'backplane,slot'",
                            value
                        )));
                    }
                    conn_path[0] = parts[0]
                        .parse::<u8>()
                        .map_err(|_| Error::InvalidPath(format!("bad backplane in '{}'", value)))?;
                    conn_path[1] = parts[1]
                        .parse::<u8>()
                        .map_err(|_| Error::InvalidPath(format!("bad slot in '{}'", value)))?;
                }
                "cpu" => {
                    cpu = Some(Cpu::parse(value).ok_or_else(|| {
                        Error::InvalidPath(format!("unsupported cpu '{}'", value))
                    })?)
                }
                "elem_size" => {
                    elem_size = Some(value.parse::<usize>().map_err(|_| {
                        Error::InvalidPath(format!("bad elem_size '{}'", value))
                    })?)
                }
                "elem_count" => {
                    elem_count = Some(value.parse::<usize>().map_err(|_| {
                        Error::InvalidPath(format!("bad elem_count '{}'", value))
                    })?)
                }
                "name" => name = Some(value.to_string()),
                "read_cache_ms" => {
                    read_cache_ms = value.parse::<u64>().map_err(|_| {
                        Error::InvalidPath(format!("bad read_cache_ms '{}'", value))
                    })?
                }
                "debug" => debug = value.parse::<u8>().unwrap_or(0),
                _ => { /* unknown attributes are ignored, as with the original driver */ }
            }
        }

        Ok(TagPath {
            protocol: protocol
                .ok_or_else(|| Error::InvalidPath("missing 'protocol'".to_string()))?,
            gateway: gateway.ok_or_else(|| Error::InvalidPath("missing 'gateway'".to_string()))?,
            conn_path,
            cpu: cpu.ok_or_else(|| Error::InvalidPath("missing 'cpu'".to_string()))?,
            elem_size: elem_size
                .ok_or_else(|| Error::InvalidPath("missing 'elem_size'".to_string()))?,
            elem_count: elem_count
                .ok_or_else(|| Error::InvalidPath("missing 'elem_count'".to_string()))?,
            name: name.ok_or_else(|| Error::InvalidPath("missing 'name'".to_string()))?,
            read_cache_ms,
            debug,
        })
    }
}

/// Encodes a PLC-5/SLC style tag address (e.g. `N7:0`, `F8:3`) into the
/// length-prefixed ASCII form PCCC expects, padded to an even length.
pub fn encode_pccc_name(name: &str) -> Result<Vec<u8>, Error> {
    if name.is_empty() {
        return Err(Error::InvalidPath("tag name is empty".to_string()));
    }
    if name.len() > 255 {
        return Err(Error::InvalidPath("tag name too long".to_string()));
    }

    let mut out = Vec::with_capacity(name.len() + 2);
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    if out.len() % 2 != 0 {
        out.push(0);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_lgx_path() {
        let p = TagPath::parse(
            "protocol=ab_eip&gateway=10.17.45.37&path=1,0&cpu=LGX&elem_size=4&elem_count=1&name=F8:3&read_cache_ms=100",
        )
        .unwrap();
        assert_eq!(p.protocol, "ab_eip");
        assert_eq!(p.gateway, "10.17.45.37");
        assert_eq!(p.conn_path, [1, 0]);
        assert_eq!(p.cpu, Cpu::Lgx);
        assert_eq!(p.elem_size, 4);
        assert_eq!(p.elem_count, 1);
        assert_eq!(p.name, "F8:3");
        assert_eq!(p.read_cache_ms, 100);
        assert!(p.cpu.use_ucmm());
    }

    #[test]
    fn parse_plc5_path_no_cache() {
        let p = TagPath::parse("protocol=ab_eip&gateway=10.0.0.1&cpu=PLC5&elem_size=2&elem_count=1&name=N7:0")
            .unwrap();
        assert_eq!(p.cpu, Cpu::Plc5);
        assert!(!p.cpu.use_ucmm());
        assert_eq!(p.read_cache_ms, 0);
    }

    #[test]
    fn missing_required_attr_errors() {
        let err = TagPath::parse("protocol=ab_eip&gateway=10.0.0.1").unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }

    #[test]
    fn encode_name_pads_to_even_length() {
        let encoded = encode_pccc_name("N7:0").unwrap();
        assert_eq!(encoded[0], 4);
        assert_eq!(&encoded[1..5], b"N7:0");
        assert_eq!(encoded.len(), 6); // padded, since 1 + 4 = 5 is odd
    }

    #[test]
    fn encode_name_rejects_empty() {
        assert!(encode_pccc_name("").is_err());
    }
}
