// Wire-protocol constants for EIP encapsulation, CIP, and PCCC.
// See src/codec.rs for the packet layouts these values are plugged into.

//! EIP encapsulation commands
pub const AB_EIP_REGISTER_SESSION: u16 = 0x0065;
pub const AB_EIP_UNREGISTER_SESSION: u16 = 0x0066;
/// Unconnected send, PLC-5/SLC path. This is the value that matches the
/// *name* `AB_EIP_READ_RR_DATA`. See the note on `AB_EIP_SEND_UNIT_DATA`.
pub const AB_EIP_READ_RR_DATA: u16 = 0x006F;
/// Some libplctag revisions assign `AB_EIP_READ_RR_DATA` to this value
/// instead (the SendUnitData code) even though it's used on the unconnected
/// path. We accept both on receive; see `pccc::check_read_status`.
pub const AB_EIP_SEND_UNIT_DATA: u16 = 0x0070;

pub const AB_EIP_OK: u32 = 0;

/// CPF item types
pub const AB_EIP_ITEM_NAI: u16 = 0x0000; // NULL Address Item
pub const AB_EIP_ITEM_UDI: u16 = 0x00B2; // Unconnected Data Item

/// CIP service codes
pub const AB_EIP_CMD_PCCC_EXECUTE: u8 = 0x4B;
pub const AB_EIP_CMD_UNCONNECTED_SEND: u8 = 0x52;

/// PCCC command/function bytes
pub const AB_EIP_PCCC_TYPED_CMD: u8 = 0x0F;
pub const AB_EIP_PCCC_TYPED_READ_FUNC: u8 = 0x68;
pub const AB_EIP_PCCC_TYPED_WRITE_FUNC: u8 = 0xAA;

/// PCCC data-type-byte (DT byte) type nibbles
pub const AB_PCCC_DATA_INT: u8 = 0x08;
pub const AB_PCCC_DATA_REAL: u8 = 0x0A;
pub const AB_PCCC_DATA_ARRAY: u8 = 0x0E;
/// marker used in a DT byte nibble when the real value needs extension bytes
pub const AB_PCCC_DATA_EXTENDED: u8 = 0x0F;

/// Unconnected Send routing constants
pub const AB_EIP_SECS_PER_TICK: u8 = 10;
pub const AB_EIP_TIMEOUT_TICKS: u8 = 5;

/// our fixed vendor identity, used in the PCCC ID block of every request
pub const AB_EIP_VENDOR_ID: u16 = 0xF33D;
pub const AB_EIP_VENDOR_SN: u32 = 0x00112233;

/// PCCC cannot fragment; this is the hardware-observed packet size limit.
pub const MAX_PCCC_PACKET_SIZE: usize = 244;

/// default EtherNet/IP TCP port
pub const EIP_PORT: u16 = 44818;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cpu {
    Plc5,
    Slc,
    Lgx,
    MicroLgx,
    Plc5Pccc,
    SlcPccc,
}

impl Cpu {
    /// LGX-family CPUs route PCCC through an Unconnected Send (UCMM); the
    /// PLC-5/SLC family sends PCCC directly inside `RR_DATA`.
    pub fn use_ucmm(self) -> bool {
        matches!(self, Cpu::Lgx | Cpu::MicroLgx)
    }

    /// none of the PCCC dialects covered by this crate need a class-3
    /// Forward-Open connection; that's reserved for the native CIP tag
    /// dialect, which is out of scope here.
    pub fn needs_connection(self) -> bool {
        false
    }

    pub fn parse(s: &str) -> Option<Cpu> {
        match s.to_ascii_uppercase().as_str() {
            "PLC5" => Some(Cpu::Plc5),
            "SLC" => Some(Cpu::Slc),
            "LGX" => Some(Cpu::Lgx),
            "MLGX" => Some(Cpu::MicroLgx),
            "PLC5_PCCC" => Some(Cpu::Plc5Pccc),
            "SLC_PCCC" => Some(Cpu::SlcPccc),
            _ => None,
        }
    }
}
