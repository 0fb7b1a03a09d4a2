// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The Rust expression of the original driver's per-dialect function
//! pointers (`read_start`/`write_start`/`status`): a tagged variant chosen
//! at `create` time instead of a vtable, since the set of dialects is
//! closed and known at compile time.

use super::constant::Cpu;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    /// PCCC sent directly inside `RR_DATA`, PLC-5/SLC style.
    Plc5Slc,
    /// PCCC wrapped in a CIP Unconnected Send, ControlLogix style.
    LgxPccc,
}

impl Dialect {
    pub(crate) fn from_cpu(cpu: Cpu) -> Dialect {
        if cpu.use_ucmm() {
            Dialect::LgxPccc
        } else {
            Dialect::Plc5Slc
        }
    }
}
