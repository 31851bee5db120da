use num_derive::FromPrimitive;
use strum_macros::{Display, EnumString};

use crate::bits;

#[repr(u32)]
#[derive(Debug, Copy, Clone, FromPrimitive)]
pub enum CpuABI {
    ABI64 = 0x01000000,
    ABI64_32 = 0x02000000,
}

/// CPU type of an image. Parses from and prints as the names used by the
/// platform tools (`arm64`, `x86_64`, ...).
#[repr(u32)]
#[derive(Debug, Copy, Clone, FromPrimitive, PartialEq, Eq, Display, EnumString)]
pub enum CpuType {
    #[strum(serialize = "any")]
    Any = 0,
    #[strum(serialize = "vax")]
    Vax = 1,
    #[strum(serialize = "m68k")]
    Mc680x0 = 6,
    #[strum(to_string = "i386", serialize = "x86")]
    I386 = 7,
    #[strum(serialize = "x86_64")]
    X86_64 = 7 | CpuABI::ABI64 as u32,
    #[strum(serialize = "m98k")]
    Mc98000 = 10,
    #[strum(serialize = "hppa")]
    Hppa = 11,
    #[strum(serialize = "arm")]
    Arm = 12,
    #[strum(to_string = "arm64", serialize = "arm64e")]
    Arm64 = 12 | CpuABI::ABI64 as u32,
    #[strum(serialize = "arm64_32")]
    Arm64_32 = 12 | CpuABI::ABI64_32 as u32,
    #[strum(serialize = "m88k")]
    Mc88000 = 13,
    #[strum(serialize = "sparc")]
    Sparc = 14,
    #[strum(serialize = "i860")]
    I860 = 15,
    #[strum(serialize = "ppc")]
    PowerPC = 18,
    #[strum(serialize = "ppc64")]
    PowerPC64 = 18 | CpuABI::ABI64 as u32,
    #[strum(serialize = "unknown")]
    Unknown = !0,
}

impl CpuType {
    pub fn from_raw(value: u32) -> CpuType {
        num::FromPrimitive::from_u32(value).unwrap_or(CpuType::Unknown)
    }

    pub fn is_64(&self) -> bool {
        (*self as u32) & CpuABI::ABI64 as u32 != 0
    }
}

/// The subtype word splits into the subtype proper (low 24 bits) and the
/// capability bits (high 8).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CpuSubType {
    pub subtype: u32,
    pub capabilities: u8,
}

impl CpuSubType {
    pub const CPU_SUBTYPE_LIB64: u8 = 0x80;
    pub const CPU_SUBTYPE_ARM64E: u32 = 2;

    pub fn from_raw(value: u32) -> CpuSubType {
        let [subtype, capabilities] = bits::split(value as u64, [24, 8]);
        CpuSubType {
            subtype: subtype as u32,
            capabilities: capabilities as u8,
        }
    }

    pub fn raw(&self) -> u32 {
        self.subtype | ((self.capabilities as u32) << 24)
    }
}

/// Name of an architecture slice, distinguishing `arm64e` from `arm64`.
pub fn arch_name(cputype: CpuType, cpusubtype: CpuSubType) -> String {
    match cputype {
        CpuType::Arm64 if cpusubtype.subtype == CpuSubType::CPU_SUBTYPE_ARM64E => {
            "arm64e".to_string()
        }
        _ => cputype.to_string(),
    }
}
