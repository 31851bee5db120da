use nom_derive::Nom;
use num_derive::FromPrimitive;
use tracing::debug;

use crate::{
    decoder::{impl_decode_for_record, ByteOrder, Decoder},
    fat::FatMagic,
    machine::{CpuSubType, CpuType},
    macho::{MachOErr, MachOResult},
};

/// Mach-O magic as read little-endian from the first four bytes. The `Cigam`
/// variants are the byte-swapped values found in big-endian images.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum MHMagic {
    MhMagic = 0xfeedface,
    MhCigam = 0xcefaedfe,
    MhMagic64 = 0xfeedfacf,
    MhCigam64 = 0xcffaedfe,
}

impl MHMagic {
    pub fn from_raw(value: u32) -> Option<MHMagic> {
        num::FromPrimitive::from_u32(value)
    }

    pub fn is_64(&self) -> bool {
        matches!(self, MHMagic::MhMagic64 | MHMagic::MhCigam64)
    }

    pub fn is_swapped(&self) -> bool {
        matches!(self, MHMagic::MhCigam | MHMagic::MhCigam64)
    }

    pub fn byte_order(&self) -> ByteOrder {
        if self.is_swapped() {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// What the leading four bytes of a buffer say about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    MachO(MHMagic),
    Fat(FatMagic),
}

impl Magic {
    pub fn classify(bytes: &[u8]) -> MachOResult<Magic> {
        let raw: u32 = Decoder::new(bytes, ByteOrder::Little).decode_at(0)?;
        if let Some(magic) = MHMagic::from_raw(raw) {
            return Ok(Magic::MachO(magic));
        }
        if let Some(magic) = FatMagic::from_raw(raw) {
            return Ok(Magic::Fat(magic));
        }
        Err(MachOErr::InvalidMagic(raw))
    }

    pub fn is_fat(&self) -> bool {
        matches!(self, Magic::Fat(_))
    }

    pub fn is_64(&self) -> bool {
        match self {
            Magic::MachO(magic) => magic.is_64(),
            Magic::Fat(magic) => magic.is_64(),
        }
    }

    pub fn is_swapped(&self) -> bool {
        match self {
            Magic::MachO(magic) => magic.is_swapped(),
            Magic::Fat(magic) => magic.is_swapped(),
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        if self.is_swapped() {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MHFlags: u32 {
        const MH_NOUNDEFS = 0x1;
        const MH_INCRLINK = 0x2;
        const MH_DYLDLINK = 0x4;
        const MH_BINDATLOAD = 0x8;
        const MH_PREBOUND = 0x10;
        const MH_SPLIT_SEGS = 0x20;
        const MH_LAZY_INIT = 0x40;
        const MH_TWOLEVEL = 0x80;
        const MH_FORCE_FLAT = 0x100;
        const MH_NOMULTIDEFS = 0x200;
        const MH_NOFIXPREBINDING = 0x400;
        const MH_PREBINDABLE = 0x800;
        const MH_ALLMODSBOUND = 0x1000;
        const MH_SUBSECTIONS_VIA_SYMBOLS = 0x2000;
        const MH_CANONICAL = 0x4000;
        const MH_WEAK_DEFINES = 0x8000;
        const MH_BINDS_TO_WEAK = 0x10000;
        const MH_ALLOW_STACK_EXECUTION = 0x20000;
        const MH_ROOT_SAFE = 0x40000;
        const MH_SETUID_SAFE = 0x80000;
        const MH_NO_REEXPORTED_DYLIBS = 0x100000;
        const MH_PIE = 0x200000;
        const MH_DEAD_STRIPPABLE_DYLIB = 0x400000;
        const MH_HAS_TLV_DESCRIPTORS = 0x800000;
        const MH_NO_HEAP_EXECUTION = 0x1000000;
        const MH_APP_EXTENSION_SAFE = 0x02000000;
        const MH_NLIST_OUTOFSYNC_WITH_DYLDINFO = 0x04000000;
        const MH_SIM_SUPPORT = 0x08000000;
        const MH_IMPLICIT_PAGEZERO = 0x10000000;
        const MH_DYLIB_IN_CACHE = 0x80000000;
    }
}

impl MHFlags {
    pub fn parse(value: u32) -> MHFlags {
        MHFlags::from_bits_truncate(value)
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum MHFileType {
    MhObject = 0x1,
    MhExecute = 0x2,
    MhFvmlib = 0x3,
    MhCore = 0x4,
    MhPreload = 0x5,
    MhDylib = 0x6,
    MhDylinker = 0x7,
    MhBundle = 0x8,
    MhDylibStub = 0x9,
    MhDsym = 0xa,
    MhKextBundle = 0xb,
    MhFileset = 0xc,
    MhGpuExecute = 0xd,
    MhGpuDylib = 0xe,
    MhMetalLib = 0x262,
    Unknown = !0,
}

impl MHFileType {
    pub fn from_raw(value: u32) -> MHFileType {
        num::FromPrimitive::from_u32(value).unwrap_or(MHFileType::Unknown)
    }
}

#[derive(Debug, Nom)]
struct RawMachHeader {
    magic: u32,
    cputype: u32,
    cpusubtype: u32,
    filetype: u32,
    ncmds: u32,
    sizeofcmds: u32,
    flags: u32,
}
impl_decode_for_record!(RawMachHeader, 28);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachHeader {
    pub magic: MHMagic,
    pub cputype: CpuType,
    pub cpusubtype: CpuSubType,
    pub filetype: MHFileType,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: MHFlags,
    /// Only present in 64-bit headers.
    pub reserved: Option<u32>,
}

impl MachHeader {
    pub const SIZE_32: usize = 28;
    pub const SIZE_64: usize = 32;

    /// Parses the header at the start of `bytes`, which must begin with a
    /// Mach-O (not fat) magic.
    pub fn parse(bytes: &[u8]) -> MachOResult<MachHeader> {
        let magic = match Magic::classify(bytes)? {
            Magic::MachO(magic) => magic,
            Magic::Fat(magic) => return Err(MachOErr::InvalidMagic(magic as u32)),
        };

        let decoder = Decoder::new(bytes, magic.byte_order());
        let raw: RawMachHeader = decoder.decode_at(0)?;
        let reserved = if magic.is_64() {
            Some(decoder.decode_at::<u32>(Self::SIZE_32)?)
        } else {
            None
        };

        let header = MachHeader {
            magic,
            cputype: CpuType::from_raw(raw.cputype),
            cpusubtype: CpuSubType::from_raw(raw.cpusubtype),
            filetype: MHFileType::from_raw(raw.filetype),
            ncmds: raw.ncmds,
            sizeofcmds: raw.sizeofcmds,
            flags: MHFlags::parse(raw.flags),
            reserved,
        };
        debug!(
            magic = raw.magic,
            cputype = %header.cputype,
            ncmds = header.ncmds,
            sizeofcmds = header.sizeofcmds,
            "parsed mach header"
        );
        Ok(header)
    }

    pub fn size(&self) -> usize {
        if self.magic.is_64() {
            Self::SIZE_64
        } else {
            Self::SIZE_32
        }
    }

    pub fn is_64(&self) -> bool {
        self.magic.is_64()
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.magic.byte_order()
    }

    /// Width load command sizes are expected to be a multiple of.
    pub fn pointer_width(&self) -> u32 {
        if self.is_64() {
            8
        } else {
            4
        }
    }
}
