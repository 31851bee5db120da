use num_derive::FromPrimitive;

use crate::{
    decoder::Decoder,
    helpers::fixed_name,
    macho::{MachOErr, MachOResult},
};

use super::{LCLoadCommand, LoadCommandParser, RawCommand};

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u32 {
        const NONE = 0x00;
        const READ = 0x01;
        const WRITE = 0x02;
        const EXECUTE = 0x04;
    }
}

impl Protection {
    pub fn parse(value: u32) -> Protection {
        Protection::from_bits_truncate(value)
    }
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SGFlags: u32 {
        const HIGHVM = 0x1;
        const FVMLIB = 0x2;
        const NORELOC = 0x4;
        const PROTECTED_VERSION_1 = 0x8;
        const READ_ONLY = 0x10;
    }
}

impl SGFlags {
    pub fn parse(value: u32) -> SGFlags {
        SGFlags::from_bits_truncate(value)
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum SectionType {
    SRegular = 0x0,
    SZeroFill = 0x1,
    SCstringLiterals = 0x2,
    S4ByteLiterals = 0x3,
    S8ByteLiterals = 0x4,
    SLiteralPointers = 0x5,
    SNonLazySymbolPointers = 0x6,
    SLazySymbolPointers = 0x7,
    SSymbolStubs = 0x8,
    SModInitFuncPointers = 0x9,
    SModTermFuncPointers = 0xa,
    SCoalesced = 0xb,
    SGbZeroFill = 0xc,
    SInterposing = 0xd,
    S16ByteLiterals = 0xe,
    SDtraceDof = 0xf,
    SLazyDylibSymbolPointers = 0x10,
    SThreadLocalRegular = 0x11,
    SThreadLocalZeroFill = 0x12,
    SThreadLocalVariables = 0x13,
    SThreadLocalVariablePointers = 0x14,
    SThreadLocalInitFunctionPointers = 0x15,
    SInitFuncOffsets = 0x16,
    Unknown = 0xff,
}

impl SectionType {
    pub const SECTION_TYPE_MASK: u32 = 0x000000ff;

    pub fn parse(flags: u32) -> SectionType {
        num::FromPrimitive::from_u32(flags & Self::SECTION_TYPE_MASK).unwrap_or(SectionType::Unknown)
    }
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionAttributes: u32 {
        const PURE_INSTRUCTIONS = 0x80000000;
        const NO_TOC = 0x40000000;
        const STRIP_STATIC_SYMS = 0x20000000;
        const NO_DEAD_STRIP = 0x10000000;
        const LIVE_SUPPORT = 0x08000000;
        const SELF_MODIFYING_CODE = 0x04000000;
        const DEBUG = 0x02000000;
        const SOME_INSTRUCTIONS = 0x00000400;
        const EXT_RELOC = 0x00000200;
        const LOC_RELOC = 0x00000100;
    }
}

impl SectionAttributes {
    pub const SECTION_ATTRIBUTES_MASK: u32 = 0xffffff00;

    pub fn parse(flags: u32) -> SectionAttributes {
        SectionAttributes::from_bits_truncate(flags & Self::SECTION_ATTRIBUTES_MASK)
    }
}

/// Reads an address-sized field: 8 bytes in 64-bit images, 4 otherwise.
fn decode_word(decoder: &mut Decoder, is_64: bool) -> MachOResult<u64> {
    if is_64 {
        decoder.decode::<u64>()
    } else {
        decoder.decode::<u32>().map(u64::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub sectname: String,
    pub segname: String,
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags_sectype: SectionType,
    pub flags_secattrs: SectionAttributes,
    pub reserved1: u32,
    pub reserved2: u32,
    /// Only present in `section_64`.
    pub reserved3: Option<u32>,
}

impl Section {
    pub const SIZE_32: usize = 68;
    pub const SIZE_64: usize = 80;

    fn parse(decoder: &mut Decoder, is_64: bool) -> MachOResult<Section> {
        let sectname = fixed_name(&decoder.decode()?);
        let segname = fixed_name(&decoder.decode()?);
        let addr = decode_word(decoder, is_64)?;
        let size = decode_word(decoder, is_64)?;
        let offset = decoder.decode()?;
        let align = decoder.decode()?;
        let reloff = decoder.decode()?;
        let nreloc = decoder.decode()?;
        let flags: u32 = decoder.decode()?;
        let reserved1 = decoder.decode()?;
        let reserved2 = decoder.decode()?;
        let reserved3 = if is_64 {
            Some(decoder.decode()?)
        } else {
            None
        };

        Ok(Section {
            sectname,
            segname,
            addr,
            size,
            offset,
            align,
            reloff,
            nreloc,
            flags_sectype: SectionType::parse(flags),
            flags_secattrs: SectionAttributes::parse(flags),
            reserved1,
            reserved2,
            reserved3,
        })
    }
}

/// `LC_SEGMENT` and `LC_SEGMENT_64`, with addresses widened to 64 bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub segname: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: Protection,
    pub initprot: Protection,
    pub nsects: u32,
    pub flags: SGFlags,
    pub sects: Vec<Section>,
}

impl SegmentCommand {
    pub const SIZE_32: usize = 56;
    pub const SIZE_64: usize = 72;

    pub fn is_64(&self) -> bool {
        self.cmd == LCLoadCommand::LcSegment64
    }

    pub fn contains_vmaddr(&self, addr: u64) -> bool {
        addr >= self.vmaddr && addr - self.vmaddr < self.vmsize
    }
}

impl LoadCommandParser for SegmentCommand {
    const CODES: &'static [LCLoadCommand] = &[LCLoadCommand::LcSegment, LCLoadCommand::LcSegment64];

    fn parse(raw: &RawCommand) -> MachOResult<Self> {
        let is_64 = raw.cmd == LCLoadCommand::LcSegment64;
        let mut decoder = raw.body()?;

        let segname = fixed_name(&decoder.decode()?);
        let vmaddr = decode_word(&mut decoder, is_64)?;
        let vmsize = decode_word(&mut decoder, is_64)?;
        let fileoff = decode_word(&mut decoder, is_64)?;
        let filesize = decode_word(&mut decoder, is_64)?;
        let maxprot = Protection::parse(decoder.decode()?);
        let initprot = Protection::parse(decoder.decode()?);
        let nsects: u32 = decoder.decode()?;
        let flags = SGFlags::parse(decoder.decode()?);

        let (header_size, section_size) = if is_64 {
            (Self::SIZE_64, Section::SIZE_64)
        } else {
            (Self::SIZE_32, Section::SIZE_32)
        };
        let max_sects = raw.decoder.len().saturating_sub(header_size) / section_size;
        if nsects as usize > max_sects {
            return Err(MachOErr::InvalidArrayCount {
                count: nsects as usize,
                max: max_sects,
            });
        }

        let sects = (0..nsects)
            .map(|_| Section::parse(&mut decoder, is_64))
            .collect::<MachOResult<Vec<_>>>()?;

        Ok(SegmentCommand {
            cmd: raw.cmd,
            cmdsize: raw.base.cmdsize,
            segname,
            vmaddr,
            vmsize,
            fileoff,
            filesize,
            maxprot,
            initprot,
            nsects,
            flags,
            sects,
        })
    }
}
