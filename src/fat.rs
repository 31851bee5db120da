use std::str::FromStr;

use nom_derive::Nom;
use num_derive::FromPrimitive;
use tracing::{debug, warn};

use crate::decoder::{impl_decode_for_record, ByteOrder, Decoder};
use crate::machine::{arch_name, CpuSubType, CpuType};
use crate::macho::{MachOErr, MachOResult};

/// Fat magic as read little-endian. Fat headers are normally stored
/// big-endian, so real universal binaries classify as `FatCigam*`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum FatMagic {
    FatMagic = 0xcafebabe,
    FatCigam = 0xbebafeca,
    FatMagic64 = 0xcafebabf,
    FatCigam64 = 0xbfbafeca,
}

impl FatMagic {
    pub fn from_raw(value: u32) -> Option<FatMagic> {
        num::FromPrimitive::from_u32(value)
    }

    pub fn is_64(&self) -> bool {
        matches!(self, FatMagic::FatMagic64 | FatMagic::FatCigam64)
    }

    pub fn is_swapped(&self) -> bool {
        matches!(self, FatMagic::FatCigam | FatMagic::FatCigam64)
    }

    pub fn byte_order(&self) -> ByteOrder {
        if self.is_swapped() {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

#[derive(Debug, Nom)]
struct RawFatArch32 {
    cputype: u32,
    cpusubtype: u32,
    offset: u32,
    size: u32,
    align: u32,
}
impl_decode_for_record!(RawFatArch32, 20);

#[derive(Debug, Nom)]
struct RawFatArch64 {
    cputype: u32,
    cpusubtype: u32,
    offset: u64,
    size: u64,
    align: u32,
    reserved: u32,
}
impl_decode_for_record!(RawFatArch64, 32);

/// One architecture slice of a universal binary. Offsets and sizes are
/// widened to 64 bits for both header flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatArch {
    pub cputype: CpuType,
    pub cpusubtype: CpuSubType,
    pub offset: u64,
    pub size: u64,
    pub align: u32,
    pub reserved: Option<u32>,
}

impl From<RawFatArch32> for FatArch {
    fn from(raw: RawFatArch32) -> Self {
        FatArch {
            cputype: CpuType::from_raw(raw.cputype),
            cpusubtype: CpuSubType::from_raw(raw.cpusubtype),
            offset: raw.offset as u64,
            size: raw.size as u64,
            align: raw.align,
            reserved: None,
        }
    }
}

impl From<RawFatArch64> for FatArch {
    fn from(raw: RawFatArch64) -> Self {
        FatArch {
            cputype: CpuType::from_raw(raw.cputype),
            cpusubtype: CpuSubType::from_raw(raw.cpusubtype),
            offset: raw.offset,
            size: raw.size,
            align: raw.align,
            reserved: Some(raw.reserved),
        }
    }
}

impl FatArch {
    pub fn name(&self) -> String {
        arch_name(self.cputype, self.cpusubtype)
    }

    /// The bytes of this slice within the whole file.
    pub fn slice<'a>(&self, data: &'a [u8]) -> MachOResult<&'a [u8]> {
        let offset = usize::try_from(self.offset)
            .map_err(|_| MachOErr::InvalidValue(format!("fat arch offset {:#x}", self.offset)))?;
        let size = usize::try_from(self.size)
            .map_err(|_| MachOErr::InvalidValue(format!("fat arch size {:#x}", self.size)))?;
        Decoder::new(data, ByteOrder::Little).bytes_at(offset, size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatHeader {
    pub magic: FatMagic,
    pub archs: Vec<FatArch>,
}

impl FatHeader {
    pub const SIZE: usize = 8;
    pub const MAX_ARCHS: usize = 256;

    pub fn parse(bytes: &[u8]) -> MachOResult<FatHeader> {
        let raw_magic: u32 = Decoder::new(bytes, ByteOrder::Little).decode_at(0)?;
        let magic = FatMagic::from_raw(raw_magic).ok_or(MachOErr::InvalidMagic(raw_magic))?;

        let mut decoder = Decoder::new(bytes, magic.byte_order());
        decoder.seek(4)?;
        let nfat_arch = decoder.decode::<u32>()? as usize;
        if nfat_arch == 0 {
            return Err(MachOErr::EmptyFatArchive);
        }

        let archs: Vec<FatArch> = if magic.is_64() {
            decoder
                .decode_array::<RawFatArch64>(nfat_arch, Self::MAX_ARCHS)?
                .into_iter()
                .map(FatArch::from)
                .collect()
        } else {
            decoder
                .decode_array::<RawFatArch32>(nfat_arch, Self::MAX_ARCHS)?
                .into_iter()
                .map(FatArch::from)
                .collect()
        };
        debug!(?magic, nfat_arch, "parsed fat header");

        Ok(FatHeader { magic, archs })
    }

    /// Picks the slice matching `arch`. An exact name match (`arm64e`) wins
    /// over a CPU type match; anything else falls back to the first slice.
    pub fn select(&self, arch: Option<&str>) -> MachOResult<&FatArch> {
        let first = self.archs.first().ok_or(MachOErr::EmptyFatArchive)?;
        let Some(requested) = arch else {
            return Ok(first);
        };

        if let Some(found) = self.archs.iter().find(|a| a.name() == requested) {
            return Ok(found);
        }
        if let Ok(cputype) = CpuType::from_str(requested) {
            if let Some(found) = self.archs.iter().find(|a| a.cputype == cputype) {
                return Ok(found);
            }
        }

        warn!(requested, fallback = %first.name(), "requested architecture not present");
        Ok(first)
    }
}
