//! On-disk structures of the `LC_DYLD_CHAINED_FIXUPS` payload.
//!
//! The payload starts with a [`DyldChainedFixupsHeader`] whose offsets are
//! relative to the start of the payload. Chained pointer records are packed
//! bit fields; each shape below lists its fields from the least significant
//! bit up.

use nom_derive::Nom;
use num_derive::FromPrimitive;
use strum_macros::Display;
use tracing::debug;

use crate::{
    bits::{self, sign_extend},
    decoder::{impl_decode_for_record, Decoder},
    macho::{MachOErr, MachOResult},
};

#[derive(Debug, Nom)]
struct RawDyldChainedFixupsHeader {
    fixups_version: u32,
    starts_offset: u32,
    imports_offset: u32,
    symbols_offset: u32,
    imports_count: u32,
    imports_format: u32,
    symbols_format: u32,
}
impl_decode_for_record!(RawDyldChainedFixupsHeader, 28);

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Display)]
pub enum DyldImportFormat {
    Import = 1,
    ImportAddend = 2,
    ImportAddend64 = 3,
}

impl DyldImportFormat {
    /// Bytes per entry in the imports table.
    pub fn entry_size(&self) -> usize {
        match self {
            DyldImportFormat::Import => 4,
            DyldImportFormat::ImportAddend => 8,
            DyldImportFormat::ImportAddend64 => 16,
        }
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Display)]
pub enum DyldSymbolsFormat {
    Uncompressed = 0,
    Zlib = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedFixupsHeader {
    pub fixups_version: u32,
    pub starts_offset: u32,
    pub imports_offset: u32,
    pub symbols_offset: u32,
    pub imports_count: u32,
    pub imports_format: DyldImportFormat,
    pub symbols_format: DyldSymbolsFormat,
}

impl DyldChainedFixupsHeader {
    pub const SIZE: usize = 28;

    pub fn parse(decoder: &Decoder, offset: usize) -> MachOResult<Self> {
        let raw: RawDyldChainedFixupsHeader = decoder.decode_at(offset)?;

        let imports_format = num::FromPrimitive::from_u32(raw.imports_format).ok_or_else(|| {
            MachOErr::InvalidValue(format!("unknown imports format {}", raw.imports_format))
        })?;
        let symbols_format = num::FromPrimitive::from_u32(raw.symbols_format).ok_or_else(|| {
            MachOErr::InvalidValue(format!("unknown symbols format {}", raw.symbols_format))
        })?;

        let header = DyldChainedFixupsHeader {
            fixups_version: raw.fixups_version,
            starts_offset: raw.starts_offset,
            imports_offset: raw.imports_offset,
            symbols_offset: raw.symbols_offset,
            imports_count: raw.imports_count,
            imports_format,
            symbols_format,
        };
        debug!(?header, "parsed chained fixups header");
        Ok(header)
    }
}

/// `dyld_chained_starts_in_image`. A zero offset means the segment at that
/// index has no fixups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldStartsInImage {
    pub seg_count: u32,
    pub seg_info_offset: Vec<u32>,
}

impl DyldStartsInImage {
    pub fn parse(decoder: &Decoder, offset: usize) -> MachOResult<Self> {
        let seg_count: u32 = decoder.decode_at(offset)?;
        let max = decoder.len().saturating_sub(offset + 4) / 4;
        let seg_info_offset = decoder.decode_array_at(offset + 4, seg_count as usize, max)?;

        Ok(DyldStartsInImage {
            seg_count,
            seg_info_offset,
        })
    }
}

#[derive(Debug, Nom)]
struct RawStartsInSegment {
    size: u32,
    page_size: u16,
    pointer_format: u16,
    segment_offset: u64,
    max_valid_pointer: u32,
    page_count: u16,
}
impl_decode_for_record!(RawStartsInSegment, 22);

/// `dyld_chained_starts_in_segment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldStartsInSegment {
    pub size: u32,
    pub page_size: u16,
    /// Kept raw so that formats this crate does not know survive decoding.
    pub pointer_format: u16,
    pub segment_offset: u64,
    pub max_valid_pointer: u32,
    pub page_count: u16,
    pub page_start: Vec<u16>,
    /// Chain starts for multi-start pages, stored after `page_start`.
    pub overflow: Vec<u16>,
}

impl DyldStartsInSegment {
    pub const HEADER_SIZE: usize = 22;
    pub const DYLD_CHAINED_PTR_START_NONE: u16 = 0xffff;
    pub const DYLD_CHAINED_PTR_START_MULTI: u16 = 0x8000;
    pub const DYLD_CHAINED_PTR_START_LAST: u16 = 0x8000;

    pub fn parse(decoder: &Decoder, offset: usize) -> MachOResult<Self> {
        let raw: RawStartsInSegment = decoder.decode_at(offset)?;

        let array_offset = offset + Self::HEADER_SIZE;
        let available = decoder.len().saturating_sub(array_offset) / 2;
        let page_start: Vec<u16> =
            decoder.decode_array_at(array_offset, raw.page_count as usize, available)?;

        let has_multi = Self::multi_starts(raw.pointer_format)
            && page_start.iter().any(|start| {
                *start != Self::DYLD_CHAINED_PTR_START_NONE
                    && start & Self::DYLD_CHAINED_PTR_START_MULTI != 0
            });
        let overflow = if has_multi {
            let used = Self::HEADER_SIZE + page_start.len() * 2;
            let count = (raw.size as usize).saturating_sub(used) / 2;
            let overflow_offset = array_offset + page_start.len() * 2;
            let available = decoder.len().saturating_sub(overflow_offset) / 2;
            decoder.decode_array_at(overflow_offset, count, available)?
        } else {
            Vec::new()
        };

        Ok(DyldStartsInSegment {
            size: raw.size,
            page_size: raw.page_size,
            pointer_format: raw.pointer_format,
            segment_offset: raw.segment_offset,
            max_valid_pointer: raw.max_valid_pointer,
            page_count: raw.page_count,
            page_start,
            overflow,
        })
    }

    pub fn format(&self) -> Option<DyldPointerFormat> {
        DyldPointerFormat::from_raw(self.pointer_format)
    }

    /// Offsets within page `index` at which chains begin. Empty for pages
    /// without fixups.
    pub fn chain_starts(&self, index: usize) -> Vec<u16> {
        let Some(start) = self.page_start.get(index).copied() else {
            return Vec::new();
        };
        if start == Self::DYLD_CHAINED_PTR_START_NONE {
            return Vec::new();
        }
        if start & Self::DYLD_CHAINED_PTR_START_MULTI == 0
            || !Self::multi_starts(self.pointer_format)
        {
            return vec![start];
        }

        // Multi-start indices count from the beginning of page_start.
        let mut starts = Vec::new();
        let mut entry = (start & !Self::DYLD_CHAINED_PTR_START_MULTI) as usize;
        while let Some(value) = self.start_entry(entry) {
            starts.push(value & !Self::DYLD_CHAINED_PTR_START_LAST);
            if value & Self::DYLD_CHAINED_PTR_START_LAST != 0 {
                break;
            }
            entry += 1;
        }
        starts
    }

    /// `DYLD_CHAINED_PTR_START_MULTI` is only defined for the 32-bit formats.
    fn multi_starts(pointer_format: u16) -> bool {
        DyldPointerFormat::from_raw(pointer_format)
            .is_some_and(|format| format.pointer_size() == 4)
    }

    fn start_entry(&self, index: usize) -> Option<u16> {
        if index < self.page_start.len() {
            self.page_start.get(index).copied()
        } else {
            self.overflow.get(index - self.page_start.len()).copied()
        }
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Display)]
pub enum DyldPointerFormat {
    Arm64e = 1,
    Ptr64 = 2,
    Ptr32 = 3,
    Ptr32Cache = 4,
    Ptr32Firmware = 5,
    Ptr64Offset = 6,
    Arm64eKernel = 7,
    Ptr64KernelCache = 8,
    Arm64eUserland = 9,
    Arm64eFirmware = 10,
    X86_64KernelCache = 11,
    Arm64eUserland24 = 12,
}

impl DyldPointerFormat {
    pub fn from_raw(value: u16) -> Option<DyldPointerFormat> {
        num::FromPrimitive::from_u16(value)
    }

    /// Bytes each unit of a record's `next` field advances.
    pub fn stride(&self) -> u64 {
        match self {
            DyldPointerFormat::Arm64e
            | DyldPointerFormat::Arm64eUserland
            | DyldPointerFormat::Arm64eUserland24 => 8,
            DyldPointerFormat::X86_64KernelCache => 1,
            _ => 4,
        }
    }

    /// Width of one pointer record in bytes.
    pub fn pointer_size(&self) -> usize {
        match self {
            DyldPointerFormat::Ptr32
            | DyldPointerFormat::Ptr32Cache
            | DyldPointerFormat::Ptr32Firmware => 4,
            _ => 8,
        }
    }

    /// Whether records in this format may bind to an import.
    pub fn supports_binds(&self) -> bool {
        matches!(
            self,
            DyldPointerFormat::Arm64e
                | DyldPointerFormat::Ptr64
                | DyldPointerFormat::Ptr32
                | DyldPointerFormat::Ptr64Offset
                | DyldPointerFormat::Arm64eUserland
                | DyldPointerFormat::Arm64eUserland24
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DyldFixupPACKey {
    IA = 0,
    IB = 1,
    DA = 2,
    DB = 3,
}

impl DyldFixupPACKey {
    pub fn from_bits(value: u64) -> DyldFixupPACKey {
        match value & 0b11 {
            0 => DyldFixupPACKey::IA,
            1 => DyldFixupPACKey::IB,
            2 => DyldFixupPACKey::DA,
            _ => DyldFixupPACKey::DB,
        }
    }
}

/// target:43 high8:8 next:11 bind:1 auth:1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldChainedPtrArm64eRebase {
    pub target: u64,
    pub high8: u8,
    pub next: u16,
}

impl DyldChainedPtrArm64eRebase {
    pub fn decode(raw: u64) -> Self {
        let [target, high8, next] = bits::split(raw, [43, 8, 11]);
        DyldChainedPtrArm64eRebase {
            target,
            high8: high8 as u8,
            next: next as u16,
        }
    }
}

/// ordinal:16 zero:16 addend:19 next:11 bind:1 auth:1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldChainedPtrArm64eBind {
    pub ordinal: u16,
    pub addend: i32,
    pub next: u16,
}

impl DyldChainedPtrArm64eBind {
    pub fn decode(raw: u64) -> Self {
        let [ordinal, _zero, addend, next] = bits::split(raw, [16, 16, 19, 11]);
        DyldChainedPtrArm64eBind {
            ordinal: ordinal as u16,
            addend: sign_extend(addend, 19) as i32,
            next: next as u16,
        }
    }
}

/// target:32 diversity:16 addrDiv:1 key:2 next:11 bind:1 auth:1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldChainedPtrArm64eAuthRebase {
    pub target: u32,
    pub diversity: u16,
    pub addr_div: bool,
    pub key: DyldFixupPACKey,
    pub next: u16,
}

impl DyldChainedPtrArm64eAuthRebase {
    pub fn decode(raw: u64) -> Self {
        let [target, diversity, addr_div, key, next] = bits::split(raw, [32, 16, 1, 2, 11]);
        DyldChainedPtrArm64eAuthRebase {
            target: target as u32,
            diversity: diversity as u16,
            addr_div: addr_div != 0,
            key: DyldFixupPACKey::from_bits(key),
            next: next as u16,
        }
    }
}

/// ordinal:16 zero:16 diversity:16 addrDiv:1 key:2 next:11 bind:1 auth:1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldChainedPtrArm64eAuthBind {
    pub ordinal: u16,
    pub diversity: u16,
    pub addr_div: bool,
    pub key: DyldFixupPACKey,
    pub next: u16,
}

impl DyldChainedPtrArm64eAuthBind {
    pub fn decode(raw: u64) -> Self {
        let [ordinal, _zero, diversity, addr_div, key, next] =
            bits::split(raw, [16, 16, 16, 1, 2, 11]);
        DyldChainedPtrArm64eAuthBind {
            ordinal: ordinal as u16,
            diversity: diversity as u16,
            addr_div: addr_div != 0,
            key: DyldFixupPACKey::from_bits(key),
            next: next as u16,
        }
    }
}

/// ordinal:24 zero:8 addend:19 next:11 bind:1 auth:1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldChainedPtrArm64eBind24 {
    pub ordinal: u32,
    pub addend: i32,
    pub next: u16,
}

impl DyldChainedPtrArm64eBind24 {
    pub fn decode(raw: u64) -> Self {
        let [ordinal, _zero, addend, next] = bits::split(raw, [24, 8, 19, 11]);
        DyldChainedPtrArm64eBind24 {
            ordinal: ordinal as u32,
            addend: sign_extend(addend, 19) as i32,
            next: next as u16,
        }
    }
}

/// ordinal:24 zero:8 diversity:16 addrDiv:1 key:2 next:11 bind:1 auth:1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldChainedPtrArm64eAuthBind24 {
    pub ordinal: u32,
    pub diversity: u16,
    pub addr_div: bool,
    pub key: DyldFixupPACKey,
    pub next: u16,
}

impl DyldChainedPtrArm64eAuthBind24 {
    pub fn decode(raw: u64) -> Self {
        let [ordinal, _zero, diversity, addr_div, key, next] =
            bits::split(raw, [24, 8, 16, 1, 2, 11]);
        DyldChainedPtrArm64eAuthBind24 {
            ordinal: ordinal as u32,
            diversity: diversity as u16,
            addr_div: addr_div != 0,
            key: DyldFixupPACKey::from_bits(key),
            next: next as u16,
        }
    }
}

/// target:36 high8:8 reserved:7 next:12 bind:1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldChainedPtr64Rebase {
    pub target: u64,
    pub high8: u8,
    pub next: u16,
}

impl DyldChainedPtr64Rebase {
    pub fn decode(raw: u64) -> Self {
        let [target, high8, _reserved, next] = bits::split(raw, [36, 8, 7, 12]);
        DyldChainedPtr64Rebase {
            target,
            high8: high8 as u8,
            next: next as u16,
        }
    }
}

/// ordinal:24 addend:8 reserved:19 next:12 bind:1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldChainedPtr64Bind {
    pub ordinal: u32,
    pub addend: u8,
    pub next: u16,
}

impl DyldChainedPtr64Bind {
    pub fn decode(raw: u64) -> Self {
        let [ordinal, addend, _reserved, next] = bits::split(raw, [24, 8, 19, 12]);
        DyldChainedPtr64Bind {
            ordinal: ordinal as u32,
            addend: addend as u8,
            next: next as u16,
        }
    }
}

/// target:30 cacheLevel:2 diversity:16 addrDiv:1 key:2 next:12 isAuth:1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldChainedPtr64KernelCacheRebase {
    pub target: u32,
    pub cache_level: u8,
    pub diversity: u16,
    pub addr_div: bool,
    pub key: DyldFixupPACKey,
    pub next: u16,
    pub is_auth: bool,
}

impl DyldChainedPtr64KernelCacheRebase {
    pub fn decode(raw: u64) -> Self {
        let [target, cache_level, diversity, addr_div, key, next, is_auth] =
            bits::split(raw, [30, 2, 16, 1, 2, 12, 1]);
        DyldChainedPtr64KernelCacheRebase {
            target: target as u32,
            cache_level: cache_level as u8,
            diversity: diversity as u16,
            addr_div: addr_div != 0,
            key: DyldFixupPACKey::from_bits(key),
            next: next as u16,
            is_auth: is_auth != 0,
        }
    }
}

/// target:26 next:5 bind:1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldChainedPtr32Rebase {
    pub target: u32,
    pub next: u8,
}

impl DyldChainedPtr32Rebase {
    pub fn decode(raw: u32) -> Self {
        let [target, next] = bits::split(raw as u64, [26, 5]);
        DyldChainedPtr32Rebase {
            target: target as u32,
            next: next as u8,
        }
    }
}

/// ordinal:20 addend:6 next:5 bind:1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldChainedPtr32Bind {
    pub ordinal: u32,
    pub addend: u8,
    pub next: u8,
}

impl DyldChainedPtr32Bind {
    pub fn decode(raw: u32) -> Self {
        let [ordinal, addend, next] = bits::split(raw as u64, [20, 6, 5]);
        DyldChainedPtr32Bind {
            ordinal: ordinal as u32,
            addend: addend as u8,
            next: next as u8,
        }
    }
}

/// target:30 next:2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldChainedPtr32CacheRebase {
    pub target: u32,
    pub next: u8,
}

impl DyldChainedPtr32CacheRebase {
    pub fn decode(raw: u32) -> Self {
        let [target, next] = bits::split(raw as u64, [30, 2]);
        DyldChainedPtr32CacheRebase {
            target: target as u32,
            next: next as u8,
        }
    }
}

/// target:26 next:6
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldChainedPtr32FirmwareRebase {
    pub target: u32,
    pub next: u8,
}

impl DyldChainedPtr32FirmwareRebase {
    pub fn decode(raw: u32) -> Self {
        let [target, next] = bits::split(raw as u64, [26, 6]);
        DyldChainedPtr32FirmwareRebase {
            target: target as u32,
            next: next as u8,
        }
    }
}

/// One decoded record of a fixup chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainedPointer {
    Arm64eRebase(DyldChainedPtrArm64eRebase),
    Arm64eBind(DyldChainedPtrArm64eBind),
    Arm64eAuthRebase(DyldChainedPtrArm64eAuthRebase),
    Arm64eAuthBind(DyldChainedPtrArm64eAuthBind),
    Arm64eBind24(DyldChainedPtrArm64eBind24),
    Arm64eAuthBind24(DyldChainedPtrArm64eAuthBind24),
    Ptr64Rebase(DyldChainedPtr64Rebase),
    Ptr64Bind(DyldChainedPtr64Bind),
    Ptr64KernelCacheRebase(DyldChainedPtr64KernelCacheRebase),
    Ptr32Rebase(DyldChainedPtr32Rebase),
    Ptr32Bind(DyldChainedPtr32Bind),
    Ptr32CacheRebase(DyldChainedPtr32CacheRebase),
    Ptr32FirmwareRebase(DyldChainedPtr32FirmwareRebase),
}

impl ChainedPointer {
    /// Decodes `raw` with the shape `format` selects. For 32-bit formats only
    /// the low 32 bits are used.
    pub fn decode(format: DyldPointerFormat, raw: u64) -> ChainedPointer {
        match format {
            DyldPointerFormat::Arm64e
            | DyldPointerFormat::Arm64eKernel
            | DyldPointerFormat::Arm64eUserland
            | DyldPointerFormat::Arm64eFirmware => {
                let bind = (raw >> 62) & 1 == 1;
                let auth = (raw >> 63) & 1 == 1;
                match (bind, auth) {
                    (true, true) => {
                        ChainedPointer::Arm64eAuthBind(DyldChainedPtrArm64eAuthBind::decode(raw))
                    }
                    (true, false) => {
                        ChainedPointer::Arm64eBind(DyldChainedPtrArm64eBind::decode(raw))
                    }
                    (false, true) => ChainedPointer::Arm64eAuthRebase(
                        DyldChainedPtrArm64eAuthRebase::decode(raw),
                    ),
                    (false, false) => {
                        ChainedPointer::Arm64eRebase(DyldChainedPtrArm64eRebase::decode(raw))
                    }
                }
            }
            DyldPointerFormat::Arm64eUserland24 => {
                let bind = (raw >> 62) & 1 == 1;
                let auth = (raw >> 63) & 1 == 1;
                match (bind, auth) {
                    (true, true) => ChainedPointer::Arm64eAuthBind24(
                        DyldChainedPtrArm64eAuthBind24::decode(raw),
                    ),
                    (true, false) => {
                        ChainedPointer::Arm64eBind24(DyldChainedPtrArm64eBind24::decode(raw))
                    }
                    (false, true) => ChainedPointer::Arm64eAuthRebase(
                        DyldChainedPtrArm64eAuthRebase::decode(raw),
                    ),
                    (false, false) => {
                        ChainedPointer::Arm64eRebase(DyldChainedPtrArm64eRebase::decode(raw))
                    }
                }
            }
            DyldPointerFormat::Ptr64 | DyldPointerFormat::Ptr64Offset => {
                if (raw >> 63) & 1 == 1 {
                    ChainedPointer::Ptr64Bind(DyldChainedPtr64Bind::decode(raw))
                } else {
                    ChainedPointer::Ptr64Rebase(DyldChainedPtr64Rebase::decode(raw))
                }
            }
            DyldPointerFormat::Ptr64KernelCache | DyldPointerFormat::X86_64KernelCache => {
                ChainedPointer::Ptr64KernelCacheRebase(DyldChainedPtr64KernelCacheRebase::decode(
                    raw,
                ))
            }
            DyldPointerFormat::Ptr32 => {
                let raw = raw as u32;
                if (raw >> 31) & 1 == 1 {
                    ChainedPointer::Ptr32Bind(DyldChainedPtr32Bind::decode(raw))
                } else {
                    ChainedPointer::Ptr32Rebase(DyldChainedPtr32Rebase::decode(raw))
                }
            }
            DyldPointerFormat::Ptr32Cache => {
                ChainedPointer::Ptr32CacheRebase(DyldChainedPtr32CacheRebase::decode(raw as u32))
            }
            DyldPointerFormat::Ptr32Firmware => ChainedPointer::Ptr32FirmwareRebase(
                DyldChainedPtr32FirmwareRebase::decode(raw as u32),
            ),
        }
    }

    /// Stride count to the next record, zero at the end of a chain.
    pub fn next(&self) -> u64 {
        match self {
            ChainedPointer::Arm64eRebase(p) => p.next as u64,
            ChainedPointer::Arm64eBind(p) => p.next as u64,
            ChainedPointer::Arm64eAuthRebase(p) => p.next as u64,
            ChainedPointer::Arm64eAuthBind(p) => p.next as u64,
            ChainedPointer::Arm64eBind24(p) => p.next as u64,
            ChainedPointer::Arm64eAuthBind24(p) => p.next as u64,
            ChainedPointer::Ptr64Rebase(p) => p.next as u64,
            ChainedPointer::Ptr64Bind(p) => p.next as u64,
            ChainedPointer::Ptr64KernelCacheRebase(p) => p.next as u64,
            ChainedPointer::Ptr32Rebase(p) => p.next as u64,
            ChainedPointer::Ptr32Bind(p) => p.next as u64,
            ChainedPointer::Ptr32CacheRebase(p) => p.next as u64,
            ChainedPointer::Ptr32FirmwareRebase(p) => p.next as u64,
        }
    }

    pub fn is_bind(&self) -> bool {
        self.bind_ordinal().is_some()
    }

    pub fn is_auth(&self) -> bool {
        match self {
            ChainedPointer::Arm64eAuthRebase(_)
            | ChainedPointer::Arm64eAuthBind(_)
            | ChainedPointer::Arm64eAuthBind24(_) => true,
            ChainedPointer::Ptr64KernelCacheRebase(p) => p.is_auth,
            _ => false,
        }
    }

    /// Index into the imports table for bind records.
    pub fn bind_ordinal(&self) -> Option<u32> {
        match self {
            ChainedPointer::Arm64eBind(p) => Some(p.ordinal as u32),
            ChainedPointer::Arm64eAuthBind(p) => Some(p.ordinal as u32),
            ChainedPointer::Arm64eBind24(p) => Some(p.ordinal),
            ChainedPointer::Arm64eAuthBind24(p) => Some(p.ordinal),
            ChainedPointer::Ptr64Bind(p) => Some(p.ordinal),
            ChainedPointer::Ptr32Bind(p) => Some(p.ordinal),
            _ => None,
        }
    }

    /// Inline addend of bind records that carry one.
    pub fn addend(&self) -> Option<i64> {
        match self {
            ChainedPointer::Arm64eBind(p) => Some(p.addend as i64),
            ChainedPointer::Arm64eBind24(p) => Some(p.addend as i64),
            ChainedPointer::Ptr64Bind(p) => Some(p.addend as i64),
            ChainedPointer::Ptr32Bind(p) => Some(p.addend as i64),
            ChainedPointer::Arm64eAuthBind(_) | ChainedPointer::Arm64eAuthBind24(_) => Some(0),
            _ => None,
        }
    }

    /// Rebase target with `high8` folded back into the top byte. Whether it is
    /// a vm address or an offset from the image base depends on the format.
    pub fn rebase_target(&self) -> Option<u64> {
        match self {
            ChainedPointer::Arm64eRebase(p) => Some(p.target | ((p.high8 as u64) << 56)),
            ChainedPointer::Arm64eAuthRebase(p) => Some(p.target as u64),
            ChainedPointer::Ptr64Rebase(p) => Some(p.target | ((p.high8 as u64) << 56)),
            ChainedPointer::Ptr64KernelCacheRebase(p) => Some(p.target as u64),
            ChainedPointer::Ptr32Rebase(p) => Some(p.target as u64),
            ChainedPointer::Ptr32CacheRebase(p) => Some(p.target as u64),
            ChainedPointer::Ptr32FirmwareRebase(p) => Some(p.target as u64),
            _ => None,
        }
    }
}

/// Library an import binds against. Small negative ordinals select a lookup
/// strategy instead of a dylib.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryOrdinal {
    SelfImage,
    MainExecutable,
    FlatLookup,
    WeakLookup,
    /// 1-based index into the image's dylib load commands.
    Dylib(u32),
    Unknown(i64),
}

impl LibraryOrdinal {
    /// Interprets an ordinal field that is `width` bits wide.
    pub fn from_raw(value: u64, width: u32) -> LibraryOrdinal {
        let special = sign_extend(value, width);
        match special {
            0 => LibraryOrdinal::SelfImage,
            -1 => LibraryOrdinal::MainExecutable,
            -2 => LibraryOrdinal::FlatLookup,
            -3 => LibraryOrdinal::WeakLookup,
            -15..=-4 => LibraryOrdinal::Unknown(special),
            _ => LibraryOrdinal::Dylib(value as u32),
        }
    }
}

/// One entry of the imports table with its names resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedImport {
    pub lib_ordinal: u32,
    pub library: LibraryOrdinal,
    pub weak_import: bool,
    pub name_offset: u32,
    pub addend: i64,
    /// Last path component of the dylib for positive ordinals in range.
    pub dylib_name: Option<String>,
    pub symbol_name: String,
}

impl DyldChainedImport {
    /// Decodes the entry at `offset` of `imports`. `symbols` covers the
    /// symbol pool and `dylibs` lists the short names of the image's dylib
    /// imports in load-command order.
    pub fn parse(
        imports: &Decoder,
        offset: usize,
        format: DyldImportFormat,
        symbols: &Decoder,
        dylibs: &[&str],
    ) -> MachOResult<Self> {
        let (lib_ordinal, library, weak_import, name_offset, addend) = match format {
            DyldImportFormat::Import | DyldImportFormat::ImportAddend => {
                let value: u32 = imports.decode_at(offset)?;
                let [lib_ordinal, weak, name_offset] = bits::split(value as u64, [8, 1, 23]);
                let addend = match format {
                    DyldImportFormat::ImportAddend => imports.decode_at::<i32>(offset + 4)? as i64,
                    _ => 0,
                };
                (
                    lib_ordinal as u32,
                    LibraryOrdinal::from_raw(lib_ordinal, 8),
                    weak != 0,
                    name_offset as u32,
                    addend,
                )
            }
            DyldImportFormat::ImportAddend64 => {
                let value: u64 = imports.decode_at(offset)?;
                let [lib_ordinal, weak, _reserved, name_offset] =
                    bits::split(value, [16, 1, 15, 32]);
                let addend: u64 = imports.decode_at(offset + 8)?;
                (
                    lib_ordinal as u32,
                    LibraryOrdinal::from_raw(lib_ordinal, 16),
                    weak != 0,
                    name_offset as u32,
                    addend as i64,
                )
            }
        };

        let dylib_name = match library {
            LibraryOrdinal::Dylib(ordinal) => (ordinal as usize)
                .checked_sub(1)
                .and_then(|index| dylibs.get(index))
                .map(|name| name.to_string()),
            _ => None,
        };
        let symbol_name = symbols.decode_string_at(name_offset as usize, symbols.len())?;

        Ok(DyldChainedImport {
            lib_ordinal,
            library,
            weak_import,
            name_offset,
            addend,
            dylib_name,
            symbol_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::ByteOrder;
    use crate::testutil::{fixups_blob, FixupsBlobSpec, ImportSpec, StartsSpec};

    #[test]
    fn test_header() {
        let blob = fixups_blob(
            ByteOrder::Little,
            &FixupsBlobSpec::new(vec![None, None]).import(ImportSpec::new(1, "_printf")),
        );
        let decoder = Decoder::new(&blob, ByteOrder::Little);
        let header = DyldChainedFixupsHeader::parse(&decoder, 0).unwrap();
        assert_eq!(header.fixups_version, 0);
        assert_eq!(header.starts_offset, 0x20);
        assert_eq!(header.imports_count, 1);
        assert_eq!(header.imports_format, DyldImportFormat::Import);
        assert_eq!(header.symbols_format, DyldSymbolsFormat::Uncompressed);

        let starts = DyldStartsInImage::parse(&decoder, header.starts_offset as usize).unwrap();
        assert_eq!(starts.seg_count, 2);
        assert_eq!(starts.seg_info_offset, vec![0, 0]);
    }

    #[test]
    fn test_header_bad_imports_format() {
        let mut blob = fixups_blob(ByteOrder::Little, &FixupsBlobSpec::new(vec![None]));
        blob[20..24].copy_from_slice(&9u32.to_le_bytes());
        let decoder = Decoder::new(&blob, ByteOrder::Little);
        assert!(matches!(
            DyldChainedFixupsHeader::parse(&decoder, 0),
            Err(MachOErr::InvalidValue(_))
        ));
    }

    #[test]
    fn test_starts_in_segment() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let spec = FixupsBlobSpec::new(vec![
                None,
                Some(StartsSpec::new(2, 0x4000, 0x4000, vec![0, 0xffff, 0x18])),
            ]);
            let blob = fixups_blob(order, &spec);
            let decoder = Decoder::new(&blob, order);
            let header = DyldChainedFixupsHeader::parse(&decoder, 0).unwrap();
            let starts = DyldStartsInImage::parse(&decoder, header.starts_offset as usize).unwrap();
            assert_eq!(starts.seg_info_offset[0], 0);

            let offset = (header.starts_offset + starts.seg_info_offset[1]) as usize;
            let segment = DyldStartsInSegment::parse(&decoder, offset).unwrap();
            assert_eq!(segment.size, 28);
            assert_eq!(segment.page_size, 0x4000);
            assert_eq!(segment.format(), Some(DyldPointerFormat::Ptr64));
            assert_eq!(segment.segment_offset, 0x4000);
            assert_eq!(segment.page_count, 3);
            assert_eq!(segment.page_start, vec![0, 0xffff, 0x18]);
            assert!(segment.overflow.is_empty());
            assert_eq!(segment.chain_starts(0), vec![0]);
            assert!(segment.chain_starts(1).is_empty());
            assert_eq!(segment.chain_starts(2), vec![0x18]);
            assert!(segment.chain_starts(3).is_empty());
        }
    }

    #[test]
    fn test_multi_start_page() {
        let spec = FixupsBlobSpec::new(vec![Some(
            StartsSpec::new(3, 0x1000, 0, vec![0x8000 | 1]).overflow(vec![0x10, 0x8000 | 0x40]),
        )]);
        let blob = fixups_blob(ByteOrder::Little, &spec);
        let decoder = Decoder::new(&blob, ByteOrder::Little);
        let starts = DyldStartsInImage::parse(&decoder, 0x20).unwrap();
        let segment =
            DyldStartsInSegment::parse(&decoder, 0x20 + starts.seg_info_offset[0] as usize)
                .unwrap();
        assert_eq!(segment.overflow, vec![0x10, 0x8040]);
        assert_eq!(segment.chain_starts(0), vec![0x10, 0x40]);
    }

    #[test]
    fn test_multi_start_needs_32_bit_format() {
        let spec = FixupsBlobSpec::new(vec![Some(
            StartsSpec::new(2, 0x1000, 0, vec![0x8000 | 1]).overflow(vec![0x10, 0x8000 | 0x40]),
        )]);
        let blob = fixups_blob(ByteOrder::Little, &spec);
        let decoder = Decoder::new(&blob, ByteOrder::Little);
        let starts = DyldStartsInImage::parse(&decoder, 0x20).unwrap();
        let segment =
            DyldStartsInSegment::parse(&decoder, 0x20 + starts.seg_info_offset[0] as usize)
                .unwrap();
        assert!(segment.overflow.is_empty());
        assert_eq!(segment.chain_starts(0), vec![0x8001]);
    }

    #[test]
    fn test_unknown_pointer_format_is_kept() {
        let spec = FixupsBlobSpec::new(vec![Some(StartsSpec::new(99, 0x4000, 0, vec![0]))]);
        let blob = fixups_blob(ByteOrder::Little, &spec);
        let decoder = Decoder::new(&blob, ByteOrder::Little);
        let starts = DyldStartsInImage::parse(&decoder, 0x20).unwrap();
        let segment =
            DyldStartsInSegment::parse(&decoder, 0x20 + starts.seg_info_offset[0] as usize)
                .unwrap();
        assert_eq!(segment.pointer_format, 99);
        assert_eq!(segment.format(), None);
    }

    #[test]
    fn test_pointer_format_properties() {
        assert_eq!(DyldPointerFormat::Arm64e.stride(), 8);
        assert_eq!(DyldPointerFormat::Arm64eUserland24.stride(), 8);
        assert_eq!(DyldPointerFormat::Ptr64.stride(), 4);
        assert_eq!(DyldPointerFormat::Ptr32Firmware.stride(), 4);
        assert_eq!(DyldPointerFormat::X86_64KernelCache.stride(), 1);
        assert_eq!(DyldPointerFormat::Ptr32.pointer_size(), 4);
        assert_eq!(DyldPointerFormat::Ptr64Offset.pointer_size(), 8);
        assert!(!DyldPointerFormat::Arm64eKernel.supports_binds());
        assert!(DyldPointerFormat::Arm64eUserland24.supports_binds());
        assert_eq!(DyldPointerFormat::from_raw(13), None);
    }

    #[test]
    fn test_ptr64_records() {
        let bind = ChainedPointer::decode(DyldPointerFormat::Ptr64, (1 << 63) | (2 << 51) | (5 << 24) | 7);
        assert_eq!(
            bind,
            ChainedPointer::Ptr64Bind(DyldChainedPtr64Bind {
                ordinal: 7,
                addend: 5,
                next: 2
            })
        );
        assert!(bind.is_bind());
        assert_eq!(bind.addend(), Some(5));

        let rebase =
            ChainedPointer::decode(DyldPointerFormat::Ptr64Offset, (3 << 51) | (0x80 << 36) | 0x4020);
        assert!(!rebase.is_bind());
        assert_eq!(rebase.next(), 3);
        assert_eq!(rebase.rebase_target(), Some(0x8000_0000_0000_4020));
        assert_eq!(rebase.bind_ordinal(), None);
    }

    #[test]
    fn test_arm64e_records() {
        let raw = (1u64 << 63) | (1 << 62) | (5 << 51) | (2 << 49) | (1 << 48) | (0x1234 << 32) | 3;
        let pointer = ChainedPointer::decode(DyldPointerFormat::Arm64e, raw);
        assert_eq!(
            pointer,
            ChainedPointer::Arm64eAuthBind(DyldChainedPtrArm64eAuthBind {
                ordinal: 3,
                diversity: 0x1234,
                addr_div: true,
                key: DyldFixupPACKey::DA,
                next: 5,
            })
        );
        assert!(pointer.is_auth());

        // addend of -1 in 19 bits
        let raw = (1u64 << 62) | (0x7ffff << 32) | 9;
        let pointer = ChainedPointer::decode(DyldPointerFormat::Arm64eUserland, raw);
        assert_eq!(pointer.bind_ordinal(), Some(9));
        assert_eq!(pointer.addend(), Some(-1));

        let raw = (1u64 << 62) | (4 << 51) | 0x123456;
        let pointer = ChainedPointer::decode(DyldPointerFormat::Arm64eUserland24, raw);
        assert!(matches!(pointer, ChainedPointer::Arm64eBind24(_)));
        assert_eq!(pointer.bind_ordinal(), Some(0x123456));
        assert_eq!(pointer.next(), 4);

        let raw = (1u64 << 63) | (1 << 51) | 0x4000;
        let pointer = ChainedPointer::decode(DyldPointerFormat::Arm64eUserland24, raw);
        assert!(matches!(pointer, ChainedPointer::Arm64eAuthRebase(_)));
        assert_eq!(pointer.rebase_target(), Some(0x4000));

        let raw = (0x12u64 << 43) | 0x8000;
        let pointer = ChainedPointer::decode(DyldPointerFormat::Arm64e, raw);
        assert_eq!(pointer.rebase_target(), Some(0x1200_0000_0000_8000));
        assert_eq!(pointer.next(), 0);
    }

    #[test]
    fn test_32_bit_records() {
        let pointer = ChainedPointer::decode(DyldPointerFormat::Ptr32, (1 << 31) | (3 << 26) | (2 << 20) | 4);
        assert_eq!(
            pointer,
            ChainedPointer::Ptr32Bind(DyldChainedPtr32Bind {
                ordinal: 4,
                addend: 2,
                next: 3
            })
        );

        let pointer = ChainedPointer::decode(DyldPointerFormat::Ptr32Cache, (1 << 30) | 0x1000);
        assert_eq!(pointer.next(), 1);
        assert_eq!(pointer.rebase_target(), Some(0x1000));

        let pointer = ChainedPointer::decode(DyldPointerFormat::Ptr32Firmware, (0x21 << 26) | 0x20);
        assert_eq!(pointer.next(), 0x21);
        assert_eq!(pointer.rebase_target(), Some(0x20));
    }

    #[test]
    fn test_kernel_cache_record() {
        let raw = (1u64 << 63) | (2 << 51) | (1 << 49) | (0xbeef << 32) | (1 << 30) | 0x100;
        let pointer = ChainedPointer::decode(DyldPointerFormat::Ptr64KernelCache, raw);
        assert_eq!(
            pointer,
            ChainedPointer::Ptr64KernelCacheRebase(DyldChainedPtr64KernelCacheRebase {
                target: 0x100,
                cache_level: 1,
                diversity: 0xbeef,
                addr_div: false,
                key: DyldFixupPACKey::IB,
                next: 2,
                is_auth: true,
            })
        );
        assert!(!pointer.is_bind());
    }

    #[test]
    fn test_library_ordinals() {
        assert_eq!(LibraryOrdinal::from_raw(0, 8), LibraryOrdinal::SelfImage);
        assert_eq!(LibraryOrdinal::from_raw(0xff, 8), LibraryOrdinal::MainExecutable);
        assert_eq!(LibraryOrdinal::from_raw(0xfe, 8), LibraryOrdinal::FlatLookup);
        assert_eq!(LibraryOrdinal::from_raw(0xfd, 8), LibraryOrdinal::WeakLookup);
        assert_eq!(LibraryOrdinal::from_raw(0xfffd, 16), LibraryOrdinal::WeakLookup);
        assert_eq!(LibraryOrdinal::from_raw(0xf8, 8), LibraryOrdinal::Unknown(-8));
        assert_eq!(LibraryOrdinal::from_raw(0x80, 8), LibraryOrdinal::Dylib(0x80));
        assert_eq!(LibraryOrdinal::from_raw(2, 8), LibraryOrdinal::Dylib(2));
    }

    fn imports_of(spec: &FixupsBlobSpec, dylibs: &[&str]) -> MachOResult<Vec<DyldChainedImport>> {
        let blob = fixups_blob(ByteOrder::Little, spec);
        let decoder = Decoder::new(&blob, ByteOrder::Little);
        let header = DyldChainedFixupsHeader::parse(&decoder, 0)?;
        let symbols = decoder.sub_decoder(header.symbols_offset as usize, None)?;
        (0..header.imports_count as usize)
            .map(|index| {
                DyldChainedImport::parse(
                    &decoder,
                    header.imports_offset as usize + index * header.imports_format.entry_size(),
                    header.imports_format,
                    &symbols,
                    dylibs,
                )
            })
            .collect()
    }

    #[test]
    fn test_imports() {
        let spec = FixupsBlobSpec::new(vec![None])
            .import(ImportSpec::new(1, "_printf"))
            .import(ImportSpec::new(2, "_objc_msgSend").weak())
            .import(ImportSpec::new(0xfe, "_flat"))
            .import(ImportSpec::new(7, "_missing"));
        let imports = imports_of(&spec, &["libSystem.B.dylib", "libobjc.A.dylib"]).unwrap();

        assert_eq!(imports.len(), 4);
        assert_eq!(imports[0].symbol_name, "_printf");
        assert_eq!(imports[0].dylib_name.as_deref(), Some("libSystem.B.dylib"));
        assert!(!imports[0].weak_import);
        assert_eq!(imports[1].symbol_name, "_objc_msgSend");
        assert_eq!(imports[1].dylib_name.as_deref(), Some("libobjc.A.dylib"));
        assert!(imports[1].weak_import);
        assert_eq!(imports[2].library, LibraryOrdinal::FlatLookup);
        assert_eq!(imports[2].dylib_name, None);
        assert_eq!(imports[3].library, LibraryOrdinal::Dylib(7));
        assert_eq!(imports[3].dylib_name, None);
        assert_eq!(imports[3].symbol_name, "_missing");
    }

    #[test]
    fn test_imports_with_addends() {
        let spec = FixupsBlobSpec::new(vec![None])
            .import_format(2)
            .import(ImportSpec::new(1, "_a").addend(-16));
        let imports = imports_of(&spec, &["libA.dylib"]).unwrap();
        assert_eq!(imports[0].addend, -16);
        assert_eq!(imports[0].symbol_name, "_a");

        let spec = FixupsBlobSpec::new(vec![None])
            .import_format(3)
            .import(ImportSpec::new(0xffff, "_main_sym").addend(0x100))
            .import(ImportSpec::new(1, "_b"));
        let imports = imports_of(&spec, &["libA.dylib"]).unwrap();
        assert_eq!(imports[0].library, LibraryOrdinal::MainExecutable);
        assert_eq!(imports[0].addend, 0x100);
        assert_eq!(imports[1].dylib_name.as_deref(), Some("libA.dylib"));
        assert_eq!(imports[1].symbol_name, "_b");
    }
}
