//! Builders for synthetic images used by the unit tests.

use crate::{
    command::{LCLoadCommand, LoadCommandBase, LoadCommandParser, RawCommand},
    decoder::{ByteOrder, Decoder},
    macho::MachOResult,
};

/// Bind bit of a `DYLD_CHAINED_PTR_64` record.
pub const BIND: u64 = 1 << 63;
/// `next` of 2 in a `DYLD_CHAINED_PTR_64` record, i.e. the following 8 bytes.
pub const PTR64_NEXT: u64 = 2 << 51;

const MH_MAGIC_64: u32 = 0xfeedfacf;
const CPU_TYPE_ARM64: u32 = 0x0100000c;

struct Writer {
    order: ByteOrder,
    buf: Vec<u8>,
}

impl Writer {
    fn new(order: ByteOrder) -> Self {
        Writer {
            order,
            buf: Vec::new(),
        }
    }

    fn u16(&mut self, value: u16) -> &mut Self {
        match self.order {
            ByteOrder::Little => self.buf.extend_from_slice(&value.to_le_bytes()),
            ByteOrder::Big => self.buf.extend_from_slice(&value.to_be_bytes()),
        }
        self
    }

    fn u32(&mut self, value: u32) -> &mut Self {
        match self.order {
            ByteOrder::Little => self.buf.extend_from_slice(&value.to_le_bytes()),
            ByteOrder::Big => self.buf.extend_from_slice(&value.to_be_bytes()),
        }
        self
    }

    fn u64(&mut self, value: u64) -> &mut Self {
        match self.order {
            ByteOrder::Little => self.buf.extend_from_slice(&value.to_le_bytes()),
            ByteOrder::Big => self.buf.extend_from_slice(&value.to_be_bytes()),
        }
        self
    }

    fn word(&mut self, is_64: bool, value: u64) -> &mut Self {
        if is_64 {
            self.u64(value)
        } else {
            self.u32(value as u32)
        }
    }

    fn name16(&mut self, name: &str) -> &mut Self {
        let mut bytes = [0u8; 16];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        self.buf.extend_from_slice(&bytes);
        self
    }

    fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    fn align(&mut self, alignment: usize) -> &mut Self {
        while self.buf.len() % alignment != 0 {
            self.buf.push(0);
        }
        self
    }

    fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

pub fn words(order: ByteOrder, values: &[u32]) -> Vec<u8> {
    let mut writer = Writer::new(order);
    for value in values {
        writer.u32(*value);
    }
    writer.finish()
}

pub fn dwords(order: ByteOrder, values: &[u64]) -> Vec<u8> {
    let mut writer = Writer::new(order);
    for value in values {
        writer.u64(*value);
    }
    writer.finish()
}

/// `cmd`, `cmdsize` and `payload`, without padding.
pub fn command_bytes(order: ByteOrder, cmd: u32, payload: &[u8]) -> Vec<u8> {
    Writer::new(order)
        .u32(cmd)
        .u32((LoadCommandBase::SIZE + payload.len()) as u32)
        .bytes(payload)
        .finish()
}

/// Runs one shape decoder over a command built from `payload`.
pub fn parse_command<C: LoadCommandParser>(
    order: ByteOrder,
    cmd: LCLoadCommand,
    payload: &[u8],
) -> MachOResult<C> {
    let bytes = command_bytes(order, cmd as u32, payload);
    let raw = RawCommand {
        base: LoadCommandBase {
            cmd: cmd as u32,
            cmdsize: bytes.len() as u32,
            offset: 0,
        },
        cmd,
        decoder: Decoder::new(&bytes, order),
        is_64: true,
    };
    C::parse(&raw)
}

/// Payload of a command made of an `lc_str` offset, `prefix` words and a
/// trailing string, padded so the command size is a multiple of 8.
pub fn lc_str_payload(order: ByteOrder, prefix: &[u32], string: &str) -> Vec<u8> {
    let offset = (LoadCommandBase::SIZE + 4 + 4 * prefix.len()) as u32;
    let mut writer = Writer::new(order);
    writer.u32(offset);
    for word in prefix {
        writer.u32(*word);
    }
    writer.bytes(string.as_bytes()).bytes(&[0]);
    while (LoadCommandBase::SIZE + writer.buf.len()) % 8 != 0 {
        writer.bytes(&[0]);
    }
    writer.finish()
}

/// Dylib command payload with a timestamp of 2.
pub fn dylib_payload(order: ByteOrder, name: &str, current: u32, compatibility: u32) -> Vec<u8> {
    lc_str_payload(order, &[2, current, compatibility], name)
}

#[derive(Debug, Clone)]
pub struct SegmentSpec {
    name: String,
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
    prot: u32,
    nsects: Option<u32>,
    sections: Vec<(String, u64, u64, u32)>,
}

impl SegmentSpec {
    pub fn new(name: &str, vmaddr: u64, vmsize: u64, fileoff: u64, filesize: u64) -> Self {
        SegmentSpec {
            name: name.to_string(),
            vmaddr,
            vmsize,
            fileoff,
            filesize,
            prot: 0,
            nsects: None,
            sections: Vec::new(),
        }
    }

    /// Sets both `maxprot` and `initprot`.
    pub fn prot(mut self, prot: u32) -> Self {
        self.prot = prot;
        self
    }

    pub fn section(mut self, name: &str, addr: u64, size: u64, flags: u32) -> Self {
        self.sections.push((name.to_string(), addr, size, flags));
        self
    }

    /// Writes `nsects` instead of the number of sections.
    pub fn nsects_override(mut self, nsects: u32) -> Self {
        self.nsects = Some(nsects);
        self
    }
}

pub fn segment_payload(order: ByteOrder, is_64: bool, spec: &SegmentSpec) -> Vec<u8> {
    let mut writer = Writer::new(order);
    writer
        .name16(&spec.name)
        .word(is_64, spec.vmaddr)
        .word(is_64, spec.vmsize)
        .word(is_64, spec.fileoff)
        .word(is_64, spec.filesize)
        .u32(spec.prot)
        .u32(spec.prot)
        .u32(spec.nsects.unwrap_or(spec.sections.len() as u32))
        .u32(0);

    for (name, addr, size, flags) in &spec.sections {
        let offset = addr.wrapping_sub(spec.vmaddr).wrapping_add(spec.fileoff) as u32;
        writer
            .name16(name)
            .name16(&spec.name)
            .word(is_64, *addr)
            .word(is_64, *size)
            .u32(offset)
            .u32(2)
            .u32(0)
            .u32(0)
            .u32(*flags)
            .u32(0)
            .u32(0);
        if is_64 {
            writer.u32(0);
        }
    }
    writer.finish()
}

/// Big-endian fat file holding `slices` of `(cputype, cpusubtype, bytes)`,
/// laid out back to back after the arch table.
pub fn fat_image(is_64: bool, slices: &[(u32, u32, &[u8])]) -> Vec<u8> {
    let entry_size = if is_64 { 32 } else { 20 };
    let mut offset = (8 + entry_size * slices.len()) as u64;

    let mut writer = Writer::new(ByteOrder::Big);
    writer
        .u32(if is_64 { 0xcafebabf } else { 0xcafebabe })
        .u32(slices.len() as u32);
    for (cputype, cpusubtype, bytes) in slices {
        writer.u32(*cputype).u32(*cpusubtype);
        if is_64 {
            writer.u64(offset).u64(bytes.len() as u64).u32(0).u32(0);
        } else {
            writer.u32(offset as u32).u32(bytes.len() as u32).u32(0);
        }
        offset += bytes.len() as u64;
    }
    for (_, _, bytes) in slices {
        writer.bytes(bytes);
    }
    writer.finish()
}

/// A 64-bit Mach-O image assembled from load commands and data patches.
pub struct ImageBuilder {
    order: ByteOrder,
    cputype: u32,
    commands: Vec<Vec<u8>>,
    patches: Vec<(usize, Vec<u8>)>,
}

impl ImageBuilder {
    pub fn new(order: ByteOrder) -> Self {
        ImageBuilder {
            order,
            cputype: CPU_TYPE_ARM64,
            commands: Vec::new(),
            patches: Vec::new(),
        }
    }

    pub fn cputype(mut self, cputype: u32) -> Self {
        self.cputype = cputype;
        self
    }

    pub fn raw_command(mut self, cmd: u32, payload: &[u8]) -> Self {
        self.commands.push(command_bytes(self.order, cmd, payload));
        self
    }

    pub fn command(self, cmd: LCLoadCommand, payload: &[u8]) -> Self {
        self.raw_command(cmd as u32, payload)
    }

    pub fn segment(self, spec: &SegmentSpec) -> Self {
        let payload = segment_payload(self.order, true, spec);
        self.command(LCLoadCommand::LcSegment64, &payload)
    }

    pub fn dylib(self, path: &str) -> Self {
        let payload = dylib_payload(self.order, path, 0x00010000, 0x00010000);
        self.command(LCLoadCommand::LcLoadDylib, &payload)
    }

    /// Places `bytes` at file offset `offset`.
    pub fn data(mut self, offset: usize, bytes: &[u8]) -> Self {
        self.patches.push((offset, bytes.to_vec()));
        self
    }

    /// Places a chained pointer of `width` bytes at `offset`.
    pub fn pointer(self, offset: u64, width: usize, value: u64) -> Self {
        let bytes = match width {
            4 => words(self.order, &[value as u32]),
            _ => dwords(self.order, &[value]),
        };
        self.data(offset as usize, &bytes)
    }

    pub fn build(&self) -> Vec<u8> {
        let sizeofcmds: usize = self.commands.iter().map(Vec::len).sum();
        let mut writer = Writer::new(self.order);
        writer
            .u32(MH_MAGIC_64)
            .u32(self.cputype)
            .u32(0)
            .u32(0x2)
            .u32(self.commands.len() as u32)
            .u32(sizeofcmds as u32)
            .u32(0x00200085)
            .u32(0);
        for command in &self.commands {
            writer.bytes(command);
        }

        let mut image = writer.finish();
        for (offset, bytes) in &self.patches {
            let end = offset + bytes.len();
            if image.len() < end {
                image.resize(end, 0);
            }
            image[*offset..end].copy_from_slice(bytes);
        }
        image
    }
}

#[derive(Debug, Clone)]
pub struct StartsSpec {
    pointer_format: u16,
    page_size: u16,
    segment_offset: u64,
    page_start: Vec<u16>,
    overflow: Vec<u16>,
}

impl StartsSpec {
    pub fn new(pointer_format: u16, page_size: u16, segment_offset: u64, page_start: Vec<u16>) -> Self {
        StartsSpec {
            pointer_format,
            page_size,
            segment_offset,
            page_start,
            overflow: Vec::new(),
        }
    }

    /// Multi-start entries stored after `page_start`.
    pub fn overflow(mut self, overflow: Vec<u16>) -> Self {
        self.overflow = overflow;
        self
    }

    fn pointer_width(&self) -> usize {
        match self.pointer_format {
            3..=5 => 4,
            _ => 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportSpec {
    lib_ordinal: u32,
    weak: bool,
    addend: i64,
    name: &'static str,
}

impl ImportSpec {
    pub fn new(lib_ordinal: u32, name: &'static str) -> Self {
        ImportSpec {
            lib_ordinal,
            weak: false,
            addend: 0,
            name,
        }
    }

    pub fn weak(mut self) -> Self {
        self.weak = true;
        self
    }

    pub fn addend(mut self, addend: i64) -> Self {
        self.addend = addend;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FixupsBlobSpec {
    segments: Vec<Option<StartsSpec>>,
    imports: Vec<ImportSpec>,
    imports_format: u32,
    symbols_format: u32,
}

impl FixupsBlobSpec {
    /// One entry per segment; `None` writes a zero starts offset.
    pub fn new(segments: Vec<Option<StartsSpec>>) -> Self {
        FixupsBlobSpec {
            segments,
            imports: Vec::new(),
            imports_format: 1,
            symbols_format: 0,
        }
    }

    pub fn import(mut self, import: ImportSpec) -> Self {
        self.imports.push(import);
        self
    }

    pub fn import_format(mut self, format: u32) -> Self {
        self.imports_format = format;
        self
    }

    pub fn symbols_format(mut self, format: u32) -> Self {
        self.symbols_format = format;
        self
    }

    fn pointer_width(&self) -> usize {
        self.segments
            .iter()
            .flatten()
            .map(StartsSpec::pointer_width)
            .next()
            .unwrap_or(8)
    }
}

/// Encodes a chained fixups payload. The starts table sits at 0x20, followed
/// by the per-segment starts, the imports and the symbol pool.
pub fn fixups_blob(order: ByteOrder, spec: &FixupsBlobSpec) -> Vec<u8> {
    const STARTS_OFFSET: usize = 0x20;

    let mut starts = Writer::new(order);
    let table_size = 4 + 4 * spec.segments.len();
    let mut records = Writer::new(order);
    let mut seg_info_offsets = Vec::new();
    for segment in &spec.segments {
        let Some(segment) = segment else {
            seg_info_offsets.push(0u32);
            continue;
        };
        while (table_size + records.buf.len()) % 8 != 0 {
            records.bytes(&[0]);
        }
        seg_info_offsets.push((table_size + records.buf.len()) as u32);
        let size = 22 + 2 * (segment.page_start.len() + segment.overflow.len());
        records
            .u32(size as u32)
            .u16(segment.page_size)
            .u16(segment.pointer_format)
            .u64(segment.segment_offset)
            .u32(0)
            .u16(segment.page_start.len() as u16);
        for start in segment.page_start.iter().chain(segment.overflow.iter()) {
            records.u16(*start);
        }
    }
    starts.u32(spec.segments.len() as u32);
    for offset in seg_info_offsets {
        starts.u32(offset);
    }
    starts.bytes(&records.finish()).align(4);
    let starts = starts.finish();

    let imports_offset = STARTS_OFFSET + starts.len();
    let mut imports = Writer::new(order);
    let mut symbols = Vec::new();
    for import in &spec.imports {
        let name_offset = symbols.len() as u64;
        symbols.extend_from_slice(import.name.as_bytes());
        symbols.push(0);

        let weak = import.weak as u64;
        let ordinal = import.lib_ordinal as u64;
        match spec.imports_format {
            3 => {
                imports
                    .u64((ordinal & 0xffff) | (weak << 16) | (name_offset << 32))
                    .u64(import.addend as u64);
            }
            format => {
                imports.u32(((ordinal & 0xff) | (weak << 8) | (name_offset << 9)) as u32);
                if format == 2 {
                    imports.u32(import.addend as i32 as u32);
                }
            }
        }
    }
    let imports = imports.finish();
    let symbols_offset = imports_offset + imports.len();

    let mut blob = Writer::new(order);
    blob.u32(0)
        .u32(STARTS_OFFSET as u32)
        .u32(imports_offset as u32)
        .u32(symbols_offset as u32)
        .u32(spec.imports.len() as u32)
        .u32(spec.imports_format)
        .u32(spec.symbols_format)
        .align(STARTS_OFFSET)
        .bytes(&starts)
        .bytes(&imports)
        .bytes(&symbols)
        .align(8);
    blob.finish()
}

/// An image with `__TEXT` at 0, `__DATA` at 0x4000 (0x2000 bytes) and the
/// fixups payload at the start of `__LINKEDIT` (0x6000). `pointers` are
/// `(file offset, value)` pairs written with the pointer width of the first
/// described segment.
pub fn fixups_image(order: ByteOrder, spec: &FixupsBlobSpec, pointers: &[(u64, u64)]) -> Vec<u8> {
    let blob = fixups_blob(order, spec);
    let width = spec.pointer_width();

    let mut builder = ImageBuilder::new(order)
        .segment(&SegmentSpec::new("__TEXT", 0x100000000, 0x4000, 0, 0x4000).prot(5))
        .segment(&SegmentSpec::new("__DATA", 0x100004000, 0x2000, 0x4000, 0x2000).prot(3))
        .segment(
            &SegmentSpec::new("__LINKEDIT", 0x100006000, 0x4000, 0x6000, blob.len() as u64)
                .prot(1),
        )
        .dylib("/usr/lib/libSystem.B.dylib")
        .command(
            LCLoadCommand::LcDyldChainedFixups,
            &words(order, &[0x6000, blob.len() as u32]),
        )
        .data(0x6000, &blob);
    for (offset, value) in pointers {
        builder = builder.pointer(*offset, width, *value);
    }
    builder.build()
}

/// A small arm64 executable shaped like the output of a current linker:
/// four segments, two dylibs and one chain of two binds around a rebase in
/// `__DATA_CONST`.
pub fn reference_image(order: ByteOrder) -> Vec<u8> {
    let blob = fixups_blob(
        order,
        &FixupsBlobSpec::new(vec![
            None,
            None,
            Some(StartsSpec::new(2, 0x4000, 0x4000, vec![0])),
            None,
        ])
        .import(ImportSpec::new(1, "_printf"))
        .import(ImportSpec::new(2, "_objc_msgSend")),
    );
    let linkedit_end = 0x8000 + blob.len() as u32;
    let uuid: Vec<u8> = (0u8..16).collect();

    ImageBuilder::new(order)
        .segment(&SegmentSpec::new("__PAGEZERO", 0, 0x100000000, 0, 0))
        .segment(
            &SegmentSpec::new("__TEXT", 0x100000000, 0x4000, 0, 0x4000)
                .prot(5)
                .section("__text", 0x100000400, 0x100, 0x80000400)
                .section("__cstring", 0x100000500, 0x20, 0x2),
        )
        .segment(
            &SegmentSpec::new("__DATA_CONST", 0x100004000, 0x4000, 0x4000, 0x4000)
                .prot(3)
                .section("__got", 0x100004000, 0x18, 0x6),
        )
        .segment(
            &SegmentSpec::new("__LINKEDIT", 0x100008000, 0x4000, 0x8000, blob.len() as u64)
                .prot(1),
        )
        .command(
            LCLoadCommand::LcDyldChainedFixups,
            &words(order, &[0x8000, blob.len() as u32]),
        )
        .command(
            LCLoadCommand::LcSymtab,
            &words(order, &[linkedit_end, 0, linkedit_end, 0]),
        )
        .command(LCLoadCommand::LcDysymtab, &words(order, &[0; 18]))
        .command(
            LCLoadCommand::LcLoadDylinker,
            &lc_str_payload(order, &[], "/usr/lib/dyld"),
        )
        .command(LCLoadCommand::LcUuid, &uuid)
        .command(
            LCLoadCommand::LcBuildVersion,
            &words(order, &[1, 0x000e0000, 0x000e0500, 1, 3, 0x04670000]),
        )
        .command(LCLoadCommand::LcSourceVersion, &dwords(order, &[0]))
        .command(LCLoadCommand::LcMain, &dwords(order, &[0x400, 0]))
        .dylib("/usr/lib/libSystem.B.dylib")
        .dylib("/usr/lib/libobjc.A.dylib")
        .data(0x8000, &blob)
        .pointer(0x4000, 8, BIND | PTR64_NEXT)
        .pointer(0x4008, 8, PTR64_NEXT | 0x100004020)
        .pointer(0x4010, 8, BIND | 1)
        .build()
}
