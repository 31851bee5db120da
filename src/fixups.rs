//! Resolves the `LC_DYLD_CHAINED_FIXUPS` payload into per-page bind and
//! rebase records.
//!
//! The walk is best effort in one respect only: a segment whose pointer
//! format is unknown, or a chain that cannot be followed, truncates that page
//! and is reported through [`ChainStatus`]. Any other malformed table is an
//! error for the whole report.

use tracing::{debug, trace, warn};

use crate::{
    command::{
        dyld_chained_fixup::{
            ChainedPointer, DyldChainedFixupsHeader, DyldChainedImport, DyldPointerFormat,
            DyldStartsInImage, DyldStartsInSegment, DyldSymbolsFormat,
        },
        LinkeditDataCommand, SegmentCommand,
    },
    decoder::Decoder,
    macho::{MachOErr, MachOResult},
};

/// How the offset of each page's chain start is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageBase {
    /// `segment_offset + page_index * page_size + page_start`.
    #[default]
    PageIndex,
    /// Always uses the first page: `segment_offset + page_start`. Matches
    /// older tools that ignored the page index.
    FirstPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixupsOptions {
    pub page_base: PageBase,
    /// Records followed per chain before the walk gives up.
    pub max_chain_steps: usize,
}

impl FixupsOptions {
    pub const DEFAULT_MAX_CHAIN_STEPS: usize = 65536;
}

impl Default for FixupsOptions {
    fn default() -> Self {
        FixupsOptions {
            page_base: PageBase::default(),
            max_chain_steps: Self::DEFAULT_MAX_CHAIN_STEPS,
        }
    }
}

/// How the walk of one page ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    /// Every chain on the page ended with `next == 0`.
    Complete,
    /// The page start is `DYLD_CHAINED_PTR_START_NONE`.
    NoFixups,
    UnknownPointerFormat(u16),
    /// A bind record in a format that cannot bind. The record is kept as the
    /// last one of the page.
    UnsupportedBind { offset: u64 },
    StepLimitExceeded,
    /// A chain start or `next` step left the segment's file range, or its
    /// offset did not fit in 64 bits.
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainedFixup {
    /// File offset of the record within the image.
    pub offset: u64,
    /// Offset of the record from the image's base address.
    pub vm_offset: u64,
    pub pointer: ChainedPointer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFixups {
    pub index: usize,
    pub page_start: u16,
    pub status: ChainStatus,
    pub fixups: Vec<ChainedFixup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFixups {
    pub index: usize,
    pub segment_name: Option<String>,
    /// `None` when the image has no starts for this segment.
    pub starts: Option<DyldStartsInSegment>,
    /// One entry per page of `starts`.
    pub pages: Vec<PageFixups>,
}

impl SegmentFixups {
    pub fn has_pages(&self) -> bool {
        self.starts
            .as_ref()
            .is_some_and(|starts| starts.page_count > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedFixupsReport {
    pub header: DyldChainedFixupsHeader,
    pub starts: DyldStartsInImage,
    pub imports: Vec<DyldChainedImport>,
    pub segments: Vec<SegmentFixups>,
}

impl DyldChainedFixupsReport {
    /// The import a bind record refers to.
    pub fn import_for(&self, pointer: &ChainedPointer) -> Option<&DyldChainedImport> {
        pointer
            .bind_ordinal()
            .and_then(|ordinal| self.imports.get(ordinal as usize))
    }

    pub fn fixups(&self) -> impl Iterator<Item = &ChainedFixup> {
        self.segments
            .iter()
            .flat_map(|segment| segment.pages.iter())
            .flat_map(|page| page.fixups.iter())
    }

    pub fn binds(&self) -> impl Iterator<Item = &ChainedFixup> {
        self.fixups().filter(|fixup| fixup.pointer.is_bind())
    }

    pub fn rebases(&self) -> impl Iterator<Item = &ChainedFixup> {
        self.fixups().filter(|fixup| !fixup.pointer.is_bind())
    }
}

/// Decodes the payload `command` points at. `image` covers the whole
/// (thin) image, `segments` are the segment commands in load order and
/// `dylibs` the short names of the imported dylibs in load order.
pub fn parse_chained_fixups(
    image: &Decoder,
    command: &LinkeditDataCommand,
    segments: &[&SegmentCommand],
    dylibs: &[&str],
    options: &FixupsOptions,
) -> MachOResult<DyldChainedFixupsReport> {
    let payload = image.sub_decoder(command.dataoff as usize, Some(command.datasize as usize))?;
    let header = DyldChainedFixupsHeader::parse(&payload, 0)?;

    let starts_offset = header.starts_offset as usize;
    let starts = DyldStartsInImage::parse(&payload, starts_offset)?;
    if starts.seg_count as usize != segments.len() {
        warn!(
            seg_count = starts.seg_count,
            segments = segments.len(),
            "chained fixups segment count does not match the segment commands"
        );
    }

    let imports = parse_imports(&payload, &header, dylibs)?;

    let mut segment_fixups = Vec::with_capacity(starts.seg_info_offset.len());
    for (index, seg_info_offset) in starts.seg_info_offset.iter().enumerate() {
        let segment = segments.get(index).copied();
        let segment_name = segment.map(|segment| segment.segname.clone());

        if *seg_info_offset == 0 {
            segment_fixups.push(SegmentFixups {
                index,
                segment_name,
                starts: None,
                pages: Vec::new(),
            });
            continue;
        }

        let seg_starts =
            DyldStartsInSegment::parse(&payload, starts_offset + *seg_info_offset as usize)?;
        debug!(
            index,
            segment = segment_name.as_deref().unwrap_or("?"),
            pointer_format = seg_starts.pointer_format,
            page_count = seg_starts.page_count,
            "parsed segment chain starts"
        );

        let pages = walk_segment(image, segment, &seg_starts, options)?;
        segment_fixups.push(SegmentFixups {
            index,
            segment_name,
            starts: Some(seg_starts),
            pages,
        });
    }

    Ok(DyldChainedFixupsReport {
        header,
        starts,
        imports,
        segments: segment_fixups,
    })
}

fn parse_imports(
    payload: &Decoder,
    header: &DyldChainedFixupsHeader,
    dylibs: &[&str],
) -> MachOResult<Vec<DyldChainedImport>> {
    if header.imports_count == 0 {
        return Ok(Vec::new());
    }
    if header.symbols_format == DyldSymbolsFormat::Zlib {
        return Err(MachOErr::Unsupported(
            "zlib compressed chained fixups symbols".to_string(),
        ));
    }

    let entry_size = header.imports_format.entry_size();
    let imports_offset = header.imports_offset as usize;
    let max = payload.len().saturating_sub(imports_offset) / entry_size;
    let count = header.imports_count as usize;
    if count > max {
        return Err(MachOErr::InvalidArrayCount { count, max });
    }

    let symbols = payload.sub_decoder(header.symbols_offset as usize, None)?;
    let imports = (0..count)
        .map(|index| {
            DyldChainedImport::parse(
                payload,
                imports_offset + index * entry_size,
                header.imports_format,
                &symbols,
                dylibs,
            )
        })
        .collect::<MachOResult<Vec<_>>>()?;
    debug!(count = imports.len(), format = %header.imports_format, "parsed chained imports");
    Ok(imports)
}

fn walk_segment(
    image: &Decoder,
    segment: Option<&SegmentCommand>,
    starts: &DyldStartsInSegment,
    options: &FixupsOptions,
) -> MachOResult<Vec<PageFixups>> {
    let mut pages = Vec::with_capacity(starts.page_start.len());

    let Some(format) = starts.format() else {
        warn!(
            pointer_format = starts.pointer_format,
            "unknown chained pointer format, skipping segment"
        );
        for (index, page_start) in starts.page_start.iter().enumerate() {
            pages.push(PageFixups {
                index,
                page_start: *page_start,
                status: ChainStatus::UnknownPointerFormat(starts.pointer_format),
                fixups: Vec::new(),
            });
        }
        return Ok(pages);
    };

    for (index, page_start) in starts.page_start.iter().enumerate() {
        let page_index = match options.page_base {
            PageBase::PageIndex => index as u64,
            PageBase::FirstPage => 0,
        };
        let page_offset = page_index
            .checked_mul(starts.page_size as u64)
            .and_then(|offset| offset.checked_add(starts.segment_offset));

        let chain_starts = starts.chain_starts(index);
        let mut page = PageFixups {
            index,
            page_start: *page_start,
            status: if chain_starts.is_empty() {
                ChainStatus::NoFixups
            } else {
                ChainStatus::Complete
            },
            fixups: Vec::new(),
        };

        for chain_start in chain_starts {
            let Some(vm_offset) =
                page_offset.and_then(|offset| offset.checked_add(chain_start as u64))
            else {
                warn!(
                    index,
                    segment_offset = starts.segment_offset,
                    chain_start,
                    "chain start offset overflows"
                );
                page.status = ChainStatus::OutOfRange;
                break;
            };
            let status = walk_chain(
                image,
                segment,
                starts,
                format,
                vm_offset,
                options,
                &mut page.fixups,
            )?;
            if status != ChainStatus::Complete {
                page.status = status;
                break;
            }
        }
        pages.push(page);
    }
    Ok(pages)
}

/// Follows one chain starting at `vm_offset`, appending its records.
fn walk_chain(
    image: &Decoder,
    segment: Option<&SegmentCommand>,
    starts: &DyldStartsInSegment,
    format: DyldPointerFormat,
    mut vm_offset: u64,
    options: &FixupsOptions,
    fixups: &mut Vec<ChainedFixup>,
) -> MachOResult<ChainStatus> {
    let mut steps = 0;
    loop {
        if steps >= options.max_chain_steps {
            warn!(
                vm_offset,
                max_chain_steps = options.max_chain_steps,
                "chain step limit exceeded"
            );
            return Ok(ChainStatus::StepLimitExceeded);
        }
        steps += 1;

        let Some(offset) = file_offset(segment, starts, vm_offset, format.pointer_size() as u64)
        else {
            warn!(vm_offset, "chain left the segment");
            return Ok(ChainStatus::OutOfRange);
        };
        let position = usize::try_from(offset)
            .map_err(|_| MachOErr::InvalidValue(format!("chain offset {:#x}", offset)))?;
        let raw = match format.pointer_size() {
            4 => image.decode_at::<u32>(position)? as u64,
            _ => image.decode_at::<u64>(position)?,
        };
        let pointer = ChainedPointer::decode(format, raw);
        trace!(offset, vm_offset, raw, ?pointer, "chained pointer");

        fixups.push(ChainedFixup {
            offset,
            vm_offset,
            pointer,
        });

        if pointer.is_bind() && !format.supports_binds() {
            warn!(offset, %format, "bind record in a format without binds");
            return Ok(ChainStatus::UnsupportedBind { offset });
        }
        if pointer.next() == 0 {
            return Ok(ChainStatus::Complete);
        }
        match pointer
            .next()
            .checked_mul(format.stride())
            .and_then(|delta| vm_offset.checked_add(delta))
        {
            Some(next) => vm_offset = next,
            None => {
                warn!(vm_offset, next = pointer.next(), "chain step overflows");
                return Ok(ChainStatus::OutOfRange);
            }
        }
    }
}

/// Maps an offset from the image base to the file offset of a `size` byte
/// record through the segment the chain belongs to. `None` when the record
/// is not inside the segment's file range.
fn file_offset(
    segment: Option<&SegmentCommand>,
    starts: &DyldStartsInSegment,
    vm_offset: u64,
    size: u64,
) -> Option<u64> {
    let Some(segment) = segment else {
        return Some(vm_offset);
    };
    let delta = vm_offset.checked_sub(starts.segment_offset)?;
    if delta.checked_add(size)? > segment.filesize {
        return None;
    }
    segment.fileoff.checked_add(delta)
}
