pub mod build_version;
pub mod dyld_chained_fixup;
pub mod dyld_info;
pub mod dylib;
pub mod dylinker;
pub mod dysymtab;
pub mod entry_point;
pub mod linkedit_data;
pub mod segment;
pub mod source_version;
pub mod symtab;
pub mod thread;
pub mod uuid;

use num_derive::FromPrimitive;
use strum_macros::Display;
use tracing::{debug, trace, warn};

use crate::decoder::Decoder;
use crate::header::MachHeader;
use crate::helpers::trim_control;
use crate::macho::{MachOErr, MachOResult};

pub use build_version::BuildVersionCommand;
pub use dyld_info::DyldInfoCommand;
pub use dylib::DylibCommand;
pub use dylinker::DylinkerCommand;
pub use dysymtab::DysymtabCommand;
pub use entry_point::EntryPointCommand;
pub use linkedit_data::LinkeditDataCommand;
pub use segment::{Section, SegmentCommand};
pub use source_version::SourceVersionCommand;
pub use symtab::SymtabCommand;
pub use thread::ThreadCommand;
pub use uuid::UuidCommand;

/// Set on commands dyld must understand to load the image.
pub const LC_REQ_DYLD: u32 = 0x80000000;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Display)]
pub enum LCLoadCommand {
    LcSegment = 0x1,
    LcSymtab = 0x2,
    LcSymseg = 0x3,
    LcThread = 0x4,
    LcUnixThread = 0x5,
    LcDysymtab = 0xb,
    LcLoadDylib = 0xc,
    LcIdDylib = 0xd,
    LcLoadDylinker = 0xe,
    LcIdDylinker = 0xf,
    LcPreboundDylib = 0x10,
    LcRoutines = 0x11,
    LcSubFramework = 0x12,
    LcSubUmbrella = 0x13,
    LcSubClient = 0x14,
    LcSubLibrary = 0x15,
    LcTwolevelHints = 0x16,
    LcPrebindCksum = 0x17,
    LcLoadWeakDylib = 0x18 | LC_REQ_DYLD,
    LcSegment64 = 0x19,
    LcRoutines64 = 0x1a,
    LcUuid = 0x1b,
    LcRpath = 0x1c | LC_REQ_DYLD,
    LcCodeSignature = 0x1d,
    LcSegmentSplitInfo = 0x1e,
    LcReexportDylib = 0x1f | LC_REQ_DYLD,
    LcLazyLoadDylib = 0x20,
    LcEncryptionInfo = 0x21,
    LcDyldInfo = 0x22,
    LcDyldInfoOnly = 0x22 | LC_REQ_DYLD,
    LcLoadUpwardDylib = 0x23 | LC_REQ_DYLD,
    LcVersionMinMacosx = 0x24,
    LcVersionMinIphoneos = 0x25,
    LcFunctionStarts = 0x26,
    LcDyldEnvironment = 0x27,
    LcMain = 0x28 | LC_REQ_DYLD,
    LcDataInCode = 0x29,
    LcSourceVersion = 0x2A,
    LcDylibCodeSignDrs = 0x2B,
    LcEncryptionInfo64 = 0x2C,
    LcLinkerOption = 0x2D,
    LcLinkerOptimizationHint = 0x2E,
    LcVersionMinTvos = 0x2F,
    LcVersionMinWatchos = 0x30,
    LcNote = 0x31,
    LcBuildVersion = 0x32,
    LcDyldExportsTrie = 0x33 | LC_REQ_DYLD,
    LcDyldChainedFixups = 0x34 | LC_REQ_DYLD,
    LcFilesetEntry = 0x35 | LC_REQ_DYLD,
    LcAtomInfo = 0x36,
}

impl LCLoadCommand {
    pub fn from_raw(value: u32) -> Option<LCLoadCommand> {
        num::FromPrimitive::from_u32(value)
    }
}

/// The `cmd`/`cmdsize` prefix every load command starts with, plus where the
/// command sits in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadCommandBase {
    pub cmd: u32,
    pub cmdsize: u32,
    pub offset: usize,
}

impl LoadCommandBase {
    pub const SIZE: usize = 8;

    pub fn parse(decoder: &Decoder, offset: usize) -> MachOResult<LoadCommandBase> {
        Ok(LoadCommandBase {
            cmd: decoder.decode_at(offset)?,
            cmdsize: decoder.decode_at(offset + 4)?,
            offset,
        })
    }

    pub fn command(&self) -> Option<LCLoadCommand> {
        LCLoadCommand::from_raw(self.cmd)
    }
}

/// A recognised command handed to its shape decoder. `decoder` covers exactly
/// the command's `cmdsize` bytes, so shape decoders read at offsets relative
/// to the command start.
#[derive(Debug, Clone, Copy)]
pub struct RawCommand<'a> {
    pub base: LoadCommandBase,
    pub cmd: LCLoadCommand,
    pub decoder: Decoder<'a>,
    pub is_64: bool,
}

impl<'a> RawCommand<'a> {
    /// Decoder positioned just past `cmd`/`cmdsize`.
    pub fn body(&self) -> MachOResult<Decoder<'a>> {
        let mut decoder = self.decoder;
        decoder.seek(LoadCommandBase::SIZE)?;
        Ok(decoder)
    }

    /// Reads a trailing string whose start is given by an `lc_str` offset
    /// field. The string spans `[offset, cmdsize)`, stops at the first null
    /// and has control characters removed.
    pub fn lc_str(&self, offset: u32) -> MachOResult<String> {
        let offset = offset as usize;
        let length = self.decoder.len().checked_sub(offset).ok_or(
            MachOErr::OffsetOutOfBounds {
                offset,
                length: self.decoder.len(),
            },
        )?;
        let bytes = self.decoder.bytes_at(offset, length)?;
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        Ok(trim_control(&String::from_utf8_lossy(&bytes[..end])))
    }
}

pub trait LoadCommandParser: Sized {
    /// Command codes decoded by this shape. Each code belongs to one shape.
    const CODES: &'static [LCLoadCommand];

    fn parse(raw: &RawCommand) -> MachOResult<Self>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadCommand {
    Segment(SegmentCommand),
    Dylib(DylibCommand),
    Dylinker(DylinkerCommand),
    Dysymtab(DysymtabCommand),
    EntryPoint(EntryPointCommand),
    LinkeditData(LinkeditDataCommand),
    SourceVersion(SourceVersionCommand),
    Symtab(SymtabCommand),
    Thread(ThreadCommand),
    Uuid(UuidCommand),
    BuildVersion(BuildVersionCommand),
    DyldInfo(DyldInfoCommand),
    Unspecified(LoadCommandBase),
}

macro_rules! load_command_shapes {
    ($($variant:ident($shape:ty)),* $(,)?) => {
        $(
            impl From<$shape> for LoadCommand {
                fn from(cmd: $shape) -> Self {
                    LoadCommand::$variant(cmd)
                }
            }
        )*

        static LOAD_COMMAND_SHAPES: &[(&[LCLoadCommand], ShapeDecoder)] = &[
            $((<$shape as LoadCommandParser>::CODES, decode_shape::<$shape>)),*
        ];
    };
}

type ShapeDecoder = fn(&RawCommand) -> MachOResult<LoadCommand>;

fn decode_shape<C>(raw: &RawCommand) -> MachOResult<LoadCommand>
where
    C: LoadCommandParser + Into<LoadCommand>,
{
    C::parse(raw).map(Into::into)
}

load_command_shapes! {
    Segment(SegmentCommand),
    Dylib(DylibCommand),
    Dylinker(DylinkerCommand),
    Dysymtab(DysymtabCommand),
    EntryPoint(EntryPointCommand),
    LinkeditData(LinkeditDataCommand),
    SourceVersion(SourceVersionCommand),
    Symtab(SymtabCommand),
    Thread(ThreadCommand),
    Uuid(UuidCommand),
    BuildVersion(BuildVersionCommand),
    DyldInfo(DyldInfoCommand),
}

impl LoadCommand {
    /// Decodes one command with the shape whose code set contains its code.
    pub fn parse(raw: &RawCommand) -> MachOResult<LoadCommand> {
        match LOAD_COMMAND_SHAPES
            .iter()
            .find(|(codes, _)| codes.contains(&raw.cmd))
        {
            Some((_, decode)) => decode(raw),
            None => Ok(LoadCommand::Unspecified(raw.base)),
        }
    }

    pub fn cmd(&self) -> u32 {
        match self {
            LoadCommand::Segment(c) => c.cmd as u32,
            LoadCommand::Dylib(c) => c.cmd as u32,
            LoadCommand::Dylinker(c) => c.cmd as u32,
            LoadCommand::Dysymtab(c) => c.cmd as u32,
            LoadCommand::EntryPoint(c) => c.cmd as u32,
            LoadCommand::LinkeditData(c) => c.cmd as u32,
            LoadCommand::SourceVersion(c) => c.cmd as u32,
            LoadCommand::Symtab(c) => c.cmd as u32,
            LoadCommand::Thread(c) => c.cmd as u32,
            LoadCommand::Uuid(c) => c.cmd as u32,
            LoadCommand::BuildVersion(c) => c.cmd as u32,
            LoadCommand::DyldInfo(c) => c.cmd as u32,
            LoadCommand::Unspecified(base) => base.cmd,
        }
    }

    pub fn cmdsize(&self) -> u32 {
        match self {
            LoadCommand::Segment(c) => c.cmdsize,
            LoadCommand::Dylib(c) => c.cmdsize,
            LoadCommand::Dylinker(c) => c.cmdsize,
            LoadCommand::Dysymtab(c) => c.cmdsize,
            LoadCommand::EntryPoint(c) => c.cmdsize,
            LoadCommand::LinkeditData(c) => c.cmdsize,
            LoadCommand::SourceVersion(c) => c.cmdsize,
            LoadCommand::Symtab(c) => c.cmdsize,
            LoadCommand::Thread(c) => c.cmdsize,
            LoadCommand::Uuid(c) => c.cmdsize,
            LoadCommand::BuildVersion(c) => c.cmdsize,
            LoadCommand::DyldInfo(c) => c.cmdsize,
            LoadCommand::Unspecified(base) => base.cmdsize,
        }
    }

    pub fn command(&self) -> Option<LCLoadCommand> {
        LCLoadCommand::from_raw(self.cmd())
    }
}

/// Walks the `ncmds` commands following the header in `data`.
pub fn parse_load_commands(data: &[u8], header: &MachHeader) -> MachOResult<Vec<LoadCommand>> {
    let decoder = Decoder::new(data, header.byte_order());
    let start = header.size();
    let end = start + header.sizeofcmds as usize;
    if end > data.len() {
        return Err(MachOErr::MalformedLoadCommandStream(format!(
            "sizeofcmds {:#x} runs past the end of the image ({:#x} bytes)",
            header.sizeofcmds,
            data.len()
        )));
    }

    let mut commands = Vec::new();
    let mut offset = start;
    for index in 0..header.ncmds {
        if offset + LoadCommandBase::SIZE > end {
            return Err(MachOErr::MalformedLoadCommandStream(format!(
                "load command {} at {:#x} starts outside sizeofcmds",
                index, offset
            )));
        }
        let base = LoadCommandBase::parse(&decoder, offset)?;
        let cmdsize = base.cmdsize as usize;
        if cmdsize < LoadCommandBase::SIZE {
            return Err(MachOErr::MalformedLoadCommandStream(format!(
                "load command {} ({:#x}) has cmdsize {}",
                index, base.cmd, base.cmdsize
            )));
        }
        if offset + cmdsize > end {
            return Err(MachOErr::MalformedLoadCommandStream(format!(
                "load command {} ({:#x}) with cmdsize {:#x} runs past sizeofcmds",
                index, base.cmd, base.cmdsize
            )));
        }
        if base.cmdsize % header.pointer_width() != 0 {
            warn!(
                index,
                cmd = base.cmd,
                cmdsize = base.cmdsize,
                "cmdsize is not a multiple of the pointer width"
            );
        }

        let command = match base.command() {
            Some(cmd) => {
                let raw = RawCommand {
                    base,
                    cmd,
                    decoder: decoder.sub_decoder(offset, Some(cmdsize))?,
                    is_64: header.is_64(),
                };
                LoadCommand::parse(&raw)?
            }
            None => LoadCommand::Unspecified(base),
        };
        trace!(index, offset, cmd = base.cmd, cmdsize, "decoded load command");
        commands.push(command);
        offset += cmdsize;
    }

    if offset < end {
        warn!(
            consumed = offset - start,
            sizeofcmds = header.sizeofcmds,
            "load commands do not fill sizeofcmds"
        );
    }
    debug!(count = commands.len(), "parsed load commands");
    Ok(commands)
}
