use thiserror::Error;
use tracing::debug;

use crate::{
    command::{
        parse_load_commands, DylibCommand, LCLoadCommand, LinkeditDataCommand, LoadCommand,
        SegmentCommand,
    },
    decoder::{ByteOrder, Decoder},
    fat::FatHeader,
    fixups::{parse_chained_fixups, DyldChainedFixupsReport, FixupsOptions},
    header::{MachHeader, Magic},
};

#[derive(Debug, Error)]
pub enum MachOErr {
    #[error("offset {offset:#x} is outside a buffer of {length:#x} bytes")]
    OffsetOutOfBounds { offset: usize, length: usize },
    #[error("{required} bytes required but only {available} available")]
    InsufficientData { required: usize, available: usize },
    #[error("array count {count} exceeds the maximum of {max}")]
    InvalidArrayCount { count: usize, max: usize },
    #[error("no valid null terminated string at offset {offset:#x}")]
    InvalidString { offset: usize },
    #[error("offset {offset:#x} is not aligned to {alignment}")]
    MisalignedData { offset: usize, alignment: usize },
    #[error("malformed load commands: {0}")]
    MalformedLoadCommandStream(String),
    #[error("image has no LC_DYLD_CHAINED_FIXUPS command")]
    MissingChainedFixups,
    #[error("invalid magic {0:#010x}")]
    InvalidMagic(u32),
    #[error("fat archive has no architectures")]
    EmptyFatArchive,
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("parsing error: {0}")]
    ParsingError(String),
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for MachOErr {
    fn from(err: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        MachOErr::ParsingError(match err {
            nom::Err::Incomplete(needed) => format!("incomplete input: {:?}", needed),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                format!("{:?} with {} bytes left", e.code, e.input.len())
            }
        })
    }
}

pub type MachOResult<T> = Result<T, MachOErr>;

/// A parsed thin image, or the selected slice of a fat one. Everything is
/// decoded up front from the borrowed bytes.
#[derive(Debug, Clone)]
pub struct MachOFile<'a> {
    pub fat_header: Option<FatHeader>,
    pub header: MachHeader,
    pub load_commands: Vec<LoadCommand>,
    /// The bytes of the image itself, starting at its Mach header.
    pub data: &'a [u8],
}

impl<'a> MachOFile<'a> {
    pub fn is_fat_magic(bytes: &[u8]) -> bool {
        Magic::classify(bytes).is_ok_and(|magic| magic.is_fat())
    }

    pub fn is_macho_magic(bytes: &[u8]) -> bool {
        Magic::classify(bytes).is_ok_and(|magic| !magic.is_fat())
    }

    /// Parses `bytes`, taking the first slice of a fat file.
    pub fn parse(bytes: &'a [u8]) -> MachOResult<Self> {
        Self::parse_arch(bytes, None)
    }

    /// Parses `bytes`, taking the slice named by `arch` (`arm64`, `x86_64`,
    /// ...) of a fat file. Thin files ignore `arch`.
    pub fn parse_arch(bytes: &'a [u8], arch: Option<&str>) -> MachOResult<Self> {
        let (fat_header, data) = match Magic::classify(bytes)? {
            Magic::Fat(_) => {
                let fat_header = FatHeader::parse(bytes)?;
                let selected = fat_header.select(arch)?;
                debug!(arch = %selected.name(), offset = selected.offset, "selected fat slice");
                let data = selected.slice(bytes)?;
                (Some(fat_header), data)
            }
            Magic::MachO(_) => (None, bytes),
        };

        let header = MachHeader::parse(data)?;
        let load_commands = parse_load_commands(data, &header)?;

        Ok(MachOFile {
            fat_header,
            header,
            load_commands,
            data,
        })
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order()
    }

    /// A decoder over the image in its byte order.
    pub fn decoder(&self) -> Decoder<'a> {
        Decoder::new(self.data, self.byte_order())
    }

    pub fn segments(&self) -> Vec<&SegmentCommand> {
        self.load_commands
            .iter()
            .filter_map(|lc| match lc {
                LoadCommand::Segment(segment) => Some(segment),
                _ => None,
            })
            .collect()
    }

    pub fn segment(&self, name: &str) -> Option<&SegmentCommand> {
        self.segments()
            .into_iter()
            .find(|segment| segment.segname == name)
    }

    /// Dylibs the image links against, in ordinal order. `LC_ID_DYLIB` is
    /// left out.
    pub fn dylibs(&self) -> Vec<&DylibCommand> {
        self.load_commands
            .iter()
            .filter_map(|lc| match lc {
                LoadCommand::Dylib(dylib) if dylib.is_import() => Some(dylib),
                _ => None,
            })
            .collect()
    }

    pub fn commands_of(&self, cmd: LCLoadCommand) -> impl Iterator<Item = &LoadCommand> {
        self.load_commands
            .iter()
            .filter(move |lc| lc.command() == Some(cmd))
    }

    pub fn chained_fixups_command(&self) -> Option<&LinkeditDataCommand> {
        self.load_commands.iter().find_map(|lc| match lc {
            LoadCommand::LinkeditData(cmd) if cmd.cmd == LCLoadCommand::LcDyldChainedFixups => {
                Some(cmd)
            }
            _ => None,
        })
    }

    pub fn chained_fixups(&self) -> MachOResult<DyldChainedFixupsReport> {
        self.chained_fixups_with(&FixupsOptions::default())
    }

    pub fn chained_fixups_with(
        &self,
        options: &FixupsOptions,
    ) -> MachOResult<DyldChainedFixupsReport> {
        let command = self
            .chained_fixups_command()
            .ok_or(MachOErr::MissingChainedFixups)?;
        let dylibs = self.dylibs();
        let dylib_names: Vec<&str> = dylibs.iter().map(|dylib| dylib.short_name()).collect();

        parse_chained_fixups(
            &self.decoder(),
            command,
            &self.segments(),
            &dylib_names,
            options,
        )
    }
}
