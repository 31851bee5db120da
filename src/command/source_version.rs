use crate::{helpers::source_version_string, macho::MachOResult};

use super::{LCLoadCommand, LoadCommandParser, RawCommand};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceVersionCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub version: String, // A.B.C.D.E packed as a24.b10.c10.d10.e10
}

impl LoadCommandParser for SourceVersionCommand {
    const CODES: &'static [LCLoadCommand] = &[LCLoadCommand::LcSourceVersion];

    fn parse(raw: &RawCommand) -> MachOResult<Self> {
        let version: u64 = raw.body()?.decode()?;

        Ok(SourceVersionCommand {
            cmd: raw.cmd,
            cmdsize: raw.base.cmdsize,
            version: source_version_string(version),
        })
    }
}
