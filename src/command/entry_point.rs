use crate::macho::MachOResult;

use super::{LCLoadCommand, LoadCommandParser, RawCommand};

/// `LC_MAIN`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub entryoff: u64,
    pub stacksize: u64,
}

impl LoadCommandParser for EntryPointCommand {
    const CODES: &'static [LCLoadCommand] = &[LCLoadCommand::LcMain];

    fn parse(raw: &RawCommand) -> MachOResult<Self> {
        let mut decoder = raw.body()?;

        Ok(EntryPointCommand {
            cmd: raw.cmd,
            cmdsize: raw.base.cmdsize,
            entryoff: decoder.decode()?,
            stacksize: decoder.decode()?,
        })
    }
}
