use crate::macho::MachOResult;

use super::{LCLoadCommand, LoadCommandParser, RawCommand};

/// Locations of the symbol and string tables. The tables themselves are not
/// read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymtabCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

impl LoadCommandParser for SymtabCommand {
    const CODES: &'static [LCLoadCommand] = &[LCLoadCommand::LcSymtab];

    fn parse(raw: &RawCommand) -> MachOResult<Self> {
        let mut decoder = raw.body()?;

        Ok(SymtabCommand {
            cmd: raw.cmd,
            cmdsize: raw.base.cmdsize,
            symoff: decoder.decode()?,
            nsyms: decoder.decode()?,
            stroff: decoder.decode()?,
            strsize: decoder.decode()?,
        })
    }
}
