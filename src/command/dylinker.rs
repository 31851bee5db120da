use crate::macho::MachOResult;

use super::{LCLoadCommand, LoadCommandParser, RawCommand};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DylinkerCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub name: String,
}

impl LoadCommandParser for DylinkerCommand {
    const CODES: &'static [LCLoadCommand] = &[
        LCLoadCommand::LcLoadDylinker,
        LCLoadCommand::LcIdDylinker,
        LCLoadCommand::LcDyldEnvironment,
    ];

    fn parse(raw: &RawCommand) -> MachOResult<Self> {
        let name_offset: u32 = raw.body()?.decode()?;

        Ok(DylinkerCommand {
            cmd: raw.cmd,
            cmdsize: raw.base.cmdsize,
            name: raw.lc_str(name_offset)?,
        })
    }
}
