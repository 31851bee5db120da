use uuid::Uuid;

use crate::macho::MachOResult;

use super::{LCLoadCommand, LoadCommandParser, RawCommand};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub uuid: Uuid,
}

impl LoadCommandParser for UuidCommand {
    const CODES: &'static [LCLoadCommand] = &[LCLoadCommand::LcUuid];

    fn parse(raw: &RawCommand) -> MachOResult<Self> {
        // Stored as 16 raw bytes in both byte orders.
        let bytes: [u8; 16] = raw.body()?.decode()?;

        Ok(UuidCommand {
            cmd: raw.cmd,
            cmdsize: raw.base.cmdsize,
            uuid: Uuid::from_bytes(bytes),
        })
    }
}
