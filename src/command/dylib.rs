use crate::{
    helpers::{last_path_component, version_string},
    macho::MachOResult,
};

use super::{LCLoadCommand, LoadCommandParser, RawCommand};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DylibCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub name: String,
    pub timestamp: u32,
    pub current_version: String,
    pub compatibility_version: String,
}

impl DylibCommand {
    /// Whether this command adds to the dylib ordinal list. `LC_ID_DYLIB`
    /// names the image itself and does not.
    pub fn is_import(&self) -> bool {
        self.cmd != LCLoadCommand::LcIdDylib
    }

    /// `libSystem.B.dylib` for `/usr/lib/libSystem.B.dylib`.
    pub fn short_name(&self) -> &str {
        last_path_component(&self.name)
    }
}

impl LoadCommandParser for DylibCommand {
    const CODES: &'static [LCLoadCommand] = &[
        LCLoadCommand::LcLoadDylib,
        LCLoadCommand::LcIdDylib,
        LCLoadCommand::LcLoadWeakDylib,
        LCLoadCommand::LcReexportDylib,
        LCLoadCommand::LcLazyLoadDylib,
        LCLoadCommand::LcLoadUpwardDylib,
    ];

    fn parse(raw: &RawCommand) -> MachOResult<Self> {
        let mut decoder = raw.body()?;
        let name_offset: u32 = decoder.decode()?;
        let timestamp = decoder.decode()?;
        let current_version = decoder.decode()?;
        let compatibility_version = decoder.decode()?;

        Ok(DylibCommand {
            cmd: raw.cmd,
            cmdsize: raw.base.cmdsize,
            name: raw.lc_str(name_offset)?,
            timestamp,
            current_version: version_string(current_version),
            compatibility_version: version_string(compatibility_version),
        })
    }
}
