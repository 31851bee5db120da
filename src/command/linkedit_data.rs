use crate::macho::MachOResult;

use super::{LCLoadCommand, LoadCommandParser, RawCommand};

/// A command pointing at a blob in `__LINKEDIT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkeditDataCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub dataoff: u32,
    pub datasize: u32,
}

impl LoadCommandParser for LinkeditDataCommand {
    const CODES: &'static [LCLoadCommand] = &[
        LCLoadCommand::LcCodeSignature,
        LCLoadCommand::LcSegmentSplitInfo,
        LCLoadCommand::LcFunctionStarts,
        LCLoadCommand::LcDataInCode,
        LCLoadCommand::LcDylibCodeSignDrs,
        LCLoadCommand::LcLinkerOptimizationHint,
        LCLoadCommand::LcDyldExportsTrie,
        LCLoadCommand::LcDyldChainedFixups,
        LCLoadCommand::LcAtomInfo,
    ];

    fn parse(raw: &RawCommand) -> MachOResult<Self> {
        let mut decoder = raw.body()?;

        Ok(LinkeditDataCommand {
            cmd: raw.cmd,
            cmdsize: raw.base.cmdsize,
            dataoff: decoder.decode()?,
            datasize: decoder.decode()?,
        })
    }
}
