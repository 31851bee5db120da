use crate::macho::MachOResult;

use super::{LCLoadCommand, LoadCommandBase, LoadCommandParser, RawCommand};

/// One `flavor`/`count`/state triple. The register words are kept raw since
/// their layout depends on the flavor and CPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadState {
    pub flavor: u32,
    pub count: u32,
    pub state: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub threads: Vec<ThreadState>,
}

impl LoadCommandParser for ThreadCommand {
    const CODES: &'static [LCLoadCommand] = &[LCLoadCommand::LcThread, LCLoadCommand::LcUnixThread];

    fn parse(raw: &RawCommand) -> MachOResult<Self> {
        let mut decoder = raw.body()?;
        let mut threads = Vec::new();

        while decoder.remaining() >= LoadCommandBase::SIZE {
            let flavor = decoder.decode()?;
            let count: u32 = decoder.decode()?;
            let max = decoder.remaining() / 4;
            let state = decoder.decode_array(count as usize, max)?;
            threads.push(ThreadState {
                flavor,
                count,
                state,
            });
        }

        Ok(ThreadCommand {
            cmd: raw.cmd,
            cmdsize: raw.base.cmdsize,
            threads,
        })
    }
}
