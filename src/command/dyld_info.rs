use nom_derive::Nom;

use crate::{decoder::impl_decode_for_record, macho::MachOResult};

use super::{LCLoadCommand, LoadCommandParser, RawCommand};

#[derive(Debug, Nom)]
struct RawDyldInfo {
    rebase_off: u32,
    rebase_size: u32,
    bind_off: u32,
    bind_size: u32,
    weak_bind_off: u32,
    weak_bind_size: u32,
    lazy_bind_off: u32,
    lazy_bind_size: u32,
    export_off: u32,
    export_size: u32,
}
impl_decode_for_record!(RawDyldInfo, 40);

/// `LC_DYLD_INFO` and `LC_DYLD_INFO_ONLY`. Only the table locations are
/// decoded; the opcode streams are left to other tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldInfoCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub rebase_off: u32,
    pub rebase_size: u32,
    pub bind_off: u32,
    pub bind_size: u32,
    pub weak_bind_off: u32,
    pub weak_bind_size: u32,
    pub lazy_bind_off: u32,
    pub lazy_bind_size: u32,
    pub export_off: u32,
    pub export_size: u32,
}

impl LoadCommandParser for DyldInfoCommand {
    const CODES: &'static [LCLoadCommand] = &[LCLoadCommand::LcDyldInfo, LCLoadCommand::LcDyldInfoOnly];

    fn parse(raw: &RawCommand) -> MachOResult<Self> {
        let info: RawDyldInfo = raw.body()?.decode()?;

        Ok(DyldInfoCommand {
            cmd: raw.cmd,
            cmdsize: raw.base.cmdsize,
            rebase_off: info.rebase_off,
            rebase_size: info.rebase_size,
            bind_off: info.bind_off,
            bind_size: info.bind_size,
            weak_bind_off: info.weak_bind_off,
            weak_bind_size: info.weak_bind_size,
            lazy_bind_off: info.lazy_bind_off,
            lazy_bind_size: info.lazy_bind_size,
            export_off: info.export_off,
            export_size: info.export_size,
        })
    }
}
