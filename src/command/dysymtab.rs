use nom_derive::Nom;

use crate::{decoder::impl_decode_for_record, macho::MachOResult};

use super::{LCLoadCommand, LoadCommandParser, RawCommand};

#[derive(Debug, Nom)]
struct RawDysymtab {
    ilocalsym: u32,
    nlocalsym: u32,
    iextdefsym: u32,
    nextdefsym: u32,
    iundefsym: u32,
    nundefsym: u32,
    tocoff: u32,
    ntoc: u32,
    modtaboff: u32,
    nmodtab: u32,
    extrefsymoff: u32,
    nextrefsyms: u32,
    indirectsymoff: u32,
    nindirectsyms: u32,
    extreloff: u32,
    nextrel: u32,
    locreloff: u32,
    nlocrel: u32,
}
impl_decode_for_record!(RawDysymtab, 72);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DysymtabCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub ilocalsym: u32,
    pub nlocalsym: u32,
    pub iextdefsym: u32,
    pub nextdefsym: u32,
    pub iundefsym: u32,
    pub nundefsym: u32,
    pub tocoff: u32,
    pub ntoc: u32,
    pub modtaboff: u32,
    pub nmodtab: u32,
    pub extrefsymoff: u32,
    pub nextrefsyms: u32,
    pub indirectsymoff: u32,
    pub nindirectsyms: u32,
    pub extreloff: u32,
    pub nextrel: u32,
    pub locreloff: u32,
    pub nlocrel: u32,
}

impl DysymtabCommand {
    pub const INDIRECT_SYMBOL_LOCAL: u32 = 0x80000000;
    pub const INDIRECT_SYMBOL_ABS: u32 = 0x40000000;
}

impl LoadCommandParser for DysymtabCommand {
    const CODES: &'static [LCLoadCommand] = &[LCLoadCommand::LcDysymtab];

    fn parse(raw: &RawCommand) -> MachOResult<Self> {
        let fields: RawDysymtab = raw.body()?.decode()?;

        Ok(DysymtabCommand {
            cmd: raw.cmd,
            cmdsize: raw.base.cmdsize,
            ilocalsym: fields.ilocalsym,
            nlocalsym: fields.nlocalsym,
            iextdefsym: fields.iextdefsym,
            nextdefsym: fields.nextdefsym,
            iundefsym: fields.iundefsym,
            nundefsym: fields.nundefsym,
            tocoff: fields.tocoff,
            ntoc: fields.ntoc,
            modtaboff: fields.modtaboff,
            nmodtab: fields.nmodtab,
            extrefsymoff: fields.extrefsymoff,
            nextrefsyms: fields.nextrefsyms,
            indirectsymoff: fields.indirectsymoff,
            nindirectsyms: fields.nindirectsyms,
            extreloff: fields.extreloff,
            nextrel: fields.nextrel,
            locreloff: fields.locreloff,
            nlocrel: fields.nlocrel,
        })
    }
}
