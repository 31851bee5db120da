use nom_derive::Nom;
use num_derive::FromPrimitive;
use strum_macros::{Display, EnumString};

use crate::{
    decoder::impl_decode_for_record,
    helpers::version_string,
    macho::{MachOErr, MachOResult},
};

use super::{LCLoadCommand, LoadCommandParser, RawCommand};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, EnumString, Display)]
pub enum Tool {
    Clang = 1,
    Swift = 2,
    Ld = 3,
    Lld = 4,
    Metal = 1024,
    Airlld = 1025,
    Airnt = 1026,
    AirntPlugin = 1027,
    Airpack = 1028,
    Gpuarchiver = 1031,
    MetalFramework = 1032,
    Unknown = !0,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, EnumString, Display)]
pub enum Platform {
    Unknown = 0,
    Any = 0xFFFFFFFF,
    MacOS = 1,
    IOS = 2,
    TvOS = 3,
    WatchOS = 4,
    BridgeOS = 5,
    MacCatalyst = 6,
    IOSSimulator = 7,
    TvOSSimulator = 8,
    WatchOSSimulator = 9,
    DriverKit = 10,
    VisionOS = 11,
    VisionOSSimulator = 12,
    Firmware = 13,
    SepOS = 14,
}

#[derive(Debug, Nom)]
struct RawBuildToolVersion {
    tool: u32,
    version: u32,
}
impl_decode_for_record!(RawBuildToolVersion, 8);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildToolVersion {
    pub tool: Tool,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildVersionCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub platform: Platform,
    pub minos: String,
    pub sdk: String,
    pub ntools: u32,
    pub tools: Vec<BuildToolVersion>,
}

impl LoadCommandParser for BuildVersionCommand {
    const CODES: &'static [LCLoadCommand] = &[LCLoadCommand::LcBuildVersion];

    fn parse(raw: &RawCommand) -> MachOResult<Self> {
        let mut decoder = raw.body()?;
        let platform: u32 = decoder.decode()?;
        let minos = decoder.decode()?;
        let sdk = decoder.decode()?;
        let ntools: u32 = decoder.decode()?;

        // The tool entries are counted in cmdsize.
        let max_tools = decoder.remaining() / 8;
        let tools = decoder
            .decode_array::<RawBuildToolVersion>(ntools as usize, max_tools)?
            .into_iter()
            .map(|tool| BuildToolVersion {
                tool: num::FromPrimitive::from_u32(tool.tool).unwrap_or(Tool::Unknown),
                version: version_string(tool.version),
            })
            .collect();

        Ok(BuildVersionCommand {
            cmd: raw.cmd,
            cmdsize: raw.base.cmdsize,
            platform: num::FromPrimitive::from_u32(platform).ok_or_else(|| {
                MachOErr::InvalidValue(format!("unknown build platform {}", platform))
            })?,
            minos: version_string(minos),
            sdk: version_string(sdk),
            ntools,
            tools,
        })
    }
}
