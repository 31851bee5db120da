pub mod bits;
pub mod command;
pub mod decoder;
pub mod fat;
pub mod fixups;
pub mod header;
pub mod helpers;
pub mod machine;
pub mod macho;

#[cfg(test)]
mod testutil;

pub use fixups::{DyldChainedFixupsReport, FixupsOptions, PageBase};
pub use macho::{MachOErr, MachOFile, MachOResult};
