//! CLI Commands

pub mod generate;
pub mod parse;
pub mod run;

use clap::ValueEnum;

/// Test tree a file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Kind {
    Examples,
    Core,
    Ui,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Examples => "examples",
            Kind::Core => "core",
            Kind::Ui => "ui",
        }
    }
}
