mod build;
mod compare;
mod detect;
mod info;
mod show;

pub use build::*;
pub use compare::*;
pub use detect::*;
pub use info::*;
pub use show::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}
