use anyhow::Result;
use cardmatch::Opts;
use cardmatch::cli::SubCommandExtend;
use cardmatch::config::SubCommand;
use clap::Parser;
use log::debug;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    if let Some(jobs) = opts.jobs {
        rayon::ThreadPoolBuilder::new().num_threads(jobs).build_global()?;
        debug!("使用 {} 个工作线程", jobs);
    }

    match &opts.subcmd {
        SubCommand::Build(config) => config.run(&opts),
        SubCommand::Detect(config) => config.run(&opts),
        SubCommand::Info(config) => config.run(&opts),
        SubCommand::Compare(config) => config.run(&opts),
        SubCommand::Show(config) => config.run(&opts),
    }
}
