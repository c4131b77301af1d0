use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use crate::cli::{OutputFormat, SubCommandExtend};
use crate::config::Opts;
use crate::error::DetectError;
use crate::phash::FingerprintParams;
use crate::store::ReferenceStore;

#[derive(Parser, Debug, Clone)]
pub struct InfoCommand {
    /// 参考库路径或系列代码，默认显示参考库目录下的所有参考库
    pub store: Option<String>,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

#[derive(Serialize)]
struct StoreInfo {
    path: PathBuf,
    sets: Vec<String>,
    entries: usize,
    params: FingerprintParams,
}

impl InfoCommand {
    fn paths(&self, opts: &Opts) -> Vec<PathBuf> {
        match &self.store {
            Some(store) if PathBuf::from(store).is_file() => vec![PathBuf::from(store)],
            Some(set) => vec![opts.store_dir.store(set)],
            None => opts.store_dir.all_stores(),
        }
    }
}

impl SubCommandExtend for InfoCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let paths = self.paths(opts);
        if paths.is_empty() {
            let path = opts.store_dir.path().to_path_buf();
            return Err(DetectError::ReferenceStoreMissing { path }.into());
        }

        let mut infos = vec![];
        for path in paths {
            let store = ReferenceStore::load(&path)?;
            let sets = store.sets().into_iter().map(String::from).collect();
            infos.push(StoreInfo { path, sets, entries: store.len(), params: *store.params() });
        }

        match self.output_format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&infos)?)
            }
            OutputFormat::Table => {
                for info in &infos {
                    let p = &info.params;
                    println!("{}", info.path.display());
                    println!("  系列     : {}", info.sets.join(", "));
                    println!("  卡牌数   : {}", info.entries);
                    println!("  算法     : {:?} {}x{}", p.algorithm, p.hash_size, p.hash_size);
                    println!("  校正尺寸 : {}x{}", p.canonical_width, p.canonical_height);
                    println!("  均衡化   : {}", p.equalize);
                }
            }
        }
        Ok(())
    }
}
