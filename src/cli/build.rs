use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{FingerprintOptions, Opts};
use crate::error::DetectError;
use crate::store::{ReferenceStore, StoreBuilder};

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub fingerprint: FingerprintOptions,
    /// 参考图片所在目录，每张图片对应一张卡牌
    pub path: PathBuf,
    /// 系列代码，默认为目录名
    #[arg(short = 'S', long, value_name = "SET")]
    pub set: Option<String>,
    /// 参考库输出路径，默认为 <STORE_DIR>/<SET>.cmfs
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,webp")]
    pub suffix: String,
    /// 在计算卡名之前使用正则表达式对文件名（不含扩展名）进行处理
    /// 例：--replace '^[0-9]+_(?<name>.+)$' '$name'
    #[arg(short, long, num_args = 2, value_names = ["REGEX", "REPLACE"], verbatim_doc_comment)]
    pub replace: Vec<String>,
    /// 向已有的参考库追加卡牌，已存在的卡牌保持不变
    #[arg(long)]
    pub append: bool,
}

impl BuildCommand {
    fn set_code(&self) -> Result<String> {
        if let Some(set) = &self.set {
            return Ok(set.clone());
        }
        let path = self.path.canonicalize().unwrap_or_else(|_| self.path.clone());
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("无法从路径推断系列代码，请使用 --set 指定"))
    }
}

impl SubCommandExtend for BuildCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let set = self.set_code()?;
        let output = self.output.clone().unwrap_or_else(|| opts.store_dir.store(&set));
        let params = self.fingerprint.params();

        let mut builder = StoreBuilder::new(set.clone(), params).suffix(&self.suffix)?;
        if let [regex, replace] = self.replace.as_slice() {
            builder = builder.replace(regex, replace)?;
        }

        let mut store = if self.append && output.exists() {
            let store = ReferenceStore::load(&output)?;
            if store.params() != &params {
                return Err(DetectError::ReferenceStoreMismatch {
                    reason: format!(
                        "已有参考库的参数为 {:?}，本次为 {:?}",
                        store.params(),
                        params
                    ),
                }
                .into());
            }
            store
        } else {
            ReferenceStore::new(params)
        };

        let entries = builder.build_entries(&self.path)?;
        let total = entries.len();
        let added = store.append(entries)?;
        store.save(&output).with_context(|| format!("保存参考库失败: {}", output.display()))?;
        let skipped = total - added;
        info!("系列 {}: 新增 {} 张卡牌，跳过 {} 张，共 {} 张", set, added, skipped, store.len());
        Ok(())
    }
}
