use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::{OutputFormat, SubCommandExtend};
use crate::config::{MatchOptions, Opts, SegmentOptions};
use crate::error::DetectError;
use crate::pipeline::{CancelFlag, Pipeline, PipelineConfig};
use crate::report::{BatchReport, ImageStatus, Organize, ReportWriter};
use crate::store::ReferenceStore;
use crate::utils::{scan_images, suffix_regex};

#[derive(Parser, Debug, Clone)]
pub struct DetectCommand {
    #[command(flatten)]
    pub segment: SegmentOptions,
    #[command(flatten)]
    pub matching: MatchOptions,
    /// 输入图片或目录
    pub input: PathBuf,
    /// 输出目录
    pub output: PathBuf,
    /// 使用的参考库，可多次指定，默认加载参考库目录下的所有参考库
    #[arg(short = 'S', long, value_name = "FILE")]
    pub store: Vec<PathBuf>,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,webp")]
    pub suffix: String,
    /// 按识别结果把输入图片整理到 <OUTPUT>/<SET>/<NAME>.<EXT>
    #[arg(long, value_enum, default_value_t = Organize::None)]
    pub organize: Organize,
    /// 不尝试旋转 180° 后的图像
    #[arg(long)]
    pub no_flip: bool,
    /// 保存候选区域标注图和校正后的卡牌图像
    #[arg(long, value_name = "DIR")]
    pub debug_dir: Option<PathBuf>,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl DetectCommand {
    fn load_stores(&self, opts: &Opts) -> Result<ReferenceStore> {
        let paths = match self.store.is_empty() {
            true => opts.store_dir.all_stores(),
            false => self.store.clone(),
        };
        if paths.is_empty() {
            let path = opts.store_dir.path().to_path_buf();
            return Err(DetectError::ReferenceStoreMissing { path }.into());
        }
        let mut stores = vec![];
        for path in &paths {
            stores.push(ReferenceStore::load(path)?);
        }
        ReferenceStore::merge(stores)
    }
}

impl SubCommandExtend for DetectCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let store = self.load_stores(opts)?;
        let mut writer = ReportWriter::create(&self.output, self.organize)?;

        info!("开始扫描目录: {}", self.input.display());
        let paths = scan_images(&self.input, &suffix_regex(&self.suffix)?)?;
        info!("扫描完成，共 {} 张图片", paths.len());

        let config = PipelineConfig {
            segment: self.segment.clone(),
            matching: self.matching.clone(),
            try_flip: !self.no_flip,
            debug_dir: self.debug_dir.clone(),
        };
        let pipeline = Pipeline::new(Arc::new(store), config);
        let batch = pipeline
            .run_batch(&paths, &CancelFlag::new(), |report, path| writer.write(report, path))?;
        let report_path = writer.finish(&batch)?;

        print_result(&batch, self.output_format)?;
        info!("识别完成，报告位于 {}", report_path.display());
        Ok(())
    }
}

fn print_result(batch: &BatchReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(batch)?)
        }
        OutputFormat::Table => {
            for image in &batch.images {
                if image.status != ImageStatus::Processed {
                    println!("{}\t-\t{:?}", image.source, image.status);
                    continue;
                }
                for result in &image.results {
                    let card = result.card.as_ref().map(|c| c.to_string()).unwrap_or("-".into());
                    let distance = result.distance.map(|d| d.to_string()).unwrap_or("-".into());
                    println!(
                        "{}\t{}\t{}\t{}\t{:?}",
                        image.source, result.index, card, distance, result.verdict
                    );
                }
            }
            println!(
                "处理 {} 张，无法读取 {} 张；识别 {} 张卡牌，未匹配 {}，有歧义 {}，失败 {}",
                batch.processed,
                batch.unreadable,
                batch.matched,
                batch.unmatched,
                batch.ambiguous,
                batch.failed
            );
        }
    }
    Ok(())
}
