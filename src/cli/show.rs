use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, SegmentOptions};
use crate::segment::{ContourSegmenter, Segmenter};
use crate::utils::{self, draw_quads};

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    #[command(flatten)]
    pub segment: SegmentOptions,
    /// 图片路径
    pub image: PathBuf,
    /// 标注图的保存路径，默认为 <图片名>_regions.png
    pub output: Option<PathBuf>,
}

impl SubCommandExtend for ShowCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let image = utils::imread(&self.image)?;
        let source = self.image.to_string_lossy();

        let segmenter = ContourSegmenter::new(self.segment.clone());
        let regions = segmenter.segment(&source, &image);
        for region in &regions {
            let corners = region.quad.corners.map(|p| format!("({:.0}, {:.0})", p.x, p.y));
            println!("{}\t{:.3}\t{}", region.index, region.shape_confidence, corners.join(" "));
        }

        let output = self.output.clone().unwrap_or_else(|| {
            let stem = self.image.file_stem().unwrap_or_default().to_string_lossy();
            self.image.with_file_name(format!("{}_regions.png", stem))
        });
        draw_quads(&image, regions.iter().map(|r| &r.quad)).save(&output)?;
        info!("检测到 {} 个候选区域，已保存到 {}", regions.len(), output.display());
        Ok(())
    }
}
