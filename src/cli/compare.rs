use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{FingerprintOptions, Opts};
use crate::fingerprint::{Fingerprint, FingerprintGenerator};
use crate::geometry::Quad;
use crate::matcher::compare;
use crate::phash::PerceptualHasher;
use crate::rectify::{PerspectiveRectifier, Rectifier};
use crate::store::ReferenceStore;
use crate::utils::imread;

#[derive(Parser, Debug, Clone)]
pub struct CompareCommand {
    #[command(flatten)]
    pub fingerprint: FingerprintOptions,
    /// 使用该参考库的指纹参数，忽略命令行中的指纹参数
    #[arg(short = 'S', long, value_name = "FILE")]
    pub store: Option<PathBuf>,
    /// 图片1，整张图片视为一张卡牌
    pub image1: PathBuf,
    /// 图片2，整张图片视为一张卡牌
    pub image2: PathBuf,
}

impl SubCommandExtend for CompareCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let params = match &self.store {
            Some(path) => *ReferenceStore::load(path)?.params(),
            None => self.fingerprint.params(),
        };
        let rectifier = PerspectiveRectifier::new(params.canonical_width, params.canonical_height);
        let hasher = PerceptualHasher::new(params);

        let fingerprint = |path: &Path| -> Result<Fingerprint> {
            let image = imread(path)?;
            let quad = Quad::full_frame(image.width(), image.height());
            let canonical = rectifier.rectify(&image, &quad)?;
            Ok(hasher.fingerprint(&canonical))
        };
        let fp1 = fingerprint(&self.image1)?;
        let fp2 = fingerprint(&self.image2)?;

        println!("{}\t{}", fp1, self.image1.display());
        println!("{}\t{}", fp2, self.image2.display());
        println!("距离: {}/{}", compare(&fp1, &fp2), params.bits());
        Ok(())
    }
}
