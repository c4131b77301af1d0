use std::convert::Infallible;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::phash::{FingerprintParams, HashAlgorithm};
use crate::store::STORE_EXTENSION;

static STORE_DIR: LazyLock<StoreDir> = LazyLock::new(|| {
    let path = match ProjectDirs::from("", "cardmatch", "cardmatch") {
        Some(dirs) => dirs.data_dir().join("stores"),
        None => PathBuf::from("stores"),
    };
    StoreDir { path }
});

fn default_store_dir() -> &'static str {
    STORE_DIR.path().to_str().unwrap_or("stores")
}

/// 二值化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binarize {
    /// Canny 边缘，膨胀一个像素使边框闭合
    Canny,
    /// Otsu 自动阈值
    Otsu,
    /// 固定阈值
    Fixed(u8),
}

#[derive(Parser, Debug, Clone)]
pub struct SegmentOptions {
    /// 分割时图片长边的最大尺寸，超过则等比缩小
    #[arg(long, value_name = "PIXELS", default_value_t = 1024)]
    pub work_size: u32,
    /// 二值化前高斯模糊的 sigma，0 表示不模糊
    #[arg(long, value_name = "SIGMA", default_value_t = 1.5)]
    pub blur_sigma: f32,
    /// 二值化方式：canny、otsu 或 0 到 255 之间的固定阈值
    #[arg(long, value_name = "METHOD", default_value = "canny", value_parser = parse_binarize)]
    pub binarize: Binarize,
    /// Canny 低阈值
    #[arg(long, value_name = "THRESHOLD", default_value_t = 40.)]
    pub canny_low: f32,
    /// Canny 高阈值
    #[arg(long, value_name = "THRESHOLD", default_value_t = 120.)]
    pub canny_high: f32,
    /// 卡牌面积占图片面积的最小比例
    #[arg(long, value_name = "RATIO", default_value_t = 0.01)]
    pub min_area: f64,
    /// 卡牌面积占图片面积的最大比例
    #[arg(long, value_name = "RATIO", default_value_t = 0.99)]
    pub max_area: f64,
    /// 短边/长边比例与 2.5/3.5 的最大偏差
    #[arg(long, value_name = "DELTA", default_value_t = 0.12, value_parser = parse_tolerance)]
    pub aspect_tolerance: f64,
    /// 嵌套的两个候选面积比不低于该值时视为同一张卡牌的内外边缘，只保留外侧；
    /// 低于该值时两者都保留，识别后再决定哪个是卡牌
    #[arg(long, value_name = "RATIO", default_value_t = 0.8)]
    pub nest_ratio: f64,
    /// 两个候选的交并比超过该值时只保留置信度高的一个
    #[arg(long, value_name = "IOU", default_value_t = 0.5)]
    pub overlap_threshold: f64,
    /// 没有检测到卡牌时，把整张图片当作一张卡牌
    #[arg(long)]
    pub whole_image_fallback: bool,
}

impl Default for SegmentOptions {
    /// 与命令行默认值一致
    fn default() -> Self {
        Self::parse_from(["segment"])
    }
}

#[derive(Parser, Debug, Clone)]
pub struct FingerprintOptions {
    /// 指纹算法
    #[arg(long, value_enum, default_value_t = HashAlgorithm::Phash)]
    pub algorithm: HashAlgorithm,
    /// 指纹边长，指纹共 N*N 位
    #[arg(long, value_name = "N", default_value_t = 16, value_parser = clap::value_parser!(u32).range(4..=64))]
    pub hash_size: u32,
    /// 校正后卡牌图像的尺寸，必须为竖向
    #[arg(long, value_name = "WIDTHxHEIGHT", default_value = "250x350", value_parser = parse_size)]
    pub canonical_size: (u32, u32),
    /// 计算指纹前不做直方图均衡化
    #[arg(long)]
    pub no_equalize: bool,
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self::parse_from(["fingerprint"])
    }
}

impl FingerprintOptions {
    pub fn params(&self) -> FingerprintParams {
        FingerprintParams {
            algorithm: self.algorithm,
            hash_size: self.hash_size,
            canonical_width: self.canonical_size.0,
            canonical_height: self.canonical_size.1,
            equalize: !self.no_equalize,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct MatchOptions {
    /// 认为匹配可信的最大汉明距离
    #[arg(long, value_name = "BITS", default_value_t = 64)]
    pub max_distance: u32,
    /// 可信匹配要求的最小分离度：其余距离的均值减去最小距离，再除以其余距离的标准差
    #[arg(long, value_name = "SIGMA")]
    pub min_separation: Option<f32>,
    /// 报告中列出的最近候选数量
    #[arg(long, value_name = "K", default_value_t = 3, value_parser = clap::value_parser!(u32).range(0..=8))]
    pub alternatives: u32,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self::parse_from(["match"])
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "cardmatch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 参考库所在目录
    #[arg(short = 'd', long, default_value = default_store_dir())]
    pub store_dir: StoreDir,
    /// 工作线程数，默认为 CPU 核心数
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 从参考图片目录构建参考库
    Build(BuildCommand),
    /// 识别图片中的卡牌
    Detect(DetectCommand),
    /// 显示参考库信息
    Info(InfoCommand),
    /// 计算两张卡牌图片的指纹距离
    Compare(CompareCommand),
    /// 标出图片中检测到的卡牌区域
    Show(ShowCommand),
}

#[derive(Debug, Clone)]
pub struct StoreDir {
    path: PathBuf,
}

impl StoreDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回某个系列的参考库路径
    pub fn store(&self, set: &str) -> PathBuf {
        self.path.join(format!("{}.{}", set, STORE_EXTENSION))
    }

    /// 返回目录下所有参考库的路径，按文件名排序
    pub fn all_stores(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.path) else {
            return vec![];
        };
        let mut paths = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file() && path.extension().is_some_and(|ext| ext == STORE_EXTENSION)
            })
            .collect::<Vec<_>>();
        paths.sort();
        paths
    }
}

impl FromStr for StoreDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

fn parse_size(s: &str) -> anyhow::Result<(u32, u32)> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(anyhow::anyhow!("无效的尺寸: {}", s));
    }
    let (width, height) = (parts[0].parse()?, parts[1].parse()?);
    if width < 8 || width > height {
        return Err(anyhow::anyhow!("尺寸必须为竖向且宽度不小于 8: {}", s));
    }
    Ok((width, height))
}

fn parse_tolerance(s: &str) -> anyhow::Result<f64> {
    let value: f64 = s.parse()?;
    if value.is_nan() || value <= 0. {
        return Err(anyhow::anyhow!("比例偏差必须大于 0: {}", s));
    }
    Ok(value)
}

fn parse_binarize(s: &str) -> Result<Binarize, String> {
    match s {
        "canny" => Ok(Binarize::Canny),
        "otsu" => Ok(Binarize::Otsu),
        _ => s.parse().map(Binarize::Fixed).map_err(|_| format!("无效的二值化方式: {}", s)),
    }
}
