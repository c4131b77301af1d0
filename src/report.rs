use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::ValueEnum;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::DetectError;
use crate::fingerprint::CardId;
use crate::segment::CandidateRegion;
use crate::utils::{sanitize_file_name, unique_path};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Matched,
    Ambiguous,
    NoMatch,
}

/// 校正后图像相对参考图的旋转角度
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    #[serde(rename = "0")]
    Upright,
    #[serde(rename = "180")]
    Flipped,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Alternative {
    pub card: CardId,
    pub distance: u32,
}

/// 单个候选区域的识别结果
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub index: usize,
    pub region: CandidateRegion,
    pub verdict: Verdict,
    /// 仅在 verdict 为 matched 时存在
    pub card: Option<CardId>,
    /// 距离并列最小的所有卡牌
    pub tied: Vec<CardId>,
    pub distance: Option<u32>,
    pub is_confident: bool,
    pub separation: Option<f32>,
    pub orientation: Orientation,
    pub alternatives: Vec<Alternative>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Processed,
    Unreadable,
    Cancelled,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImageReport {
    pub source: String,
    pub status: ImageStatus,
    pub results: Vec<MatchResult>,
    pub unmatched: usize,
    pub ambiguous: usize,
    pub failed: usize,
    pub issues: Vec<DetectError>,
    pub elapsed_ms: u64,
}

impl ImageReport {
    pub fn new(source: impl Into<String>, status: ImageStatus) -> Self {
        Self {
            source: source.into(),
            status,
            results: vec![],
            unmatched: 0,
            ambiguous: 0,
            failed: 0,
            issues: vec![],
            elapsed_ms: 0,
        }
    }

    pub fn unreadable(source: impl Into<String>, error: DetectError) -> Self {
        let mut report = Self::new(source, ImageStatus::Unreadable);
        report.issues.push(error);
        report
    }

    pub fn matched(&self) -> impl Iterator<Item = &MatchResult> {
        self.results.iter().filter(|r| r.verdict == Verdict::Matched)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct BatchReport {
    pub images: Vec<ImageReport>,
    pub processed: usize,
    pub unreadable: usize,
    pub cancelled: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub ambiguous: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn push(&mut self, report: ImageReport) {
        match report.status {
            ImageStatus::Processed => self.processed += 1,
            ImageStatus::Unreadable => self.unreadable += 1,
            ImageStatus::Cancelled => self.cancelled += 1,
        }
        self.matched += report.matched().count();
        self.unmatched += report.unmatched;
        self.ambiguous += report.ambiguous;
        self.failed += report.failed;
        self.images.push(report);
    }
}

/// 识别后如何整理输入图片
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Organize {
    /// 不整理
    #[default]
    None,
    /// 复制到 <输出目录>/<系列>/<卡名>.<扩展名>
    Copy,
    /// 移动到 <输出目录>/<系列>/<卡名>.<扩展名>，仅限只有一个可信结果的图片
    Move,
}

pub const LISTING_NAME: &str = "cards.csv";
pub const BATCH_REPORT_NAME: &str = "report.json";

/// 把识别结果持久化到输出目录
pub struct ReportWriter {
    out_dir: PathBuf,
    organize: Organize,
    listing: BufWriter<File>,
    report_names: HashSet<String>,
}

impl ReportWriter {
    pub fn create(out_dir: &Path, organize: Organize) -> Result<Self> {
        fs::create_dir_all(out_dir).map_err(|e| DetectError::unwritable(out_dir, e))?;
        let path = out_dir.join(LISTING_NAME);
        let file = File::create(&path).map_err(|e| DetectError::unwritable(&path, e))?;
        let mut listing = BufWriter::new(file);
        writeln!(listing, "source;index;set;name;distance;confident")
            .map_err(|e| DetectError::unwritable(&path, e))?;
        Ok(Self { out_dir: out_dir.to_path_buf(), organize, listing, report_names: HashSet::new() })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// 写入单张图片的报告，`source_path` 为输入图片的路径
    pub fn write(&mut self, report: &ImageReport, source_path: &Path) -> Result<()> {
        let stem = source_path
            .file_stem()
            .map(|s| sanitize_file_name(&s.to_string_lossy()))
            .unwrap_or_else(|| "image".to_owned());
        let mut name = stem.clone();
        let mut i = 1;
        while !self.report_names.insert(name.clone()) || name == "report" || name == "cards" {
            name = format!("{}_{}", stem, i);
            i += 1;
        }
        let path = self.out_dir.join(format!("{}.json", name));
        let json = serde_json::to_vec_pretty(report)?;
        fs::write(&path, json).map_err(|e| DetectError::unwritable(&path, e))?;

        let listing_path = self.out_dir.join(LISTING_NAME);
        for result in report.matched() {
            let Some(card) = &result.card else { continue };
            writeln!(
                self.listing,
                "{};{};{};{};{};{}",
                csv_field(&report.source),
                result.index,
                csv_field(&card.set),
                csv_field(&card.name),
                result.distance.map(|d| d.to_string()).unwrap_or_default(),
                result.is_confident
            )
            .map_err(|e| DetectError::unwritable(&listing_path, e))?;
        }

        if report.status == ImageStatus::Processed {
            self.organize(report, source_path)?;
        }
        Ok(())
    }

    fn organize(&self, report: &ImageReport, source_path: &Path) -> Result<()> {
        let cards = report.matched().filter(|r| r.is_confident).filter_map(|r| r.card.as_ref());
        let cards = cards.collect::<Vec<_>>();
        let ext =
            source_path.extension().map(|e| e.to_string_lossy().into_owned()).unwrap_or_default();
        match self.organize {
            Organize::None => {}
            Organize::Copy => {
                for card in cards {
                    let dest = self.destination(card, &ext)?;
                    fs::copy(source_path, &dest).map_err(|e| DetectError::unwritable(&dest, e))?;
                    debug!("复制 {} -> {}", source_path.display(), dest.display());
                }
            }
            Organize::Move => {
                if let [card] = cards.as_slice() {
                    let dest = self.destination(card, &ext)?;
                    move_file(source_path, &dest).map_err(|e| DetectError::unwritable(&dest, e))?;
                    debug!("移动 {} -> {}", source_path.display(), dest.display());
                }
            }
        }
        Ok(())
    }

    fn destination(&self, card: &CardId, ext: &str) -> Result<PathBuf> {
        let dir = self.out_dir.join(sanitize_file_name(&card.set));
        fs::create_dir_all(&dir).map_err(|e| DetectError::unwritable(&dir, e))?;
        Ok(unique_path(&dir, &sanitize_file_name(&card.name), ext))
    }

    /// 写入汇总报告，返回其路径
    pub fn finish(mut self, batch: &BatchReport) -> Result<PathBuf> {
        let listing_path = self.out_dir.join(LISTING_NAME);
        self.listing.flush().map_err(|e| DetectError::unwritable(&listing_path, e))?;
        let path = self.out_dir.join(BATCH_REPORT_NAME);
        let json = serde_json::to_vec_pretty(batch)?;
        fs::write(&path, json).map_err(|e| DetectError::unwritable(&path, e))?;
        info!("报告已写入 {}", path.display());
        Ok(path)
    }
}

/// 分号是列表的分隔符，不能出现在字段中
fn csv_field(s: &str) -> String {
    s.replace([';', '\n', '\r'], ",")
}

fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    // 跨文件系统时 rename 会失败，退回到复制后删除
    if fs::rename(from, to).is_err() {
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}
