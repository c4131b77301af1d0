use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::bounded;
use image::RgbImage;
use image::imageops::rotate180;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::config::{MatchOptions, SegmentOptions};
use crate::error::DetectError;
use crate::fingerprint::FingerprintGenerator;
use crate::matcher::{Match, Matcher};
use crate::phash::PerceptualHasher;
use crate::rectify::{PerspectiveRectifier, Rectifier};
use crate::report::{
    Alternative, BatchReport, ImageReport, ImageStatus, MatchResult, Orientation, Verdict,
};
use crate::segment::{CandidateRegion, ContourSegmenter, Segmenter};
use crate::store::ReferenceStore;
use crate::utils::{draw_quads, sanitize_file_name};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub segment: SegmentOptions,
    pub matching: MatchOptions,
    /// 同时尝试旋转 180° 后的图像
    pub try_flip: bool,
    /// 保存校正后的卡牌图像和候选区域标注图
    pub debug_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segment: SegmentOptions::default(),
            matching: MatchOptions::default(),
            try_flip: true,
            debug_dir: None,
        }
    }
}

/// 批处理的取消标记，可在多个线程间共享
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct Pipeline {
    store: Arc<ReferenceStore>,
    segmenter: Box<dyn Segmenter>,
    rectifier: Box<dyn Rectifier>,
    generator: Box<dyn FingerprintGenerator>,
    config: PipelineConfig,
}

impl Pipeline {
    /// 使用默认的分割、校正和指纹实现，指纹参数取自参考库
    pub fn new(store: Arc<ReferenceStore>, config: PipelineConfig) -> Self {
        let params = *store.params();
        Self {
            segmenter: Box::new(ContourSegmenter::new(config.segment.clone())),
            rectifier: Box::new(PerspectiveRectifier::new(
                params.canonical_width,
                params.canonical_height,
            )),
            generator: Box::new(PerceptualHasher::new(params)),
            store,
            config,
        }
    }

    /// 使用自定义的各阶段实现
    pub fn with_stages(
        store: Arc<ReferenceStore>,
        segmenter: Box<dyn Segmenter>,
        rectifier: Box<dyn Rectifier>,
        generator: Box<dyn FingerprintGenerator>,
        config: PipelineConfig,
    ) -> Result<Self> {
        let params = store.params();
        if generator.params() != params {
            let reason = format!("指纹参数 {:?} 与参考库 {:?} 不同", generator.params(), params);
            return Err(DetectError::ReferenceStoreMismatch { reason }.into());
        }
        if rectifier.size() != (params.canonical_width, params.canonical_height) {
            return Err(DetectError::ReferenceStoreMismatch {
                reason: format!("校正尺寸 {:?} 与参考库不同", rectifier.size()),
            }
            .into());
        }
        Ok(Self { store, segmenter, rectifier, generator, config })
    }

    pub fn store(&self) -> &ReferenceStore {
        &self.store
    }

    pub fn detect_image(&self, source: &str, image: &RgbImage) -> ImageReport {
        let start = Instant::now();
        let mut report = ImageReport::new(source, ImageStatus::Processed);

        let regions = self.segmenter.segment(source, image);
        debug!("{}: 检测到 {} 个候选区域", source, regions.len());
        if regions.is_empty() {
            report.issues.push(DetectError::NoCardDetected);
        }

        let outcomes = regions
            .par_iter()
            .map(|region| self.process_region(region, image))
            .collect::<Vec<_>>();

        let keep = nested_keep(&regions, &outcomes);
        for ((region, outcome), keep) in regions.iter().zip(outcomes).zip(keep) {
            if !keep {
                debug!("{}: 区域 {} 与其他区域嵌套，忽略", source, region.index);
                continue;
            }
            match outcome {
                Ok(result) => {
                    match result.verdict {
                        Verdict::Matched => {}
                        Verdict::Ambiguous => {
                            report.ambiguous += 1;
                            report.issues.push(DetectError::AmbiguousMatch {
                                index: result.index,
                                candidates: result.tied.clone(),
                            });
                        }
                        Verdict::NoMatch => {
                            report.unmatched += 1;
                            report.issues.push(DetectError::NoConfidentMatch {
                                index: result.index,
                                distance: result.distance,
                            });
                        }
                    }
                    report.results.push(result);
                }
                Err(e) => {
                    warn!("{}: 区域 {} 处理失败: {:#}", source, region.index, e);
                    report.failed += 1;
                    let reason = format!("{:#}", e);
                    report.issues.push(DetectError::RegionFailed { index: region.index, reason });
                }
            }
        }

        if let Some(dir) = &self.config.debug_dir {
            let overlay = draw_quads(image, regions.iter().map(|r| &r.quad));
            let name = format!("{}_regions.png", sanitize_file_name(source));
            if let Err(e) = save_image(dir, &name, &overlay) {
                warn!("{:#}", e);
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        report
    }

    pub fn detect_file(&self, path: &Path) -> ImageReport {
        let source = path.to_string_lossy().into_owned();
        let image = match image::open(path) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                warn!("无法读取图片 {}: {}", path.display(), e);
                return ImageReport::unreadable(source, DetectError::unreadable(path, e));
            }
        };
        self.detect_image(&source, &image)
    }

    fn process_region(&self, region: &CandidateRegion, image: &RgbImage) -> Result<MatchResult> {
        let canonical = self.rectifier.rectify(image, &region.quad)?;
        let matcher = Matcher::new(&self.store, &self.config.matching);

        let mut best = matcher.best_match(&self.generator.fingerprint(&canonical));
        let mut orientation = Orientation::Upright;
        if self.config.try_flip {
            let flipped = matcher.best_match(&self.generator.fingerprint(&rotate180(&canonical)));
            if !best.better_than(&flipped) {
                best = flipped;
                orientation = Orientation::Flipped;
            }
        }

        if let Some(dir) = &self.config.debug_dir {
            let name = format!("{}_{}.png", sanitize_file_name(&region.source), region.index);
            if let Err(e) = save_image(dir, &name, &canonical) {
                warn!("{:#}", e);
            }
        }

        Ok(self.to_result(region, best, orientation, &matcher))
    }

    fn to_result(
        &self,
        region: &CandidateRegion,
        m: Match,
        orientation: Orientation,
        matcher: &Matcher,
    ) -> MatchResult {
        let tied = m.nearest.iter().map(|&i| matcher.entry(i).card.clone()).collect::<Vec<_>>();
        let verdict = if m.distance.is_none() || !m.confident {
            Verdict::NoMatch
        } else if m.is_ambiguous() {
            Verdict::Ambiguous
        } else {
            Verdict::Matched
        };
        let card = if verdict == Verdict::Matched { tied.first().cloned() } else { None };
        let alternatives = m
            .alternatives
            .iter()
            .map(|&(i, distance)| Alternative { card: matcher.entry(i).card.clone(), distance })
            .collect();
        MatchResult {
            index: region.index,
            region: region.clone(),
            verdict,
            card,
            tied,
            distance: m.distance,
            is_confident: m.confident,
            separation: m.separation,
            orientation,
            alternatives,
        }
    }

    /// 在 rayon 线程池中并行处理多张图片
    ///
    /// 每张图片的报告通过有界通道按完成顺序交给 `on_report`，它在调用者的线程上执行，
    /// 通常用于立即写入输出。`on_report` 出错时停止处理剩余图片并返回该错误。
    /// 返回的汇总报告按输入顺序排列。
    pub fn run_batch<F>(
        &self,
        paths: &[PathBuf],
        cancel: &CancelFlag,
        mut on_report: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&ImageReport, &Path) -> Result<()>,
    {
        info!("开始识别 {} 张图片", paths.len());
        let (tx, rx) = bounded::<(usize, ImageReport)>(num_cpus::get() * 2);

        let mut reports: Vec<Option<ImageReport>> = vec![None; paths.len()];
        let mut failure = None;
        std::thread::scope(|s| {
            s.spawn(move || {
                paths.par_iter().enumerate().for_each_with(tx, |tx, (i, path)| {
                    let report = if cancel.is_cancelled() {
                        ImageReport::new(path.to_string_lossy(), ImageStatus::Cancelled)
                    } else {
                        self.detect_file(path)
                    };
                    // 接收端提前退出时忽略发送错误
                    let _ = tx.send((i, report));
                });
            });

            for (i, report) in rx.iter() {
                if failure.is_none() && report.status != ImageStatus::Cancelled {
                    if let Err(e) = on_report(&report, &paths[i]) {
                        cancel.cancel();
                        failure = Some(e);
                    }
                }
                reports[i] = Some(report);
            }
        });

        if let Some(e) = failure {
            return Err(e);
        }

        let mut batch = BatchReport::default();
        for report in reports {
            batch.push(report.ok_or_else(|| anyhow!("图片报告缺失"))?);
        }
        info!(
            "识别完成: {} 张已处理，{} 张无法读取，{} 张已取消，共识别 {} 张卡牌",
            batch.processed, batch.unreadable, batch.cancelled, batch.matched
        );
        Ok(batch)
    }
}

/// 嵌套的候选区域只报告一个
///
/// 从大到小处理：识别出的区域里面的区域是卡面上的图案；没有识别出、却包含识别出区域的是垫子之类的容器。
/// 都没有识别出时保留最外侧的区域。
fn nested_keep(regions: &[CandidateRegion], outcomes: &[Result<MatchResult>]) -> Vec<bool> {
    let recognized = outcomes
        .iter()
        .map(|o| o.as_ref().is_ok_and(|r| r.is_confident))
        .collect::<Vec<_>>();
    let areas = regions.iter().map(|r| r.quad.area()).collect::<Vec<_>>();
    let encloses = |outer: usize, inner: usize| {
        outer != inner
            && areas[outer] > areas[inner]
            && regions[outer].quad.contains(&regions[inner].quad)
    };

    let mut order = (0..regions.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| areas[b].total_cmp(&areas[a]));

    let mut keep = vec![false; regions.len()];
    let mut kept: Vec<usize> = vec![];
    for i in order {
        keep[i] = if recognized[i] {
            !kept.iter().any(|&j| recognized[j] && encloses(j, i))
        } else {
            let container = (0..regions.len()).any(|j| recognized[j] && encloses(i, j));
            !container && !kept.iter().any(|&j| encloses(j, i))
        };
        if keep[i] {
            kept.push(i);
        }
    }
    keep
}

fn save_image(dir: &Path, name: &str, image: &RgbImage) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("无法创建目录: {}", dir.display()))?;
    let path = dir.join(name);
    image.save(&path).with_context(|| format!("无法保存调试图片: {}", path.display()))?;
    Ok(())
}
