//! 在图片中寻找卡牌形状的四边形
//!
//! 流程：灰度化并缩小 -> 模糊 -> 二值化 -> 轮廓 -> 凸包 -> 四边形拟合 -> 过滤 -> 去重。

use image::imageops::{FilterType, grayscale, resize};
use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::find_contours;
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::convex_hull;
use imageproc::morphology::dilate;
use imageproc::point::Point as IPoint;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{Binarize, SegmentOptions};
use crate::geometry::{
    CARD_ASPECT, Point, Quad, polygon_area, polygon_perimeter, reduce_to_quad, simplify_closed,
};

/// Douglas-Peucker 容差占凸包周长的比例
const SIMPLIFY_EPSILON: f64 = 0.01;

/// 图片中一个可能是卡牌的区域
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRegion {
    pub source: String,
    /// 在该图片所有候选中的序号
    pub index: usize,
    /// 原图坐标，顺时针，从左上角开始
    pub quad: Quad,
    pub shape_confidence: f32,
}

pub trait Segmenter: Send + Sync {
    fn segment(&self, source: &str, image: &RgbImage) -> Vec<CandidateRegion>;
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    quad: Quad,
    area: f64,
    confidence: f64,
}

pub struct ContourSegmenter {
    opts: SegmentOptions,
}

impl ContourSegmenter {
    pub fn new(opts: SegmentOptions) -> Self {
        Self { opts }
    }

    /// 灰度化、缩小并模糊，返回处理后的图片和缩放比例
    fn prepare(&self, image: &RgbImage) -> (GrayImage, f64) {
        let gray = grayscale(image);
        let (w, h) = gray.dimensions();
        let longest = w.max(h);
        let (gray, scale) = if longest > self.opts.work_size && self.opts.work_size > 0 {
            let scale = self.opts.work_size as f64 / longest as f64;
            let nw = ((w as f64 * scale).round() as u32).max(1);
            let nh = ((h as f64 * scale).round() as u32).max(1);
            (resize(&gray, nw, nh, FilterType::Triangle), scale)
        } else {
            (gray, 1.)
        };
        if self.opts.blur_sigma > 0. {
            (gaussian_blur_f32(&gray, self.opts.blur_sigma), scale)
        } else {
            (gray, scale)
        }
    }

    pub fn binarize(&self, gray: &GrayImage) -> GrayImage {
        match self.opts.binarize {
            Binarize::Canny => {
                let edges = canny(gray, self.opts.canny_low, self.opts.canny_high);
                dilate(&edges, Norm::LInf, 1)
            }
            Binarize::Otsu => threshold(gray, otsu_level(gray)),
            Binarize::Fixed(level) => threshold(gray, level),
        }
    }

    /// 由一个轮廓拟合出卡牌形状的四边形，不符合条件时返回 None
    fn fit_quad(&self, points: &[IPoint<i32>], image_area: f64) -> Option<Candidate> {
        if points.len() < 4 {
            return None;
        }
        let hull = convex_hull(points)
            .into_iter()
            .map(|p| Point::new(p.x as f64, p.y as f64))
            .collect::<Vec<_>>();
        let hull_area = polygon_area(&hull);
        // 面积太小的凸包不可能拟合出合格的四边形
        if hull_area < self.opts.min_area * image_area * 0.5 {
            return None;
        }

        let simplified = simplify_closed(&hull, polygon_perimeter(&hull) * SIMPLIFY_EPSILON);
        let quad = Quad::new(reduce_to_quad(&simplified)?).ordered();
        if !quad.is_convex() {
            return None;
        }

        let area = quad.area();
        let fraction = area / image_area;
        if fraction < self.opts.min_area || fraction > self.opts.max_area {
            return None;
        }
        let aspect_error = (quad.aspect_ratio() - CARD_ASPECT).abs();
        if aspect_error > self.opts.aspect_tolerance {
            return None;
        }

        let fill = (hull_area / area).min(1.);
        let confidence = shape_confidence(fill, aspect_error, self.opts.aspect_tolerance);
        Some(Candidate { quad, area, confidence })
    }

    /// 处理嵌套和重叠的候选
    ///
    /// 面积接近的嵌套候选是同一条边缘的内外两侧轮廓或卡牌的内框，只保留外侧。
    /// 面积相差较大的嵌套（卡面上的插图框、垫子上的卡牌）两者都保留，由识别结果决定。
    fn resolve(&self, mut cands: Vec<Candidate>) -> Vec<Candidate> {
        cands.sort_by(|a, b| b.confidence.total_cmp(&a.confidence).then(b.area.total_cmp(&a.area)));

        let mut dropped = vec![false; cands.len()];
        for (i, outer) in cands.iter().enumerate() {
            for (j, inner) in cands.iter().enumerate() {
                if i == j || inner.area >= outer.area || !outer.quad.contains(&inner.quad) {
                    continue;
                }
                if inner.area / outer.area >= self.opts.nest_ratio {
                    dropped[j] = true;
                }
            }
        }

        let mut kept: Vec<Candidate> = vec![];
        for (cand, dropped) in cands.into_iter().zip(dropped) {
            if dropped {
                continue;
            }
            let overlapped = kept.iter().any(|k| {
                let nested = k.quad.contains(&cand.quad) || cand.quad.contains(&k.quad);
                !nested && k.quad.iou(&cand.quad) > self.opts.overlap_threshold
            });
            if !overlapped {
                kept.push(cand);
            }
        }
        kept
    }
}

impl Segmenter for ContourSegmenter {
    fn segment(&self, source: &str, image: &RgbImage) -> Vec<CandidateRegion> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return vec![];
        }
        let (gray, scale) = self.prepare(image);
        let binary = self.binarize(&gray);
        let image_area = (gray.width() * gray.height()) as f64;

        let contours = find_contours::<i32>(&binary);
        let cands = contours
            .iter()
            .filter_map(|c| self.fit_quad(c.points.as_slice(), image_area))
            .collect::<Vec<_>>();
        debug!("{}: {} 个轮廓，{} 个候选", source, contours.len(), cands.len());

        let mut quads = self
            .resolve(cands)
            .into_iter()
            .map(|c| (c.quad.scale(1. / scale).ordered(), c.confidence as f32))
            .collect::<Vec<_>>();
        reading_order(&mut quads);

        if quads.is_empty() && self.opts.whole_image_fallback {
            quads.push((Quad::full_frame(width, height), 0.));
        }

        quads
            .into_iter()
            .enumerate()
            .map(|(index, (quad, shape_confidence))| CandidateRegion {
                source: source.to_owned(),
                index,
                quad,
                shape_confidence,
            })
            .collect()
    }
}

/// 形状置信度：凸包填充率乘以比例的吻合程度
fn shape_confidence(fill: f64, aspect_error: f64, tolerance: f64) -> f64 {
    if tolerance > 0. { fill * (1. - aspect_error / tolerance).max(0.) } else { fill }
}

/// 按阅读顺序排列：先分行，再在行内从左到右
///
/// 质心纵向相差不超过中位高度一半的候选属于同一行。
fn reading_order(quads: &mut [(Quad, f32)]) {
    if quads.is_empty() {
        return;
    }
    let mut heights = quads.iter().map(|(q, _)| quad_height(q)).collect::<Vec<_>>();
    heights.sort_by(f64::total_cmp);
    let tolerance = heights[heights.len() / 2] / 2.;

    quads.sort_by(|(a, _), (b, _)| a.centroid().y.total_cmp(&b.centroid().y));
    let mut rows = Vec::with_capacity(quads.len());
    let mut row = 0;
    let mut top = quads[0].0.centroid().y;
    for (quad, _) in quads.iter() {
        let y = quad.centroid().y;
        if y - top > tolerance {
            row += 1;
            top = y;
        }
        rows.push(row);
    }
    let mut keyed = rows.into_iter().zip(quads.iter().copied()).collect::<Vec<_>>();
    keyed.sort_by(|(ra, (a, _)), (rb, (b, _))| {
        ra.cmp(rb).then(a.centroid().x.total_cmp(&b.centroid().x))
    });
    for (slot, (_, item)) in quads.iter_mut().zip(keyed) {
        *slot = item;
    }
}

fn quad_height(quad: &Quad) -> f64 {
    let ys = quad.corners.map(|p| p.y);
    let (min, max) = ys.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &y| (lo.min(y), hi.max(y)));
    max - min
}

fn threshold(gray: &GrayImage, level: u8) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > level { Luma([255]) } else { Luma([0]) }
    })
}
