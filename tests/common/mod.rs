#![allow(dead_code)]

use std::path::{Path, PathBuf};

use cardmatch::fingerprint::{Fingerprint, FingerprintGenerator};
use cardmatch::geometry::Quad;
use cardmatch::phash::{FingerprintParams, PerceptualHasher};
use cardmatch::rectify::{PerspectiveRectifier, Rectifier};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use imageproc::rect::Rect;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const CARD_WIDTH: u32 = 250;
pub const CARD_HEIGHT: u32 = 350;
const BORDER: u32 = 8;
const BORDER_COLOR: Rgb<u8> = Rgb([10, 10, 10]);

fn tone(rng: &mut StdRng) -> Rgb<u8> {
    let v = match rng.random_bool(0.5) {
        true => rng.random_range(20..60),
        false => rng.random_range(210..250),
    };
    Rgb([v, v.saturating_sub(rng.random_range(0..20)), v])
}

fn gradient(rng: &mut StdRng) -> impl Fn(f32, f32) -> Rgb<u8> + use<> {
    let from = [0; 3].map(|_| rng.random_range(90..170) as f32);
    let to = [0; 3].map(|_| rng.random_range(90..170) as f32);
    let vertical = rng.random_bool(0.5);
    move |u, v| {
        let t = if vertical { v } else { u };
        Rgb([0, 1, 2].map(|c| (from[c] + (to[c] - from[c]) * t) as u8))
    }
}

/// 插图框的位置和大小，接近卡牌比例，约占卡面的 37%
pub const ART_BOX: (u32, u32, u32, u32) = (20, 26, 210, 154);

/// 生成一张合成卡牌：黑色边框，渐变底色，上方带边框的插图，下方的文字栏和若干小圆点
pub fn card(seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let background = gradient(&mut rng);
    let mut img = RgbImage::from_fn(CARD_WIDTH, CARD_HEIGHT, |x, y| {
        if x < BORDER || y < BORDER || x >= CARD_WIDTH - BORDER || y >= CARD_HEIGHT - BORDER {
            return BORDER_COLOR;
        }
        background(x as f32 / CARD_WIDTH as f32, y as f32 / CARD_HEIGHT as f32)
    });

    // 插图：细边框，内部是自己的渐变和几块大色斑
    let (ax, ay, aw, ah) = ART_BOX;
    draw_filled_rect_mut(&mut img, Rect::at(ax as i32, ay as i32).of_size(aw, ah), BORDER_COLOR);
    let art = gradient(&mut rng);
    for y in ay + 3..ay + ah - 3 {
        for x in ax + 3..ax + aw - 3 {
            let (u, v) = ((x - ax) as f32 / aw as f32, (y - ay) as f32 / ah as f32);
            img.put_pixel(x, y, art(u, v));
        }
    }
    for _ in 0..4 {
        let r = rng.random_range(15..40);
        let x = rng.random_range(ax + 3 + r..ax + aw - 3 - r) as i32;
        let y = rng.random_range(ay + 3 + r..ay + ah - 3 - r) as i32;
        draw_filled_circle_mut(&mut img, (x, y), r as i32, tone(&mut rng));
    }

    // 文字栏：横贯卡面的色条
    let inner = CARD_WIDTH - 2 * BORDER;
    let mut y = ay + ah + 10 + rng.random_range(0..20);
    while y < 320 {
        let h = rng.random_range(8..20);
        let rect = Rect::at(BORDER as i32, y as i32).of_size(inner, h);
        draw_filled_rect_mut(&mut img, rect, tone(&mut rng));
        y += h + rng.random_range(15..40);
    }

    for _ in 0..6 {
        let r = rng.random_range(6..15);
        let x = rng.random_range(BORDER + r..CARD_WIDTH - BORDER - r) as i32;
        let y = rng.random_range(ay + ah + r..CARD_HEIGHT - BORDER - r) as i32;
        draw_filled_circle_mut(&mut img, (x, y), r as i32, tone(&mut rng));
    }
    img
}

/// 卡牌在场景中的位置：中心、旋转角度（弧度）和缩放
#[derive(Debug, Clone, Copy)]
pub struct Placement {
    pub cx: f64,
    pub cy: f64,
    pub angle: f64,
    pub scale: f64,
}

pub const SCENE_WIDTH: u32 = 1200;
pub const SCENE_HEIGHT: u32 = 900;

/// 默认的卡牌位置，位于场景中央且略有倾斜
pub const CENTER: Placement = Placement { cx: 600., cy: 450., angle: 0.15, scale: 1.6 };

/// 生成一个桌面场景：浅色背景，左上角一个正方形杯垫，底部边缘散落一些小圆点
pub fn scene(seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = RgbImage::from_fn(SCENE_WIDTH, SCENE_HEIGHT, |x, _| {
        let v = 185 + (20 * x / SCENE_WIDTH) as u8;
        Rgb([v, v, v - 10])
    });
    draw_filled_rect_mut(&mut img, Rect::at(30, 30).of_size(150, 150), Rgb([60, 40, 30]));
    for _ in 0..8 {
        let r = rng.random_range(8..16);
        let (x, y) = (rng.random_range(40..1160), rng.random_range(835..880));
        draw_filled_circle_mut(&mut img, (x, y), r, tone(&mut rng));
    }
    img
}

/// 把卡牌按位置贴到场景中，使用最近邻采样
pub fn place(scene: &mut RgbImage, card: &RgbImage, p: Placement) {
    let (cw, ch) = (card.width() as f64, card.height() as f64);
    let (sin, cos) = p.angle.sin_cos();
    let half_w = (cw * cos.abs() + ch * sin.abs()) * p.scale / 2. + 2.;
    let half_h = (cw * sin.abs() + ch * cos.abs()) * p.scale / 2. + 2.;
    let x0 = (p.cx - half_w).max(0.) as u32;
    let y0 = (p.cy - half_h).max(0.) as u32;
    let x1 = ((p.cx + half_w) as u32).min(scene.width());
    let y1 = ((p.cy + half_h) as u32).min(scene.height());
    for y in y0..y1 {
        for x in x0..x1 {
            let (dx, dy) = (x as f64 + 0.5 - p.cx, y as f64 + 0.5 - p.cy);
            let u = (dx * cos + dy * sin) / p.scale + cw / 2.;
            let v = (-dx * sin + dy * cos) / p.scale + ch / 2.;
            if u >= 0. && v >= 0. && u < cw && v < ch {
                scene.put_pixel(x, y, *card.get_pixel(u as u32, v as u32));
            }
        }
    }
}

/// 把卡牌的四个角（左上、右上、右下、左下）映射到场景中的任意凸四边形，模拟透视
pub fn place_quad(scene: &mut RgbImage, card: &RgbImage, corners: [(f32, f32); 4]) {
    let (w, h) = (card.width() as f32, card.height() as f32);
    let from = [(0., 0.), (w, 0.), (w, h), (0., h)];
    let projection = Projection::from_control_points(from, corners).unwrap();

    let (sw, sh) = scene.dimensions();
    let mut warped = RgbImage::new(sw, sh);
    warp_into(card, &projection, Interpolation::Nearest, Rgb([0, 0, 0]), &mut warped);
    let mut mask = GrayImage::new(sw, sh);
    let opaque = GrayImage::from_pixel(card.width(), card.height(), Luma([255]));
    warp_into(&opaque, &projection, Interpolation::Nearest, Luma([0]), &mut mask);

    for (x, y, m) in mask.enumerate_pixels() {
        if m[0] == 255 {
            scene.put_pixel(x, y, *warped.get_pixel(x, y));
        }
    }
}

/// 把场景里的矩形区域填成纯色，例如卡牌下面的垫子
pub fn fill(scene: &mut RgbImage, x: i32, y: i32, width: u32, height: u32, color: Rgb<u8>) {
    draw_filled_rect_mut(scene, Rect::at(x, y).of_size(width, height), color);
}

pub fn fingerprint(image: &RgbImage) -> Fingerprint {
    let params = FingerprintParams::default();
    let rectifier = PerspectiveRectifier::new(params.canonical_width, params.canonical_height);
    let quad = Quad::full_frame(image.width(), image.height());
    let canonical = rectifier.rectify(image, &quad).unwrap();
    PerceptualHasher::new(params).fingerprint(&canonical)
}

/// 把若干张合成卡牌写入目录，文件名为 `<name>.png`
pub fn write_references(dir: &Path, cards: &[(&str, u64)]) -> Vec<PathBuf> {
    cards
        .iter()
        .map(|(name, seed)| {
            let path = dir.join(format!("{}.png", name));
            card(*seed).save(&path).unwrap();
            path
        })
        .collect()
}

pub const REFERENCES: [(&str, u64); 5] =
    [("Alpha", 11), ("Bravo", 22), ("Charlie", 33), ("Delta", 44), ("Echo", 55)];
