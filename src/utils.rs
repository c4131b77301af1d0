use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use indicatif::ProgressStyle;
use regex::Regex;
use walkdir::WalkDir;

use crate::geometry::Quad;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} ({eta}) {msg}",
    )
    .expect("invalid progress bar template")
    .progress_chars("##-")
}

/// 由逗号分隔的后缀列表构造正则，例如 `jpg,png`
pub fn suffix_regex(suffix: &str) -> Result<Regex> {
    let re = format!("(?i)^({})$", suffix.replace(',', "|"));
    Regex::new(&re).with_context(|| format!("无效的后缀列表: {}", suffix))
}

/// 扫描图片：路径是文件时直接返回，是目录时递归查找匹配后缀的文件，结果按路径排序
pub fn scan_images(path: &Path, suffix: &Regex) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(anyhow::anyhow!("路径不存在: {}", path.display()));
    }
    let mut paths = vec![];
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry.with_context(|| format!("扫描目录失败: {}", path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry.path().extension().map(|ext| ext.to_string_lossy());
        if ext.is_some_and(|ext| suffix.is_match(&ext)) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

pub fn imread(path: &Path) -> Result<RgbImage> {
    let img = image::open(path).with_context(|| format!("无法读取图片: {}", path.display()))?;
    Ok(img.to_rgb8())
}

/// 在 `dir` 下找一个不存在的文件名，重名时追加 `_1`、`_2` 等后缀
pub fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let name = |suffix: String| {
        if ext.is_empty() { format!("{stem}{suffix}") } else { format!("{stem}{suffix}.{ext}") }
    };
    let mut path = dir.join(name(String::new()));
    let mut i = 1;
    while path.exists() {
        path = dir.join(name(format!("_{}", i)));
        i += 1;
    }
    path
}

/// 把名字中不能出现在文件名里的字符替换掉
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// 在图片上画出四边形，第一个顶点用圆点标记
pub fn draw_quads<'a>(image: &RgbImage, quads: impl IntoIterator<Item = &'a Quad>) -> RgbImage {
    let mut output = image.clone();
    let thickness = (image.width().max(image.height()) / 500).max(1) as f32;
    let color = Rgb([0, 255, 0]);
    for quad in quads {
        for i in 0..4 {
            let (a, b) = (quad.corners[i], quad.corners[(i + 1) % 4]);
            for t in 0..thickness as i32 {
                let o = t as f32 - thickness / 2.;
                draw_line_segment_mut(
                    &mut output,
                    (a.x as f32 + o, a.y as f32 + o),
                    (b.x as f32 + o, b.y as f32 + o),
                    color,
                );
            }
        }
        let start = quad.corners[0];
        let radius = (thickness * 3.) as i32;
        let center = (start.x as i32, start.y as i32);
        draw_filled_circle_mut(&mut output, center, radius, Rgb([255, 0, 0]));
    }
    output
}
