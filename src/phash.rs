use std::f64::consts::PI;

use clap::ValueEnum;
use image::imageops::{FilterType, grayscale, resize};
use image::{GrayImage, RgbImage};
use imageproc::contrast::equalize_histogram;
use serde::{Deserialize, Serialize};

use crate::fingerprint::{Fingerprint, FingerprintGenerator};

#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// DCT 感知哈希
    Phash,
    /// 差值哈希
    Dhash,
}

/// 决定指纹是否可比较的全部参数，会随参考库一起保存
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintParams {
    pub algorithm: HashAlgorithm,
    /// 指纹为 hash_size * hash_size 位
    pub hash_size: u32,
    pub canonical_width: u32,
    pub canonical_height: u32,
    /// 计算哈希前做直方图均衡化
    pub equalize: bool,
}

impl Default for FingerprintParams {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Phash,
            hash_size: 16,
            canonical_width: 250,
            canonical_height: 350,
            equalize: true,
        }
    }
}

impl FingerprintParams {
    pub fn bits(&self) -> u32 {
        self.hash_size * self.hash_size
    }
}

pub struct PerceptualHasher {
    params: FingerprintParams,
    /// DCT 基函数，hash_size 行 x (4 * hash_size) 列
    dct: Vec<f64>,
}

impl PerceptualHasher {
    pub fn new(params: FingerprintParams) -> Self {
        let n = (params.hash_size * 4) as usize;
        let k = params.hash_size as usize;
        Self { params, dct: dct_basis(n, k) }
    }
}

impl FingerprintGenerator for PerceptualHasher {
    fn params(&self) -> &FingerprintParams {
        &self.params
    }

    fn fingerprint(&self, canonical: &RgbImage) -> Fingerprint {
        let mut gray = grayscale(canonical);
        if self.params.equalize {
            gray = equalize_histogram(&gray);
        }
        match self.params.algorithm {
            HashAlgorithm::Phash => p_hash(&gray, self.params.hash_size, &self.dct),
            HashAlgorithm::Dhash => d_hash(&gray, self.params.hash_size),
        }
    }
}

/// cos(π(2x+1)u / 2n)，u < k，x < n
fn dct_basis(n: usize, k: usize) -> Vec<f64> {
    let mut basis = Vec::with_capacity(n * k);
    for u in 0..k {
        for x in 0..n {
            basis.push((PI * (2 * x + 1) as f64 * u as f64 / (2 * n) as f64).cos());
        }
    }
    basis
}

/// 缩放到 4k x 4k 后做二维 DCT-II，取左上角 k x k 的低频系数与中位数比较
fn p_hash(gray: &GrayImage, hash_size: u32, basis: &[f64]) -> Fingerprint {
    let k = hash_size as usize;
    let n = k * 4;
    let small = resize(gray, n as u32, n as u32, FilterType::Triangle);
    let pixels = small.as_raw().iter().map(|&p| p as f64).collect::<Vec<_>>();

    // 先对每一行做变换：rows[y][u]
    let mut rows = vec![0.; n * k];
    for y in 0..n {
        let line = &pixels[y * n..(y + 1) * n];
        for u in 0..k {
            let b = &basis[u * n..(u + 1) * n];
            rows[y * k + u] = line.iter().zip(b).map(|(p, c)| p * c).sum();
        }
    }
    // 再对每一列做变换：coeffs[v][u]
    let mut coeffs = vec![0.; k * k];
    for v in 0..k {
        let b = &basis[v * n..(v + 1) * n];
        for u in 0..k {
            coeffs[v * k + u] = (0..n).map(|y| rows[y * k + u] * b[y]).sum();
        }
    }

    let median = median(&coeffs);
    Fingerprint::from_bits(coeffs.iter().map(|&c| c > median))
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 { (sorted[mid - 1] + sorted[mid]) / 2. } else { sorted[mid] }
}

/// 缩放到 (k+1) x k，逐行比较相邻像素
fn d_hash(gray: &GrayImage, hash_size: u32) -> Fingerprint {
    let small = resize(gray, hash_size + 1, hash_size, FilterType::Triangle);
    let data = small.as_raw();
    let width = (hash_size + 1) as usize;
    Fingerprint::from_bits(
        data.chunks_exact(width).flat_map(|chunk| chunk.windows(2).map(|w| w[0] < w[1])),
    )
}
