use smallvec::SmallVec;

use crate::config::MatchOptions;
use crate::fingerprint::{Fingerprint, ReferenceFingerprint};
use crate::hamming::{KNN_MAX, knn_select};
use crate::store::ReferenceStore;

/// 一次查询的结果，索引均指向参考库的 entries
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// 距离并列最小的所有记录
    pub nearest: SmallVec<[usize; 4]>,
    /// 最小距离，参考库为空时为 None
    pub distance: Option<u32>,
    /// 其余距离的均值与最小距离之差除以其余距离的标准差
    pub separation: Option<f32>,
    pub confident: bool,
    /// 距离最近的若干条记录 (索引, 距离)，按距离升序
    pub alternatives: Vec<(usize, u32)>,
}

impl Match {
    fn none() -> Self {
        Self {
            nearest: SmallVec::new(),
            distance: None,
            separation: None,
            confident: false,
            alternatives: vec![],
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.nearest.len() > 1
    }

    /// 距离更小的结果更好，距离相同时保留 self
    pub fn better_than(&self, other: &Match) -> bool {
        match (self.distance, other.distance) {
            (Some(a), Some(b)) => a <= b,
            (Some(_), None) => true,
            (None, _) => other.distance.is_none(),
        }
    }
}

/// 线性扫描整个参考库
pub struct Matcher<'a> {
    store: &'a ReferenceStore,
    opts: &'a MatchOptions,
}

impl<'a> Matcher<'a> {
    pub fn new(store: &'a ReferenceStore, opts: &'a MatchOptions) -> Self {
        Self { store, opts }
    }

    pub fn entry(&self, index: usize) -> &'a ReferenceFingerprint {
        &self.store.entries()[index]
    }

    pub fn best_match(&self, fingerprint: &Fingerprint) -> Match {
        let entries = self.store.entries();
        if entries.is_empty() {
            return Match::none();
        }

        let distances =
            entries.iter().map(|e| fingerprint.distance(&e.fingerprint)).collect::<Vec<_>>();
        let mut min = u32::MAX;
        let mut nearest = SmallVec::new();
        for (i, &d) in distances.iter().enumerate() {
            if d < min {
                min = d;
                nearest.clear();
                nearest.push(i);
            } else if d == min {
                nearest.push(i);
            }
        }

        let separation = separation(&distances, min);
        let mut confident = min <= self.opts.max_distance;
        if let Some(threshold) = self.opts.min_separation {
            confident &= separation.is_some_and(|s| s >= threshold);
        }

        let k = (self.opts.alternatives as usize).min(KNN_MAX);
        let alternatives = knn_select(distances.iter().copied(), k);

        Match { nearest, distance: Some(min), separation, confident, alternatives }
    }
}

/// 两个指纹的汉明距离
pub fn compare(a: &Fingerprint, b: &Fingerprint) -> u32 {
    a.distance(b)
}

fn separation(distances: &[u32], min: u32) -> Option<f32> {
    let others = distances.iter().filter(|&&d| d > min).map(|&d| d as f64).collect::<Vec<_>>();
    if others.is_empty() {
        return None;
    }
    let mean = others.iter().sum::<f64>() / others.len() as f64;
    let var = others.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / others.len() as f64;
    let std = var.sqrt();
    if std < 1e-9 {
        return None;
    }
    Some(((mean - min as f64) / std) as f32)
}
