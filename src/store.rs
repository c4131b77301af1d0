//! 参考指纹库
//!
//! 文件格式：
//! - 4 字节魔数 `CMFS`
//! - u32 小端格式版本号
//! - 32 字节 BLAKE3 校验和（针对后面的数据）
//! - bincode 编码的 `{ params, entries }`

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::ParallelProgressIterator;
use log::{info, warn};
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DetectError;
use crate::fingerprint::{CardId, FingerprintGenerator, ReferenceFingerprint};
use crate::geometry::Quad;
use crate::phash::{FingerprintParams, PerceptualHasher};
use crate::rectify::{PerspectiveRectifier, Rectifier};
use crate::utils::{pb_style, scan_images, suffix_regex};

pub const STORE_MAGIC: &[u8; 4] = b"CMFS";
pub const STORE_VERSION: u32 = 1;
pub const STORE_EXTENSION: &str = "cmfs";

const HEADER_LEN: usize = 4 + 4 + 32;

#[derive(Serialize, Deserialize)]
struct Payload {
    params: FingerprintParams,
    entries: Vec<ReferenceFingerprint>,
}

/// 只读的参考指纹集合，检测时在所有线程间共享
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceStore {
    params: FingerprintParams,
    entries: Vec<ReferenceFingerprint>,
}

impl ReferenceStore {
    pub fn new(params: FingerprintParams) -> Self {
        Self { params, entries: vec![] }
    }

    pub fn params(&self) -> &FingerprintParams {
        &self.params
    }

    pub fn entries(&self) -> &[ReferenceFingerprint] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 库中出现的所有系列，按名称排序
    pub fn sets(&self) -> Vec<&str> {
        let mut sets = self.entries.iter().map(|e| e.card.set.as_str()).collect::<Vec<_>>();
        sets.sort_unstable();
        sets.dedup();
        sets
    }

    pub fn get(&self, card: &CardId) -> Option<&ReferenceFingerprint> {
        self.entries.binary_search_by(|e| e.card.cmp(card)).ok().map(|i| &self.entries[i])
    }

    /// 追加新记录，已存在的卡牌保持不变，返回实际添加的数量
    pub fn append(&mut self, entries: Vec<ReferenceFingerprint>) -> Result<usize> {
        let mut map = self
            .entries
            .drain(..)
            .map(|e| (e.card.clone(), e))
            .collect::<BTreeMap<_, _>>();
        let mut added = 0;
        for entry in entries {
            if entry.fingerprint.bits() != self.params.bits() {
                self.entries = map.into_values().collect();
                return Err(DetectError::ReferenceStoreMismatch {
                    reason: format!(
                        "{} 的指纹长度为 {}，参考库为 {}",
                        entry.card,
                        entry.fingerprint.bits(),
                        self.params.bits()
                    ),
                }
                .into());
            }
            if map.contains_key(&entry.card) {
                warn!("卡牌已存在，跳过: {}", entry.card);
                continue;
            }
            map.insert(entry.card.clone(), entry);
            added += 1;
        }
        self.entries = map.into_values().collect();
        Ok(added)
    }

    /// 合并多个参考库，指纹参数必须一致
    pub fn merge(stores: impl IntoIterator<Item = ReferenceStore>) -> Result<Self> {
        let mut iter = stores.into_iter();
        let Some(mut merged) = iter.next() else {
            return Ok(Self::new(FingerprintParams::default()));
        };
        for store in iter {
            if store.params != merged.params {
                return Err(DetectError::ReferenceStoreMismatch {
                    reason: format!("{:?} 与 {:?} 不同", store.params, merged.params),
                }
                .into());
            }
            merged.append(store.entries)?;
        }
        Ok(merged)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(&Payload {
            params: self.params,
            entries: self.entries.clone(),
        })?;
        let mut data = Vec::with_capacity(HEADER_LEN + payload.len());
        data.extend_from_slice(STORE_MAGIC);
        data.extend_from_slice(&STORE_VERSION.to_le_bytes());
        data.extend_from_slice(blake3::hash(&payload).as_bytes());
        data.extend_from_slice(&payload);
        Ok(data)
    }

    /// 解析参考库内容，失败时返回原因
    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, String> {
        if data.len() < HEADER_LEN {
            return Err(format!("文件过短: {} 字节", data.len()));
        }
        let (header, payload) = data.split_at(HEADER_LEN);
        if &header[..4] != STORE_MAGIC {
            return Err("魔数不匹配".to_string());
        }
        let mut version = [0; 4];
        version.copy_from_slice(&header[4..8]);
        let version = u32::from_le_bytes(version);
        if version != STORE_VERSION {
            return Err(format!("不支持的版本: {}", version));
        }
        if blake3::hash(payload).as_bytes() != &header[8..] {
            return Err("校验和不匹配".to_string());
        }
        let Payload { params, entries } =
            bincode::deserialize(payload).map_err(|e| format!("数据解析失败: {}", e))?;
        if let Some(e) = entries.iter().find(|e| e.fingerprint.bits() != params.bits()) {
            return Err(format!("{} 的指纹长度为 {}", e.card, e.fingerprint.bits()));
        }
        if entries.windows(2).any(|w| w[0].card >= w[1].card) {
            return Err("记录未排序或有重复".to_string());
        }
        Ok(Self { params, entries })
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(DetectError::ReferenceStoreMissing { path: path.to_path_buf() }.into());
        }
        let data = fs::read(path).map_err(|e| DetectError::corrupt(path, e))?;
        let store = Self::from_bytes(&data).map_err(|e| DetectError::corrupt(path, e))?;
        info!("加载参考库 {}，共 {} 张卡牌", path.display(), store.len());
        Ok(store)
    }

    /// 写入临时文件后再重命名，避免中断时留下损坏的参考库
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("无法创建目录: {}", dir.display()))?;
        }
        let tmp = path.with_extension(format!("{}.tmp", STORE_EXTENSION));
        fs::write(&tmp, self.to_bytes()?)
            .with_context(|| format!("无法写入参考库: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("无法写入参考库: {}", path.display()))?;
        info!("参考库已保存到 {}，共 {} 张卡牌", path.display(), self.len());
        Ok(())
    }
}

/// 从参考图片目录构建某个系列的参考库
pub struct StoreBuilder {
    set: String,
    params: FingerprintParams,
    suffix: Regex,
    replace: Option<(Regex, String)>,
}

impl StoreBuilder {
    pub fn new(set: impl Into<String>, params: FingerprintParams) -> Self {
        Self {
            set: set.into(),
            params,
            suffix: Regex::new("(?i)^(jpg|jpeg|png|webp)$").expect("failed to build regex"),
            replace: None,
        }
    }

    pub fn suffix(mut self, suffix: &str) -> Result<Self> {
        self.suffix = suffix_regex(suffix)?;
        Ok(self)
    }

    /// 用正则改写文件名（不含扩展名）得到卡名
    pub fn replace(mut self, regex: &str, replacement: &str) -> Result<Self> {
        let re = Regex::new(regex).with_context(|| format!("无效的正则表达式: {}", regex))?;
        self.replace = Some((re, replacement.to_owned()));
        Ok(self)
    }

    pub fn card_id(&self, path: &Path) -> Option<CardId> {
        let stem = path.file_stem()?.to_string_lossy();
        let name = match &self.replace {
            Some((re, rep)) => re.replace(&stem, rep.as_str()).into_owned(),
            None => stem.into_owned(),
        };
        if name.is_empty() { None } else { Some(CardId::new(self.set.clone(), name)) }
    }

    /// 计算目录下所有参考图片的指纹，结果按卡牌排序
    pub fn build_entries(&self, dir: &Path) -> Result<Vec<ReferenceFingerprint>> {
        info!("开始扫描目录: {}", dir.display());
        let paths = scan_images(dir, &self.suffix)?;
        info!("扫描完成，共 {} 张图片", paths.len());

        let rectifier =
            PerspectiveRectifier::new(self.params.canonical_width, self.params.canonical_height);
        let hasher = PerceptualHasher::new(self.params);

        let results = paths
            .par_iter()
            .progress_with_style(pb_style())
            .map(|path| self.fingerprint_file(path, &rectifier, &hasher))
            .collect::<Vec<_>>();

        // 按路径顺序处理，同名卡牌保留路径靠前的那一张
        let mut entries: BTreeMap<CardId, (PathBuf, ReferenceFingerprint)> = BTreeMap::new();
        let mut digests: BTreeMap<[u8; 32], PathBuf> = BTreeMap::new();
        for (path, result) in paths.iter().zip(results) {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("跳过参考图片 {}: {:#}", path.display(), e);
                    continue;
                }
            };
            if let Some(first) = digests.get(&entry.digest) {
                warn!("参考图片内容相同: {} 与 {}", first.display(), path.display());
            } else {
                digests.insert(entry.digest, path.clone());
            }
            if let Some((first, _)) = entries.get(&entry.card) {
                let (first, path) = (first.display(), path.display());
                warn!("卡牌 {} 重复，保留 {}，跳过 {}", entry.card, first, path);
                continue;
            }
            entries.insert(entry.card.clone(), (path.clone(), entry));
        }
        Ok(entries.into_values().map(|(_, e)| e).collect())
    }

    fn fingerprint_file(
        &self,
        path: &Path,
        rectifier: &dyn Rectifier,
        hasher: &dyn FingerprintGenerator,
    ) -> Result<ReferenceFingerprint> {
        let card =
            self.card_id(path).with_context(|| format!("无法确定卡名: {}", path.display()))?;
        let data = fs::read(path)?;
        let digest = *blake3::hash(&data).as_bytes();
        let image = image::load_from_memory(&data)?.to_rgb8();
        let (width, height) = image.dimensions();
        let canonical = rectifier.rectify(&image, &Quad::full_frame(width, height))?;
        let fingerprint = hasher.fingerprint(&canonical);
        Ok(ReferenceFingerprint { card, fingerprint, digest })
    }

    pub fn build(&self, dir: &Path) -> Result<ReferenceStore> {
        let mut store = ReferenceStore::new(self.params);
        store.append(self.build_entries(dir)?)?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use crate::fingerprint::Fingerprint;

    use super::*;

    fn entry(set: &str, name: &str, seed: u64) -> ReferenceFingerprint {
        ReferenceFingerprint {
            card: CardId::new(set, name),
            fingerprint: Fingerprint::from_bits((0..256).map(|i| (i * seed + seed) % 3 == 0)),
            digest: [seed as u8; 32],
        }
    }

    fn store() -> ReferenceStore {
        let mut store = ReferenceStore::new(FingerprintParams::default());
        store.append(vec![entry("LEA", "b", 1), entry("LEA", "a", 2)]).unwrap();
        store
    }

    #[test]
    fn test_append_keeps_existing() {
        let mut store = store();
        let mut replaced = entry("LEA", "a", 5);
        replaced.digest = [9; 32];
        let added = store.append(vec![replaced, entry("2ED", "c", 3)]).unwrap();
        assert_eq!(added, 1);
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(&CardId::new("LEA", "a")).unwrap().digest, [2; 32]);
        assert_eq!(store.sets(), ["2ED", "LEA"]);
    }

    #[test]
    fn test_append_wrong_length() {
        let mut store = store();
        let short = ReferenceFingerprint {
            card: CardId::new("LEA", "x"),
            fingerprint: Fingerprint::from_bits([true; 64]),
            digest: [0; 32],
        };
        assert!(store.append(vec![short]).is_err());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_bytes_roundtrip_is_stable() {
        let store = store();
        let data = store.to_bytes().unwrap();
        assert_eq!(&data[..4], STORE_MAGIC);
        let loaded = ReferenceStore::from_bytes(&data).unwrap();
        assert_eq!(loaded, store);
        assert_eq!(loaded.to_bytes().unwrap(), data);
    }

    #[test]
    fn test_from_bytes_rejects_damage() {
        let data = store().to_bytes().unwrap();
        assert!(ReferenceStore::from_bytes(&data[..10]).is_err());

        let mut bad_magic = data.clone();
        bad_magic[0] = b'X';
        assert!(ReferenceStore::from_bytes(&bad_magic).unwrap_err().contains("魔数"));

        let mut flipped = data.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 1;
        assert!(ReferenceStore::from_bytes(&flipped).unwrap_err().contains("校验和"));

        let mut version = data;
        version[4] = 2;
        assert!(ReferenceStore::from_bytes(&version).unwrap_err().contains("版本"));
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.cmfs");
        let err = ReferenceStore::load(&missing).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DetectError>(),
            Some(DetectError::ReferenceStoreMissing { .. })
        ));

        let corrupt = dir.path().join("bad.cmfs");
        fs::write(&corrupt, b"garbage").unwrap();
        let err = ReferenceStore::load(&corrupt).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DetectError>(),
            Some(DetectError::ReferenceStoreCorrupt { .. })
        ));
    }

    #[test]
    fn test_merge_mismatch() {
        let a = store();
        let mut b = ReferenceStore::new(FingerprintParams { hash_size: 8, ..Default::default() });
        b.append(vec![]).unwrap();
        let err = ReferenceStore::merge([a.clone(), b]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DetectError>(),
            Some(DetectError::ReferenceStoreMismatch { .. })
        ));

        let mut c = ReferenceStore::new(FingerprintParams::default());
        c.append(vec![entry("2ED", "a", 7)]).unwrap();
        let merged = ReferenceStore::merge([a, c]).unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.entries()[0].card, CardId::new("2ED", "a"));
    }

    #[test]
    fn test_card_id_with_replace() {
        let builder = StoreBuilder::new("LEA", FingerprintParams::default())
            .replace(r"^\d+_(?<name>.+)$", "$name")
            .unwrap();
        assert_eq!(
            builder.card_id(Path::new("refs/001_Black Lotus.jpg")),
            Some(CardId::new("LEA", "Black Lotus"))
        );
        assert_eq!(builder.card_id(Path::new("Shivan Dragon.png")).unwrap().name, "Shivan Dragon");
    }
}
