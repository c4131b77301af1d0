use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::hamming::hamming;
use crate::phash::FingerprintParams;

/// 卡牌的身份：所属系列 + 卡名，显示为 `SET/name`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CardId {
    pub set: String,
    pub name: String,
}

impl CardId {
    pub fn new(set: impl Into<String>, name: impl Into<String>) -> Self {
        Self { set: set.into(), name: name.into() }
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.set, self.name)
    }
}

impl FromStr for CardId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (set, name) = s.split_once('/').ok_or_else(|| anyhow!("无效的卡牌标识: {}", s))?;
        if set.is_empty() || name.is_empty() {
            return Err(anyhow!("无效的卡牌标识: {}", s));
        }
        Ok(Self::new(set, name))
    }
}

/// 定长位串形式的感知指纹，按 u64 打包，高位在前
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    bits: u32,
    words: Vec<u64>,
}

impl Fingerprint {
    pub fn from_bits(bits: impl IntoIterator<Item = bool>) -> Self {
        let mut words = vec![];
        let mut len = 0u32;
        for bit in bits {
            if len % 64 == 0 {
                words.push(0);
            }
            if bit {
                if let Some(w) = words.last_mut() {
                    *w |= 1 << (63 - len % 64);
                }
            }
            len += 1;
        }
        Self { bits: len, words }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn bit(&self, i: u32) -> bool {
        i < self.bits && self.words[(i / 64) as usize] >> (63 - i % 64) & 1 == 1
    }

    pub fn distance(&self, other: &Fingerprint) -> u32 {
        debug_assert_eq!(self.bits, other.bits, "fingerprint length mismatch");
        hamming(&self.words, &other.words)
    }

    pub fn to_hex(&self) -> String {
        let digits = self.bits.div_ceil(4) as usize;
        let mut s = self.words.iter().map(|w| format!("{:016x}", w)).collect::<String>();
        s.truncate(digits);
        s
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// 参考库中的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFingerprint {
    pub card: CardId,
    pub fingerprint: Fingerprint,
    /// 参考图片文件内容的 blake3 摘要
    pub digest: [u8; 32],
}

/// 规范化卡牌图像 -> 指纹
pub trait FingerprintGenerator: Send + Sync {
    fn params(&self) -> &FingerprintParams;

    fn fingerprint(&self, canonical: &RgbImage) -> Fingerprint;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_id_display_and_parse() {
        let id = CardId::new("LEA", "Black Lotus");
        assert_eq!(id.to_string(), "LEA/Black Lotus");
        assert_eq!("LEA/Black Lotus".parse::<CardId>().unwrap(), id);
        assert!("no-slash".parse::<CardId>().is_err());
        assert!("/name".parse::<CardId>().is_err());
    }

    #[test]
    fn test_from_bits_packs_msb_first() {
        let fp = Fingerprint::from_bits([true, false, true, true]);
        assert_eq!(fp.bits(), 4);
        assert_eq!(fp.words(), &[0xb000_0000_0000_0000]);
        assert_eq!(fp.to_hex(), "b");
        assert!(fp.bit(0));
        assert!(!fp.bit(1));
        assert!(!fp.bit(4));
    }

    #[test]
    fn test_distance() {
        let a = Fingerprint::from_bits((0..256).map(|i| i % 2 == 0));
        let b = Fingerprint::from_bits((0..256).map(|i| i % 4 == 0));
        assert_eq!(a.words().len(), 4);
        assert_eq!(a.distance(&a), 0);
        assert_eq!(a.distance(&b), 64);
        assert_eq!(a.to_hex().len(), 64);
    }
}
