use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};

use crate::fingerprint::CardId;

/// 识别过程中可能出现的问题
///
/// 非致命的问题会记录在单张图片的报告里，批处理继续进行；
/// 致命的问题（参考库、输出目录）会终止整个任务。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectError {
    /// 输入图片不存在或无法解码
    InputImageUnreadable {
        #[serde(serialize_with = "lossy_path")]
        path: PathBuf,
        reason: String,
    },
    /// 图片中没有找到任何卡牌
    NoCardDetected,
    /// 多张参考卡牌与候选区域的距离并列最小
    AmbiguousMatch { index: usize, candidates: Vec<CardId> },
    /// 最小距离超过阈值
    NoConfidentMatch { index: usize, distance: Option<u32> },
    /// 单个候选区域处理失败，不影响同一图片的其他区域
    RegionFailed { index: usize, reason: String },
    ReferenceStoreMissing {
        #[serde(serialize_with = "lossy_path")]
        path: PathBuf,
    },
    ReferenceStoreCorrupt {
        #[serde(serialize_with = "lossy_path")]
        path: PathBuf,
        reason: String,
    },
    /// 多个参考库的指纹参数不一致
    ReferenceStoreMismatch { reason: String },
    OutputUnwritable {
        #[serde(serialize_with = "lossy_path")]
        path: PathBuf,
        reason: String,
    },
}

/// 文件名不一定是合法的 UTF-8，无法表示的字节替换为 U+FFFD
fn lossy_path<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}

impl DetectError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ReferenceStoreMissing { .. }
                | Self::ReferenceStoreCorrupt { .. }
                | Self::ReferenceStoreMismatch { .. }
                | Self::OutputUnwritable { .. }
        )
    }

    pub fn unreadable(path: &Path, reason: impl fmt::Display) -> Self {
        Self::InputImageUnreadable { path: path.to_path_buf(), reason: reason.to_string() }
    }

    pub fn corrupt(path: &Path, reason: impl fmt::Display) -> Self {
        Self::ReferenceStoreCorrupt { path: path.to_path_buf(), reason: reason.to_string() }
    }

    pub fn unwritable(path: &Path, reason: impl fmt::Display) -> Self {
        Self::OutputUnwritable { path: path.to_path_buf(), reason: reason.to_string() }
    }
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputImageUnreadable { path, reason } => {
                write!(f, "无法读取图片 {}: {}", path.display(), reason)
            }
            Self::NoCardDetected => write!(f, "未检测到卡牌"),
            Self::AmbiguousMatch { index, candidates } => {
                let names = candidates.iter().map(|c| c.to_string()).collect::<Vec<_>>();
                write!(f, "区域 {} 匹配结果不唯一: {}", index, names.join(", "))
            }
            Self::NoConfidentMatch { index, distance: Some(d) } => {
                write!(f, "区域 {} 没有可信的匹配，最小距离 {}", index, d)
            }
            Self::NoConfidentMatch { index, distance: None } => {
                write!(f, "区域 {} 没有可信的匹配，参考库为空", index)
            }
            Self::RegionFailed { index, reason } => {
                write!(f, "区域 {} 处理失败: {}", index, reason)
            }
            Self::ReferenceStoreMissing { path } => {
                write!(f, "参考库不存在: {}", path.display())
            }
            Self::ReferenceStoreCorrupt { path, reason } => {
                write!(f, "参考库已损坏 {}: {}", path.display(), reason)
            }
            Self::ReferenceStoreMismatch { reason } => {
                write!(f, "参考库参数不一致: {}", reason)
            }
            Self::OutputUnwritable { path, reason } => {
                write!(f, "无法写入输出 {}: {}", path.display(), reason)
            }
        }
    }
}

impl std::error::Error for DetectError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(DetectError::ReferenceStoreMissing { path: "a".into() }.is_fatal());
        assert!(DetectError::unwritable(Path::new("out"), "denied").is_fatal());
        assert!(!DetectError::NoCardDetected.is_fatal());
        assert!(!DetectError::RegionFailed { index: 0, reason: "x".into() }.is_fatal());
    }

    #[test]
    fn test_serialize_with_kind_tag() {
        let err = DetectError::NoConfidentMatch { index: 2, distance: Some(80) };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "no_confident_match");
        assert_eq!(value["distance"], 80);

        let value = serde_json::to_value(DetectError::NoCardDetected).unwrap();
        assert_eq!(value, serde_json::json!({ "kind": "no_card_detected" }));
    }

    #[cfg(unix)]
    #[test]
    fn test_serialize_non_utf8_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = Path::new(OsStr::from_bytes(b"scans/001_\xff.png"));
        let value = serde_json::to_value(DetectError::unreadable(path, "bad header")).unwrap();
        assert_eq!(value["kind"], "input_image_unreadable");
        assert_eq!(value["path"], "scans/001_\u{FFFD}.png");
    }

    #[test]
    fn test_downcast_from_anyhow() {
        let err: anyhow::Error = DetectError::corrupt(Path::new("x.cmfs"), "bad magic").into();
        let err = err.context("加载参考库失败");
        let inner = err.downcast_ref::<DetectError>().unwrap();
        assert!(inner.is_fatal());
    }
}
