// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 数据集工具
//!
//! - 标签目录审计: 统计 YOLO 标签文件里出现过的类别索引
//! - 采集文件命名: `<out>/<label>/<label>_<unix_secs>.jpg`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::detection::Frame;
use crate::{Error, Result};

/// 采集助手接受的标签
pub const CAPTURE_LABELS: [&str; 2] = ["helmet", "no_helmet"];

/// 数据集根目录下默认审计的划分
pub const DEFAULT_SPLITS: [&str; 3] = ["train", "valid", "test"];

/// 类别索引 → 标注行数
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassAudit {
    pub counts: BTreeMap<usize, usize>,
    pub files: usize,
}

impl ClassAudit {
    pub fn classes(&self) -> Vec<usize> {
        self.counts.keys().copied().collect()
    }

    fn merge(&mut self, other: ClassAudit) {
        self.files += other.files;
        for (class_id, n) in other.counts {
            *self.counts.entry(class_id).or_default() += n;
        }
    }
}

/// `<root>/<split>/labels`, 只保留存在的目录
pub fn split_label_dirs(root: &Path) -> Vec<PathBuf> {
    DEFAULT_SPLITS
        .iter()
        .map(|split| root.join(split).join("labels"))
        .filter(|dir| dir.is_dir())
        .collect()
}

/// 解析单个标签文件: 每个非空行的第一个字段是类别索引
pub fn audit_label_text(path: &Path, text: &str) -> Result<ClassAudit> {
    let mut audit = ClassAudit {
        files: 1,
        ..Default::default()
    };
    for (i, line) in text.lines().enumerate() {
        let Some(first) = line.split_whitespace().next() else {
            continue;
        };
        let class_id = first.parse::<usize>().map_err(|e| Error::Label {
            path: path.display().to_string(),
            line: i + 1,
            reason: format!("类别索引 `{}` 无效: {}", first, e),
        })?;
        *audit.counts.entry(class_id).or_default() += 1;
    }
    Ok(audit)
}

/// 审计多个标签目录 (只看 `.txt`, 不递归)
pub fn audit_label_dirs(dirs: &[PathBuf]) -> Result<ClassAudit> {
    let mut total = ClassAudit::default();
    for dir in dirs {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "txt"))
            .collect();
        files.sort();
        debug!("{}: {} 个标签文件", dir.display(), files.len());

        for path in files {
            let text = std::fs::read_to_string(&path)?;
            total.merge(audit_label_text(&path, &text)?);
        }
    }
    Ok(total)
}

/// 校验并规范化采集标签 (去空白, 转小写)
pub fn parse_capture_label(raw: &str) -> Result<String> {
    let label = raw.trim().to_lowercase();
    if CAPTURE_LABELS.contains(&label.as_str()) {
        Ok(label)
    } else {
        Err(Error::Config(format!(
            "未知标签 `{}`, 可选: {}",
            raw,
            CAPTURE_LABELS.join(" / ")
        )))
    }
}

pub fn capture_path(out: &Path, label: &str, unix_secs: i64) -> PathBuf {
    out.join(label).join(format!("{}_{}.jpg", label, unix_secs))
}

/// 同一秒内多次保存时追加 `_1`, `_2`... 避免覆盖
fn unique_capture_path(out: &Path, label: &str, unix_secs: i64) -> PathBuf {
    let base = capture_path(out, label, unix_secs);
    if !base.exists() {
        return base;
    }
    (1..)
        .map(|n| out.join(label).join(format!("{}_{}_{}.jpg", label, unix_secs, n)))
        .find(|path| !path.exists())
        .unwrap_or(base)
}

/// 保存一张采集帧, 返回写入路径
pub fn save_capture(out: &Path, label: &str, frame: &Frame) -> Result<PathBuf> {
    std::fs::create_dir_all(out.join(label))?;
    let path = unique_capture_path(out, label, chrono::Utc::now().timestamp());
    frame.save(&path)?;
    info!("💾 已保存 {}", path.display());
    Ok(path)
}
