// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 数据集类别检查: 列出 YOLO 标签文件中出现的类别索引
///
/// ```text
/// helmet_audit --root Dataset            # Dataset/{train,valid,test}/labels
/// helmet_audit Dataset/train/labels ...  # 指定目录
/// ```
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use helmet_guard::dataset::{audit_label_dirs, split_label_dirs};
use helmet_guard::init_tracing;

#[derive(Parser, Debug)]
#[command(author, version, about = "数据集类别检查", long_about = None)]
struct Args {
    /// 数据集根目录 (查找 train/valid/test 下的 labels)
    #[arg(short, long, env = "HELMET_DATASET")]
    root: Option<PathBuf>,

    /// 直接指定标签目录
    dirs: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut dirs = args.dirs;
    if let Some(root) = &args.root {
        dirs.extend(split_label_dirs(root));
    }
    if dirs.is_empty() {
        anyhow::bail!("没有可检查的标签目录, 请指定 --root 或目录列表");
    }

    let audit = audit_label_dirs(&dirs).context("读取标签失败")?;
    println!("📂 标签目录 {} 个, 标签文件 {} 个", dirs.len(), audit.files);
    println!("Classes found in dataset: {:?}", audit.classes());
    for (class_id, count) in &audit.counts {
        println!("  class {:>3}: {} 个标注", class_id, count);
    }
    Ok(())
}
