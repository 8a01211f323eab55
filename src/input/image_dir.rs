// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 图片目录回放: 按文件名顺序逐张读取, 可循环. 用于没有摄像头时调试叠加层和推流.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::FrameSource;
use crate::detection::Frame;
use crate::{Error, Result};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

pub struct ImageDirSource {
    files: Vec<PathBuf>,
    cursor: usize,
    looped: bool,
}

impl ImageDirSource {
    pub fn open(dir: &Path, looped: bool) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(Error::Capture(format!("目录中没有图片: {}", dir.display())));
        }
        info!("🖼️ 图片回放: {} 张 ({})", files.len(), dir.display());

        Ok(Self {
            files,
            cursor: 0,
            looped,
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.files.len()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut failures = 0;
        loop {
            if self.cursor >= self.files.len() {
                if !self.looped {
                    return Ok(None);
                }
                self.cursor = 0;
            }

            let path = &self.files[self.cursor];
            self.cursor += 1;
            match image::open(path) {
                Ok(img) => return Ok(Some(img.to_rgb8())),
                // 坏图跳过; 一轮下来全是坏图就报错
                Err(e) => {
                    failures += 1;
                    if failures >= self.files.len() {
                        return Err(e.into());
                    }
                    warn!("⚠️ 跳过无法解码的图片 {}: {}", path.display(), e);
                }
            }
        }
    }
}
