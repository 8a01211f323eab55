// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频输入系统 (Frame Source)
///
/// - CameraSource:   本地摄像头 (DirectShow/AVFoundation/V4L2, ffmpeg 解码线程)
/// - DecodeFilter:   ffmpeg 帧过滤, YUV420P → RGB
/// - ImageDirSource: 图片目录回放 (离线调试)
///
/// 采集端只通过 `Ok(None)` 报告流结束, 不把异常抛进叠加层.
pub mod camera;
pub mod decode_filter;
pub mod image_dir;

use std::path::PathBuf;

pub use camera::{get_camera_devices, CameraConfig, CameraSource};
pub use decode_filter::DecodeFilter;
pub use image_dir::ImageDirSource;

use crate::detection::Frame;
use crate::Result;

/// 帧来源
pub trait FrameSource {
    /// 取下一帧; `Ok(None)` 表示流结束
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }
}

/// 输入源描述, 由配置决定, 启动时才真正打开
#[derive(Clone, Debug)]
pub enum SourceSpec {
    Camera(CameraConfig),
    Images { dir: PathBuf, looped: bool },
}

impl SourceSpec {
    pub fn open(&self) -> Result<Box<dyn FrameSource + Send>> {
        match self {
            SourceSpec::Camera(config) => Ok(Box::new(CameraSource::open(config)?)),
            SourceSpec::Images { dir, looped } => Ok(Box::new(ImageDirSource::open(dir, *looped)?)),
        }
    }
}
