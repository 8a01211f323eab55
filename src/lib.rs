#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 运行配置 (TOML / 环境变量 / 命令行)
pub mod dataset; // 数据集采集与审计
pub mod detection; // 检测叠加系统
pub mod error; // 统一错误类型
pub mod input; // 视频输入系统
pub mod models; // 模型接口与具体实现
pub mod stream; // WebSocket 推流

pub use crate::config::{CommonArgs, Settings};
pub use crate::detection::{
    BBox, Detection, DetectionRecord, Frame, OverlayPipeline, OverlayStyle, Palette,
    DEFAULT_CONF_THRESHOLD,
};
pub use crate::error::{Error, Result};
pub use crate::input::{FrameSource, SourceSpec};
pub use crate::models::{Model, SharedModel, YOLOv8, YOLOv8Config};

use tracing_subscriber::EnvFilter;

/// 初始化日志: `RUST_LOG` 优先, 默认 `info`. 重复调用无副作用.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
