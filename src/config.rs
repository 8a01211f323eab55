// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 运行配置
//!
//! 加载顺序: 默认值 → TOML 文件 (`--config`) → 环境变量 `HELMET_*` / 命令行参数.
//! 模型路径、摄像头编号等都从这里注入, 不写死在代码里.

use std::path::{Path, PathBuf};

use clap::Args as ClapArgs;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::detection::{default_font, OverlayPipeline, OverlayStyle, Palette, DEFAULT_CONF_THRESHOLD, POSITIVE_LABEL};
use crate::input::{CameraConfig, SourceSpec};
use crate::models::YOLOv8Config;
use crate::stream::PacingPolicy;
use crate::{Error, Result};

/// 模型参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub input_size: u32,
    /// 模型候选阈值 (低于显示阈值, 先粗筛)
    pub conf: f32,
    pub iou: f32,
    pub cuda: bool,
    pub profile: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        let base = YOLOv8Config::default();
        Self {
            path: base.model,
            input_size: base.input_size,
            conf: base.conf,
            iou: base.iou,
            cuda: base.cuda,
            profile: base.profile,
        }
    }
}

impl ModelSettings {
    pub fn to_yolo_config(&self) -> YOLOv8Config {
        YOLOv8Config {
            model: self.path.clone(),
            input_size: self.input_size,
            conf: self.conf,
            iou: self.iou,
            cuda: self.cuda,
            profile: self.profile,
        }
    }
}

/// 叠加层参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// 显示 / 推流阈值
    pub threshold: f32,
    pub positive_label: String,
    /// 标签字体 (ttf/otf/ttc); 不配置则用内置字体
    pub font: Option<PathBuf>,
    pub text_scale: f32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CONF_THRESHOLD,
            positive_label: POSITIVE_LABEL.to_string(),
            font: None,
            text_scale: 20.0,
        }
    }
}

/// 输入源: 配置了图片目录就回放图片, 否则打开摄像头
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    pub image_dir: Option<PathBuf>,
    pub looped: bool,
}

/// WebSocket 服务参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub jpeg_quality: u8,
    pub pacing: PacingPolicy,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            jpeg_quality: 80,
            pacing: PacingPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: ModelSettings,
    pub camera: CameraConfig,
    pub input: InputSettings,
    pub overlay: OverlaySettings,
    pub server: ServerSettings,
}

impl Settings {
    /// 读取 TOML 配置文件; 没有给路径时使用默认值
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                let settings = Self::from_toml(&text)?;
                info!("✅ 配置已从 {} 加载", path.display());
                Ok(settings)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::Config(format!("{} 必须在 [0, 1] 内, 当前为 {}", name, v)))
            }
        };
        unit("overlay.threshold", self.overlay.threshold)?;
        unit("model.conf", self.model.conf)?;
        unit("model.iou", self.model.iou)?;

        if self.model.input_size == 0 {
            return Err(Error::Config("model.input_size 不能为 0".to_string()));
        }
        if !(1..=100).contains(&self.server.jpeg_quality) {
            return Err(Error::Config(format!(
                "server.jpeg_quality 必须在 1..=100 内, 当前为 {}",
                self.server.jpeg_quality
            )));
        }
        if self.overlay.positive_label.is_empty() {
            return Err(Error::Config("overlay.positive_label 不能为空".to_string()));
        }
        Ok(())
    }

    pub fn source_spec(&self) -> SourceSpec {
        match &self.input.image_dir {
            Some(dir) => SourceSpec::Images {
                dir: dir.clone(),
                looped: self.input.looped,
            },
            None => SourceSpec::Camera(self.camera.clone()),
        }
    }

    /// 按配置构造叠加层 (字体在这里加载)
    pub fn overlay_pipeline(&self) -> Result<OverlayPipeline> {
        let font = match &self.overlay.font {
            Some(path) => Some(OverlayStyle::load_font(path)?),
            None => default_font(),
        };
        let style = OverlayStyle {
            palette: Palette::with_positive_label(self.overlay.positive_label.clone()),
            font,
            text_scale: self.overlay.text_scale,
            ..Default::default()
        };
        Ok(OverlayPipeline::new(self.overlay.threshold, style))
    }
}

/// 各个可执行文件共用的命令行参数
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct CommonArgs {
    /// TOML 配置文件
    #[arg(short, long, env = "HELMET_CONFIG")]
    pub config: Option<PathBuf>,

    /// ONNX 模型路径
    #[arg(short, long, env = "HELMET_MODEL")]
    pub model: Option<PathBuf>,

    /// 摄像头编号
    #[arg(long, env = "HELMET_CAMERA")]
    pub camera: Option<usize>,

    /// 摄像头设备名 (Windows dshow)
    #[arg(long, env = "HELMET_CAMERA_NAME")]
    pub camera_name: Option<String>,

    /// 用图片目录代替摄像头
    #[arg(long, env = "HELMET_IMAGES")]
    pub images: Option<PathBuf>,

    /// 显示 / 推流置信度阈值
    #[arg(short, long, env = "HELMET_THRESHOLD")]
    pub threshold: Option<f32>,

    /// 标签字体文件
    #[arg(long, env = "HELMET_FONT")]
    pub font: Option<PathBuf>,

    /// 使用 CUDA 推理
    #[arg(long)]
    pub cuda: bool,
}

impl CommonArgs {
    /// 命令行覆盖配置文件
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(model) = &self.model {
            settings.model.path = model.clone();
        }
        if let Some(camera) = self.camera {
            settings.camera.device_index = camera;
        }
        if let Some(name) = &self.camera_name {
            settings.camera.device_name = Some(name.clone());
        }
        if let Some(dir) = &self.images {
            settings.input.image_dir = Some(dir.clone());
        }
        if let Some(threshold) = self.threshold {
            settings.overlay.threshold = threshold;
        }
        if let Some(font) = &self.font {
            settings.overlay.font = Some(font.clone());
        }
        if self.cuda {
            settings.model.cuda = true;
        }
    }

    /// 默认值 → 配置文件 → 命令行, 最后校验
    pub fn resolve(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        self.apply(&mut settings);
        settings.validate()?;
        Ok(settings)
    }
}
