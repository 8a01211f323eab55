// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统数据结构定义
/// Data structures for the helmet detection overlay
use image::RgbImage;
use serde::{Deserialize, Serialize};

// ========== 公共常量 ==========

/// 默认置信度阈值: 只显示 >= 75% 的检测
pub const DEFAULT_CONF_THRESHOLD: f32 = 0.75;

/// 合规标签 (安全色)
pub const POSITIVE_LABEL: &str = "helmet";

// ========== 数据结构 ==========

/// 视频帧: H x W x 3, 每通道 8 bit
///
/// 每次循环由采集端创建, 渲染时原地修改, 不做持久化.
pub type Frame = RgbImage;

/// 检测框 (像素坐标, 左上 / 右下)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn to_array(&self) -> [i32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// 单个检测结果
///
/// 模型产出后不可变: 字段私有, 叠加层只读取它来决定是否显示以及用什么颜色.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    bbox: BBox,
    confidence: f32,
    class_id: usize,
    label: String,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32, class_id: usize, label: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
            label: label.into(),
        }
    }

    pub fn bbox(&self) -> &BBox {
        &self.bbox
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn class_id(&self) -> usize {
        self.class_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// 推流用的检测记录 (字段顺序: bbox, conf, label)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub bbox: [i32; 4],
    pub conf: f32,
    pub label: String,
}

impl From<&Detection> for DetectionRecord {
    fn from(det: &Detection) -> Self {
        Self {
            bbox: det.bbox().to_array(),
            conf: det.confidence(),
            label: det.label().to_string(),
        }
    }
}

/// WebSocket 消息体 `{"frame": <base64 JPEG>, "detections": [...]}`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FramePayload {
    pub frame: String,
    pub detections: Vec<DetectionRecord>,
}
