// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 检测模型 (ONNX Runtime)
// 包含: 模型加载、预处理、推理、后处理

use std::path::PathBuf;
use std::time::Instant;

use fast_image_resize as fr;
use ndarray::{s, Array, ArrayViewD, Axis, IxDyn};
use ort::{CUDAExecutionProvider, GraphOptimizationLevel, Session, ValueType};
use tracing::{debug, info, warn};

use super::{label_for, non_max_suppression, parse_names, Candidate, Model, FALLBACK_NAMES};
use crate::detection::{BBox, Detection, Frame};
use crate::{Error, Result};

/// 预处理填充色 (与训练时 letterbox 一致)
const PAD_VALUE: f32 = 144.0 / 255.0;

/// YOLOv8 加载参数
#[derive(Clone, Debug)]
pub struct YOLOv8Config {
    pub model: PathBuf,
    /// 模型输入为动态尺寸时使用
    pub input_size: u32,
    /// 模型级候选阈值 (叠加层还有自己的显示阈值)
    pub conf: f32,
    pub iou: f32,
    pub cuda: bool,
    pub profile: bool,
}

impl Default for YOLOv8Config {
    fn default() -> Self {
        Self {
            model: PathBuf::from("runs/detect/train/weights/best.onnx"),
            input_size: 640,
            conf: 0.25,
            iou: 0.45,
            cuda: false,
            profile: false,
        }
    }
}

/// YOLOv8 完整模型结构
pub struct YOLOv8 {
    session: Session,
    input_name: String,
    output_name: String,
    width: u32,
    height: u32,
    conf: f32,
    iou: f32,
    names: Vec<String>,
    resizer: fr::Resizer,
    profile: bool,
    model_path: PathBuf,
}

impl YOLOv8 {
    /// 从配置创建 YOLOv8 模型
    pub fn new(config: YOLOv8Config) -> Result<Self> {
        if !config.model.exists() {
            return Err(Error::Model(format!(
                "模型文件不存在: {}",
                config.model.display()
            )));
        }

        let mut builder =
            Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
        if config.cuda {
            builder = builder.with_execution_providers([CUDAExecutionProvider::default().build()])?;
        }
        let session = builder.commit_from_file(&config.model)?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| Error::Model("模型没有输入".to_string()))?;
        let output = session
            .outputs
            .first()
            .ok_or_else(|| Error::Model("模型没有输出".to_string()))?;
        let input_name = input.name.clone();
        let output_name = output.name.clone();

        // NCHW, 动态维度为 -1
        let (height, width) = match &input.input_type {
            ValueType::Tensor { dimensions, .. } if dimensions.len() == 4 => {
                let pick = |d: i64| if d > 0 { d as u32 } else { config.input_size };
                (pick(dimensions[2]), pick(dimensions[3]))
            }
            _ => (config.input_size, config.input_size),
        };

        let names = match session.metadata()?.custom("names")? {
            Some(raw) => parse_names(&raw),
            None => Vec::new(),
        };
        let names = if names.is_empty() {
            warn!("⚠️ 模型元数据中没有类别表, 使用默认: {:?}", FALLBACK_NAMES);
            FALLBACK_NAMES.iter().map(|s| s.to_string()).collect()
        } else {
            names
        };

        Ok(Self {
            session,
            input_name,
            output_name,
            width,
            height,
            conf: config.conf,
            iou: config.iou,
            names,
            resizer: fr::Resizer::new(),
            profile: config.profile,
            model_path: config.model,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn conf(&self) -> f32 {
        self.conf
    }

    pub fn iou(&self) -> f32 {
        self.iou
    }

    /// 保持长宽比缩放到输入尺寸, 放在左上角, 其余填充
    pub fn preprocess(&mut self, frame: &Frame) -> Result<(Array<f32, IxDyn>, f32)> {
        let (w0, h0) = frame.dimensions();
        if w0 == 0 || h0 == 0 {
            return Err(Error::Model(format!("非法帧尺寸 {}x{}", w0, h0)));
        }
        let (ratio, w_new, h_new) = scale_wh(
            w0 as f32,
            h0 as f32,
            self.width as f32,
            self.height as f32,
        );
        let (w_new, h_new) = ((w_new as u32).max(1), (h_new as u32).max(1));

        let src = fr::images::Image::from_vec_u8(w0, h0, frame.as_raw().clone(), fr::PixelType::U8x3)
            .map_err(|e| Error::Model(format!("预处理失败: {}", e)))?;
        let mut dst = fr::images::Image::new(w_new, h_new, fr::PixelType::U8x3);
        self.resizer
            .resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
            )
            .map_err(|e| Error::Model(format!("预处理失败: {}", e)))?;

        let mut xs = Array::from_elem(
            (1, 3, self.height as usize, self.width as usize),
            PAD_VALUE,
        );
        for (i, rgb) in dst.buffer().chunks_exact(3).enumerate() {
            let x = i % w_new as usize;
            let y = i / w_new as usize;
            xs[[0, 0, y, x]] = rgb[0] as f32 / 255.0;
            xs[[0, 1, y, x]] = rgb[1] as f32 / 255.0;
            xs[[0, 2, y, x]] = rgb[2] as f32 / 255.0;
        }

        Ok((xs.into_dyn(), ratio))
    }

    /// 原始输出 `[1, 4 + nc, anchors]` → 检测结果
    pub fn postprocess(&self, preds: ArrayViewD<'_, f32>, ratio: f32, frame_wh: (u32, u32)) -> Vec<Detection> {
        decode_predictions(preds, ratio, frame_wh, self.conf, self.iou)
            .into_iter()
            .map(|c| {
                let bbox = BBox::new(c.x1 as i32, c.y1 as i32, c.x2 as i32, c.y2 as i32);
                Detection::new(bbox, c.confidence, c.class_id, label_for(&self.names, c.class_id))
            })
            .filter(|det| det.bbox().width() > 0 && det.bbox().height() > 0)
            .collect()
    }
}

impl Model for YOLOv8 {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let t_pre = Instant::now();
        let (xs, ratio) = self.preprocess(frame)?;
        if self.profile {
            debug!("[Model Preprocess]: {:?}", t_pre.elapsed());
        }

        let t_run = Instant::now();
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => xs.view()]?)?;
        let preds = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
        if self.profile {
            debug!("[Model Inference]: {:?}", t_run.elapsed());
        }

        let t_post = Instant::now();
        let ys = self.postprocess(preds, ratio, frame.dimensions());
        if self.profile {
            debug!("[Model Postprocess]: {:?}", t_post.elapsed());
        }

        Ok(ys)
    }

    fn names(&self) -> &[String] {
        &self.names
    }

    fn summary(&self) {
        info!(
            "📦 YOLOv8 模型: {} | 输入 {}x{} | conf {:.2} | iou {:.2} | 类别 {:?}",
            self.model_path.display(),
            self.width,
            self.height,
            self.conf,
            self.iou,
            self.names
        );
    }
}

/// 等比缩放: 返回 (比例, 新宽, 新高)
fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
    let r = (w1 / w0).min(h1 / h0);
    (r, (w0 * r).round(), (h0 * r).round())
}

/// 解码 YOLOv8 检测头输出并做 NMS
fn decode_predictions(
    preds: ArrayViewD<'_, f32>,
    ratio: f32,
    frame_wh: (u32, u32),
    conf: f32,
    iou: f32,
) -> Vec<Candidate> {
    const CXYWH_OFFSET: usize = 4;
    let (w0, h0) = (frame_wh.0 as f32, frame_wh.1 as f32);

    let mut data = Vec::new();
    for anchor in preds.axis_iter(Axis(0)) {
        for pred in anchor.axis_iter(Axis(1)) {
            if pred.len() <= CXYWH_OFFSET {
                continue;
            }
            let bbox = pred.slice(s![0..CXYWH_OFFSET]);
            let clss = pred.slice(s![CXYWH_OFFSET..]);

            let Some((class_id, &confidence)) = clss
                .iter()
                .enumerate()
                .reduce(|max, x| if x.1 > max.1 { x } else { max })
            else {
                continue;
            };
            if confidence < conf {
                continue;
            }

            let cx = bbox[0] / ratio;
            let cy = bbox[1] / ratio;
            let w = bbox[2] / ratio;
            let h = bbox[3] / ratio;
            data.push(Candidate {
                x1: (cx - w / 2.).clamp(0., w0),
                y1: (cy - h / 2.).clamp(0., h0),
                x2: (cx + w / 2.).clamp(0., w0),
                y2: (cy + h / 2.).clamp(0., h0),
                confidence,
                class_id,
            });
        }
    }

    non_max_suppression(&mut data, iou);
    data
}
