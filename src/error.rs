// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 统一错误类型 (Crate-wide error type)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("配置错误 (config): {0}")]
    Config(String),

    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("图像错误: {0}")]
    Image(#[from] image::ImageError),

    #[error("ONNX Runtime 错误: {0}")]
    Ort(#[from] ort::Error),

    #[error("模型错误: {0}")]
    Model(String),

    #[error("采集错误 (capture): {0}")]
    Capture(String),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML 解析错误: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("数据集标签格式错误 {path}:{line}: {reason}")]
    Label {
        path: String,
        line: usize,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
