use serde::Serialize;
use thiserror::Error;

/// 单次计算可能失败的原因
///
/// 数据质量问题(样本不足, 方差为零等)不在这里, 它们记录在结果的
/// `data_quality` 中并体现为较低的置信度.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("data source error: {0:#}")]
    Source(#[from] anyhow::Error),
}

impl EvaluationError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// 配置类错误表示"根本无法计算", 调用方应映射为 422 而不是带低置信度的 200
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::NotFound(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Source(_) => ErrorKind::Source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    NotFound,
    Source,
}

/// 批量计算中单个被评对象的失败记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationError {
    pub evaluatee_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl CalculationError {
    pub fn new(evaluatee_id: impl Into<String>, error: &EvaluationError) -> Self {
        Self {
            evaluatee_id: evaluatee_id.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}
