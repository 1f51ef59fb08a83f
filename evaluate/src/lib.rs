//! 教学评价指标计算核心.
//!
//! 一次计算的流程: 收集原始观测 -> 异常值处理 -> 归一化 -> 加权 -> 聚合 -> 等级划分 -> 生成洞察.
//! 计算本身是无状态的单次过程, 所有 I/O 由 [`source::EvaluationSource`] 在计算前完成.

pub mod calculator;
pub mod config;
pub mod error;
pub mod manager;
pub mod metric;
pub mod pass;
pub mod result;
pub mod source;
pub mod stats;

pub use calculator::{CalculationInput, Calculator};
pub use config::EvaluationContext;
pub use error::{CalculationError, ErrorKind, EvaluationError};
pub use manager::{BatchOutcome, CancellationFlag, EvaluationManager};
pub use metric::{
    Dimension, EvaluateeType, EvaluationMetric, RawDataPoint, TimeWindow, WeightConfiguration,
};
pub use result::{DimensionResult, OverallEvaluationResult};
pub use source::{ConfigurationSelector, EvaluationSource};
