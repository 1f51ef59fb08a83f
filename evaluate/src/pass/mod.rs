//! 计算流水线中的各个环节, 依次为
//! 异常值处理 -> 归一化 -> 加权聚合 -> 等级划分 -> 洞察生成.

pub mod aggregate;
pub mod insight;
pub mod level;
pub mod normalize;
pub mod outlier;

pub use aggregate::{weighted_score, Weighted};
pub use insight::{InsightTemplate, InsightTemplates};
pub use level::{EvaluationLevel, LevelThresholds};
pub use normalize::Normalization;
pub use outlier::{OutlierAction, OutlierMethod, OutlierOutcome, OutlierPolicy, Sample};
