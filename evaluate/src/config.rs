use anyhow::Context;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::EvaluationError;
use crate::pass::{InsightTemplates, LevelThresholds, OutlierPolicy};

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseUrlConfig {
    pub url: String,
}

impl Default for DatabaseUrlConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/teaching_evaluation".to_owned(),
        }
    }
}

/// 最终分数所在的量表, 归一化后的 0-1 值线性映射到 [min, max]
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct ScoreScale {
    pub min: f64,
    pub max: f64,
}

impl Default for ScoreScale {
    fn default() -> Self {
        Self { min: 1.0, max: 5.0 }
    }
}

impl ScoreScale {
    pub fn to_score(&self, unit: f64) -> f64 {
        self.min + unit * (self.max - self.min)
    }

    pub fn to_unit(&self, score: f64) -> f64 {
        (score - self.min) / (self.max - self.min)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CalculationConfig {
    /// 指标未声明时的最小样本量, 低于它置信度线性降低
    pub min_sample_size: usize,
    /// 无数据指标占比超过该值时结果标记为无效
    pub missing_data_threshold: f64,
    /// 总体样本退化时置信度乘以该系数
    pub degenerate_confidence: f64,
    pub trend_tolerance: f64,
    pub histogram_bins: usize,
    pub scale: ScoreScale,
}

impl Default for CalculationConfig {
    fn default() -> Self {
        Self {
            min_sample_size: 5,
            missing_data_threshold: 0.3,
            degenerate_confidence: 0.5,
            trend_tolerance: 0.1,
            histogram_bins: 5,
            scale: ScoreScale::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BatchConfig {
    pub concurrency: usize,
    pub window_days: i64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            window_days: 180,
        }
    }
}

/// 评价上下文结构体, 每次计算显式传入, 计算期间只读
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EvaluationContext {
    #[serde(default)]
    pub database_url: DatabaseUrlConfig,
    #[serde(default)]
    pub calculation: CalculationConfig,
    #[serde(default)]
    pub outlier: OutlierPolicy,
    #[serde(default)]
    pub levels: LevelThresholds,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub insights: InsightTemplates,
}

impl EvaluationContext {
    /// 读取 TOML 配置, 环境变量 `TEVAL_<SECTION>__<KEY>` 可覆盖文件中的值
    pub fn load_config(config_path: &str) -> anyhow::Result<Self> {
        let ctx: Self = Config::builder()
            .add_source(
                File::with_name(config_path)
                    .format(FileFormat::Toml)
                    .required(true),
            )
            .add_source(
                Environment::with_prefix("TEVAL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| anyhow::anyhow!("Failed to load config"))?
            .try_deserialize()
            .with_context(|| anyhow::anyhow!("Failed to deserialize config"))?;
        ctx.validate()?;
        Ok(ctx)
    }

    pub fn validate(&self) -> Result<(), EvaluationError> {
        let calc = &self.calculation;
        if calc.min_sample_size == 0 {
            return Err(EvaluationError::configuration(
                "calculation.min_sample_size must be at least 1",
            ));
        }
        for (name, value) in [
            ("missing_data_threshold", calc.missing_data_threshold),
            ("degenerate_confidence", calc.degenerate_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EvaluationError::configuration(format!(
                    "calculation.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if !calc.trend_tolerance.is_finite() || calc.trend_tolerance < 0.0 {
            return Err(EvaluationError::configuration(
                "calculation.trend_tolerance must be a non-negative number",
            ));
        }
        if calc.histogram_bins == 0 {
            return Err(EvaluationError::configuration(
                "calculation.histogram_bins must be at least 1",
            ));
        }
        let scale = calc.scale;
        if !scale.min.is_finite() || !scale.max.is_finite() || scale.max <= scale.min {
            return Err(EvaluationError::configuration(format!(
                "calculation.scale must satisfy min < max, got [{}, {}]",
                scale.min, scale.max
            )));
        }
        if self.batch.concurrency == 0 {
            return Err(EvaluationError::configuration(
                "batch.concurrency must be at least 1",
            ));
        }
        self.outlier
            .validate()
            .map_err(EvaluationError::Configuration)?;
        self.levels.validate().map_err(EvaluationError::Configuration)
    }
}
