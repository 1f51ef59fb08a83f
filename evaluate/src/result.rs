use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::metric::{Dimension, EvaluateeType, TimeWindow};
use crate::pass::EvaluationLevel;

/// 单个指标在一个时间窗口内的计算结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationResult {
    pub metric_id: String,
    pub metric_name: String,
    pub dimension: Dimension,
    pub raw_value: Option<f64>,
    pub normalized_value: Option<f64>,
    /// 归一化值在维度内的加权贡献
    pub weighted_value: f64,
    pub weight: f64,
    pub final_score: Option<f64>,
    pub level: Option<EvaluationLevel>,
    pub confidence: f64,
    pub sample_size: usize,
    pub outlier_count: usize,
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionResult {
    pub dimension: Dimension,
    pub score: Option<f64>,
    pub level: Option<EvaluationLevel>,
    pub weight: f64,
    /// 对总分的贡献, 所有维度贡献之和等于总分
    pub contribution: f64,
    pub confidence: f64,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub metrics: Vec<CalculationResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStatistics {
    pub metric_count: usize,
    pub metrics_with_data: usize,
    pub total_samples: usize,
    pub outlier_count: usize,
    pub removed_count: usize,
    pub response_rate: f64,
    pub completeness: f64,
    pub reliability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendInsight {
    /// None 表示总分
    pub dimension: Option<Dimension>,
    pub previous: f64,
    pub current: f64,
    pub change: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Insights {
    pub strengths: Vec<String>,
    pub improvement_areas: Vec<String>,
    pub recommendations: Vec<String>,
    pub trends: Vec<TrendInsight>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ScoreDistribution {
    pub count: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// 键为百分位, 如 "p25"
    pub percentiles: BTreeMap<String, f64>,
    pub histogram: Vec<HistogramBin>,
}

/// 不影响计算继续进行的数据质量问题
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum DataQualityIssue {
    NoData { metric_id: String },
    InsufficientSamples { metric_id: String, sample_size: usize, required: usize },
    DegeneratePopulation { metric_id: String, population_size: usize },
    NonNumericValues { metric_id: String, count: usize },
    ZeroWeight { dimension: Dimension },
}

/// 历史结果, 用于计算趋势
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub window_end: DateTime<Utc>,
    pub overall_score: Option<f64>,
    pub dimension_scores: BTreeMap<Dimension, f64>,
}

/// 一个被评对象的最终评价结果, 每次整体重新计算
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallEvaluationResult {
    pub evaluatee_id: String,
    pub evaluatee_type: EvaluateeType,
    pub configuration_id: String,
    pub window: TimeWindow,
    pub overall_score: Option<f64>,
    pub overall_level: Option<EvaluationLevel>,
    pub confidence: f64,
    pub is_valid: bool,
    pub dimensions: Vec<DimensionResult>,
    pub summary: SummaryStatistics,
    pub insights: Insights,
    pub distribution: ScoreDistribution,
    pub data_quality: Vec<DataQualityIssue>,
    pub calculated_at: DateTime<Utc>,
}

impl OverallEvaluationResult {
    pub fn dimension(&self, dimension: Dimension) -> Option<&DimensionResult> {
        self.dimensions.iter().find(|d| d.dimension == dimension)
    }

    pub fn dimension_scores(&self) -> BTreeMap<Dimension, f64> {
        self.dimensions
            .iter()
            .filter_map(|d| d.score.map(|score| (d.dimension, score)))
            .collect()
    }
}
