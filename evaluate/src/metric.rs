use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::stats;

/// 教学质量维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    TeachingAttitude,
    TeachingContent,
    TeachingMethod,
    TeachingEffectiveness,
    ClassroomManagement,
    StudentEngagement,
    ProfessionalDevelopment,
}

impl Dimension {
    pub const ALL: [Dimension; 7] = [
        Dimension::TeachingAttitude,
        Dimension::TeachingContent,
        Dimension::TeachingMethod,
        Dimension::TeachingEffectiveness,
        Dimension::ClassroomManagement,
        Dimension::StudentEngagement,
        Dimension::ProfessionalDevelopment,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Dimension::TeachingAttitude => "教学态度",
            Dimension::TeachingContent => "教学内容",
            Dimension::TeachingMethod => "教学方法",
            Dimension::TeachingEffectiveness => "教学效果",
            Dimension::ClassroomManagement => "课堂管理",
            Dimension::StudentEngagement => "学生参与",
            Dimension::ProfessionalDevelopment => "专业发展",
        }
    }
}

/// 被评对象类型, 同时也是权重配置的作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluateeType {
    Teacher,
    Course,
    Class,
}

impl EvaluateeType {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluateeType::Teacher => "teacher",
            EvaluateeType::Course => "course",
            EvaluateeType::Class => "class",
        }
    }
}

/// 指标可以聚合到哪一级被评对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggregationLevel {
    #[default]
    All,
    Teacher,
    Course,
    Class,
}

impl AggregationLevel {
    pub fn covers(self, evaluatee_type: EvaluateeType) -> bool {
        match self {
            AggregationLevel::All => true,
            AggregationLevel::Teacher => evaluatee_type == EvaluateeType::Teacher,
            AggregationLevel::Course => evaluatee_type == EvaluateeType::Course,
            AggregationLevel::Class => evaluatee_type == EvaluateeType::Class,
        }
    }
}

/// 把一个指标的多个样本归约为一个原始值的方法
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CalculationMethod {
    Average,
    /// 以样本质量分为权重
    WeightedAverage,
    Median,
    StandardDeviation,
    Percentile { percentile: f64 },
    Sum,
    Count,
}

impl CalculationMethod {
    /// `samples` 为 (值, 质量分) 对; 空样本返回 None
    pub fn reduce(&self, samples: &[(f64, f64)]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let values: Vec<f64> = samples.iter().map(|(v, _)| *v).collect();
        match self {
            CalculationMethod::Average => stats::mean(&values),
            CalculationMethod::WeightedAverage => {
                stats::weighted_mean(samples).or_else(|| stats::mean(&values))
            }
            CalculationMethod::Median => stats::median(&values),
            CalculationMethod::StandardDeviation => stats::population_std_dev(&values),
            CalculationMethod::Percentile { percentile } => {
                stats::percentile(&values, *percentile)
            }
            CalculationMethod::Sum => Some(values.iter().sum()),
            CalculationMethod::Count => Some(values.len() as f64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    #[default]
    MinMax,
    ZScore,
    Robust,
}

/// 指标声明的取值范围
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetric {
    pub id: String,
    pub name: String,
    pub dimension: Dimension,
    pub calculation: CalculationMethod,
    #[serde(default)]
    pub normalization: NormalizationMethod,
    #[serde(default)]
    pub aggregation: AggregationLevel,
    pub range: ScoreRange,
    pub weight: f64,
    pub enabled: bool,
    /// 为空时使用全局的最小样本量
    #[serde(default)]
    pub min_sample_size: Option<usize>,
}

/// 权重的确定方式; 除 `Equal` 外, 权重都由对应方法离线算好后写入配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightingStrategy {
    Equal,
    ExpertJudgment,
    Statistical,
    Ahp,
    Entropy,
    Pca,
    MachineLearning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightConfiguration {
    pub id: String,
    pub name: String,
    pub strategy: WeightingStrategy,
    pub scope: EvaluateeType,
    pub is_default: bool,
    pub dimension_weights: BTreeMap<Dimension, f64>,
    /// 按指标 id 覆盖指标自身的权重
    #[serde(default)]
    pub criterion_weights: BTreeMap<String, f64>,
}

impl WeightConfiguration {
    pub fn dimension_weight(&self, dimension: Dimension) -> Option<f64> {
        match self.strategy {
            WeightingStrategy::Equal => Some(1.0),
            _ => self.dimension_weights.get(&dimension).copied(),
        }
    }

    pub fn metric_weight(&self, metric: &EvaluationMetric) -> f64 {
        match self.strategy {
            WeightingStrategy::Equal => 1.0,
            _ => self
                .criterion_weights
                .get(&metric.id)
                .copied()
                .unwrap_or(metric.weight),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Numeric(f64),
    Boolean(bool),
    Text(String),
}

impl RawValue {
    /// 布尔值映射到声明范围的两端, 文本按数字解析; 无法解析时返回 None
    pub fn as_numeric(&self, range: &ScoreRange) -> Option<f64> {
        let value = match self {
            RawValue::Numeric(v) => *v,
            RawValue::Boolean(true) => range.max,
            RawValue::Boolean(false) => range.min,
            RawValue::Text(text) => text.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    StudentEvaluation,
    PeerReview,
    SupervisorReview,
    SelfAssessment,
    ExamScore,
    Attendance,
    External,
}

/// 一次原始观测, 被计算使用后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDataPoint {
    pub metric_id: String,
    pub value: RawValue,
    pub source: DataSource,
    pub timestamp: DateTime<Utc>,
    /// 0-1
    pub quality: f64,
}

/// 半开区间 [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn last_days(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: now - Duration::days(days),
            end: now,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}
