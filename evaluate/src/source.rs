use anyhow::Context;
use async_trait::async_trait;
use database::storage::evaluate_database::EvaluateDatabase;
use entity::{evaluation_metric, evaluation_result, raw_metric_data, weight_configuration};
use sea_orm::ActiveValue::Set;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

use crate::error::EvaluationError;
use crate::metric::{
    DataSource, EvaluateeType, EvaluationMetric, RawDataPoint, RawValue, ScoreRange,
    TimeWindow, WeightConfiguration,
};
use crate::result::{Baseline, OverallEvaluationResult};

/// 选择权重配置: 指定 id, 或者使用被评对象所属作用域的默认配置
#[derive(Debug, Clone, Copy)]
pub struct ConfigurationSelector<'a> {
    pub id: Option<&'a str>,
    pub evaluatee_id: &'a str,
    pub evaluatee_type: EvaluateeType,
}

/// 计算所依赖的外部数据
#[async_trait]
pub trait EvaluationSource: Send + Sync {
    /// 窗口内某个指标的全部观测, 可能为空
    async fn fetch_raw_metric_data(
        &self,
        evaluatee_id: &str,
        evaluatee_type: EvaluateeType,
        metric_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<RawDataPoint>, EvaluationError>;

    /// 没有指定 id 且作用域内没有默认配置时返回 NotFound
    async fn load_weight_configuration(
        &self,
        selector: ConfigurationSelector<'_>,
    ) -> Result<WeightConfiguration, EvaluationError>;

    async fn load_metric_definitions(
        &self,
        enabled_only: bool,
    ) -> Result<Vec<EvaluationMetric>, EvaluationError>;

    /// 同类被评对象在窗口内的观测, 每个对象一组, 供 z-score/robust 归一化使用
    async fn fetch_population(
        &self,
        _evaluatee_type: EvaluateeType,
        _metric_id: &str,
        _window: &TimeWindow,
    ) -> Result<Vec<Vec<RawDataPoint>>, EvaluationError> {
        Ok(Vec::new())
    }

    /// 窗口开始前最近一次的结果
    async fn fetch_baseline(
        &self,
        _evaluatee_id: &str,
        _evaluatee_type: EvaluateeType,
        _window: &TimeWindow,
    ) -> Result<Option<Baseline>, EvaluationError> {
        Ok(None)
    }
}

fn parse_tag<T: DeserializeOwned>(field: &str, tag: &str) -> Result<T, EvaluationError> {
    serde_json::from_value(Value::String(tag.to_owned()))
        .map_err(|_| EvaluationError::configuration(format!("unknown {field} `{tag}`")))
}

fn parse_json<T: DeserializeOwned>(field: &str, json: Value) -> Result<T, EvaluationError> {
    serde_json::from_value(json)
        .map_err(|e| EvaluationError::configuration(format!("malformed {field}: {e}")))
}

impl TryFrom<evaluation_metric::Model> for EvaluationMetric {
    type Error = EvaluationError;

    fn try_from(model: evaluation_metric::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            dimension: parse_tag("dimension", &model.dimension)?,
            calculation: parse_json("calculation method", model.calculation)?,
            normalization: parse_tag("normalization method", &model.normalization)?,
            aggregation: parse_tag("aggregation level", &model.aggregation)?,
            range: ScoreRange {
                min: model.range_min,
                max: model.range_max,
            },
            weight: model.weight,
            enabled: model.enabled,
            min_sample_size: model.min_sample_size.map(|n| n.max(0) as usize),
            id: model.id,
            name: model.name,
        })
    }
}

impl TryFrom<weight_configuration::Model> for WeightConfiguration {
    type Error = EvaluationError;

    fn try_from(model: weight_configuration::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            strategy: parse_tag("weighting strategy", &model.strategy)?,
            scope: parse_tag("configuration scope", &model.scope)?,
            dimension_weights: parse_json("dimension weights", model.dimension_weights)?,
            criterion_weights: parse_json("criterion weights", model.criterion_weights)?,
            is_default: model.is_default,
            id: model.id,
            name: model.name,
        })
    }
}

impl From<raw_metric_data::Model> for RawDataPoint {
    fn from(model: raw_metric_data::Model) -> Self {
        let value = match (model.value_numeric, model.value_bool, model.value_text) {
            (Some(v), _, _) => RawValue::Numeric(v),
            (None, Some(b), _) => RawValue::Boolean(b),
            (None, None, text) => RawValue::Text(text.unwrap_or_default()),
        };
        let source = parse_tag("data source", &model.source).unwrap_or_else(|_| {
            warn!(
                row_id = %model.id,
                source = %model.source,
                "unknown data source, using external"
            );
            DataSource::External
        });
        Self {
            source,
            metric_id: model.metric_id,
            value,
            timestamp: model.observed_at.and_utc(),
            quality: model.quality_score,
        }
    }
}

impl From<evaluation_result::Model> for Baseline {
    fn from(model: evaluation_result::Model) -> Self {
        // 无法解析时视为没有维度基线
        let dimension_scores = serde_json::from_value(model.dimension_scores).unwrap_or_else(|e| {
            warn!(result_id = %model.id, error = %e, "malformed dimension scores in baseline");
            BTreeMap::new()
        });
        Self {
            window_end: model.window_end.and_utc(),
            overall_score: model.overall_score,
            dimension_scores,
        }
    }
}

/// 行已按被评对象排序, 相邻的同一对象归为一组
fn group_by_evaluatee(rows: Vec<raw_metric_data::Model>) -> Vec<Vec<RawDataPoint>> {
    let mut groups: Vec<Vec<RawDataPoint>> = Vec::new();
    let mut current: Option<String> = None;
    for row in rows {
        if current.as_deref() != Some(row.evaluatee_id.as_str()) {
            current = Some(row.evaluatee_id.clone());
            groups.push(Vec::new());
        }
        if let Some(group) = groups.last_mut() {
            group.push(RawDataPoint::from(row));
        }
    }
    groups
}

/// 结果落库, 维度分数单独存一列以便作为后续计算的基线
pub fn to_active_model(
    result: &OverallEvaluationResult,
) -> anyhow::Result<evaluation_result::ActiveModel> {
    let dimension_scores: BTreeMap<_, _> = result.dimension_scores();
    Ok(evaluation_result::ActiveModel {
        id: Set(Uuid::new_v4()),
        evaluatee_id: Set(result.evaluatee_id.clone()),
        evaluatee_type: Set(result.evaluatee_type.as_str().to_owned()),
        configuration_id: Set(result.configuration_id.clone()),
        window_start: Set(result.window.start.naive_utc()),
        window_end: Set(result.window.end.naive_utc()),
        overall_score: Set(result.overall_score),
        overall_level: Set(result.overall_level.map(|level| level.as_str().to_owned())),
        confidence: Set(result.confidence),
        is_valid: Set(result.is_valid),
        dimension_scores: Set(serde_json::to_value(dimension_scores)?),
        payload: Set(serde_json::to_value(result).context("Failed to serialize result")?),
        calculated_at: Set(result.calculated_at.naive_utc()),
    })
}

#[async_trait]
impl EvaluationSource for EvaluateDatabase {
    async fn fetch_raw_metric_data(
        &self,
        evaluatee_id: &str,
        evaluatee_type: EvaluateeType,
        metric_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<RawDataPoint>, EvaluationError> {
        let rows = self
            .get_raw_metric_data(
                evaluatee_id,
                evaluatee_type.as_str(),
                metric_id,
                window.start.naive_utc(),
                window.end.naive_utc(),
            )
            .await
            .with_context(|| format!("Failed to fetch `{metric_id}` data of {evaluatee_id}"))?;
        Ok(rows.into_iter().map(RawDataPoint::from).collect())
    }

    async fn load_weight_configuration(
        &self,
        selector: ConfigurationSelector<'_>,
    ) -> Result<WeightConfiguration, EvaluationError> {
        let model = match selector.id {
            Some(id) => self
                .get_weight_configuration(id)
                .await
                .context("Failed to load weight configuration")?
                .ok_or_else(|| {
                    EvaluationError::not_found(format!("weight configuration `{id}`"))
                })?,
            None => {
                let scope = selector.evaluatee_type.as_str();
                let mut defaults = self
                    .get_default_configurations(scope)
                    .await
                    .context("Failed to load default weight configuration")?;
                match defaults.len() {
                    0 => {
                        return Err(EvaluationError::not_found(format!(
                            "default weight configuration for scope `{scope}`"
                        )))
                    }
                    1 => defaults.remove(0),
                    n => {
                        return Err(EvaluationError::configuration(format!(
                            "{n} default weight configurations for scope `{scope}`, expected one"
                        )))
                    }
                }
            }
        };
        WeightConfiguration::try_from(model)
    }

    async fn load_metric_definitions(
        &self,
        enabled_only: bool,
    ) -> Result<Vec<EvaluationMetric>, EvaluationError> {
        self.get_metric_definitions(enabled_only)
            .await
            .context("Failed to load metric definitions")?
            .into_iter()
            .map(EvaluationMetric::try_from)
            .collect()
    }

    async fn fetch_population(
        &self,
        evaluatee_type: EvaluateeType,
        metric_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<Vec<RawDataPoint>>, EvaluationError> {
        let rows = self
            .get_population_samples(
                evaluatee_type.as_str(),
                metric_id,
                window.start.naive_utc(),
                window.end.naive_utc(),
            )
            .await
            .with_context(|| format!("Failed to fetch population of `{metric_id}`"))?;
        Ok(group_by_evaluatee(rows))
    }

    async fn fetch_baseline(
        &self,
        evaluatee_id: &str,
        evaluatee_type: EvaluateeType,
        window: &TimeWindow,
    ) -> Result<Option<Baseline>, EvaluationError> {
        let model = self
            .get_latest_result_before(evaluatee_id, evaluatee_type.as_str(), window.start.naive_utc())
            .await
            .context("Failed to load baseline result")?;
        Ok(model.map(Baseline::from))
    }
}
