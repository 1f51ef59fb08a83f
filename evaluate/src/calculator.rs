use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::config::EvaluationContext;
use crate::error::EvaluationError;
use crate::metric::{
    CalculationMethod, Dimension, EvaluateeType, EvaluationMetric, RawDataPoint, RawValue,
    TimeWindow, WeightConfiguration,
};
use crate::pass::aggregate::{weight_shares, weighted_score, Weighted};
use crate::pass::normalize::{self, Normalization};
use crate::pass::{insight, OutlierOutcome, Sample};
use crate::result::{
    Baseline, CalculationResult, DataQualityIssue, DimensionResult, HistogramBin,
    OverallEvaluationResult, ScoreDistribution, SummaryStatistics,
};
use crate::stats;

const REPORTED_PERCENTILES: [u32; 4] = [10, 25, 75, 90];

/// 一次计算所需的全部数据, 均由调用方在计算前取好
pub struct CalculationInput<'a> {
    pub evaluatee_id: &'a str,
    pub evaluatee_type: EvaluateeType,
    pub window: TimeWindow,
    pub metrics: &'a [EvaluationMetric],
    pub configuration: &'a WeightConfiguration,
    /// 按指标 id 分组的原始观测
    pub observations: &'a HashMap<String, Vec<RawDataPoint>>,
    /// 按指标 id 分组的同类对象取值, 供 z-score/robust 归一化
    pub populations: &'a HashMap<String, Vec<f64>>,
    pub baseline: Option<&'a Baseline>,
}

/// 单个指标的中间结果
struct MetricScore<'m> {
    metric: &'m EvaluationMetric,
    weight: f64,
    raw_value: Option<f64>,
    normalization: Option<Normalization>,
    confidence: f64,
    sample_size: usize,
    required_samples: usize,
    outlier_count: usize,
    removed_count: usize,
    scaled_samples: Vec<f64>,
}

impl MetricScore<'_> {
    fn unit(&self) -> Option<f64> {
        self.normalization.map(|n| n.unit)
    }

    fn has_data(&self) -> bool {
        self.raw_value.is_some()
    }
}

pub struct Calculator<'a> {
    ctx: &'a EvaluationContext,
}

impl<'a> Calculator<'a> {
    pub fn new(ctx: &'a EvaluationContext) -> Self {
        Self { ctx }
    }

    /// 在任何计算开始前检查指标定义与权重配置, 返回本次参与计算的指标
    pub fn validate<'m>(
        &self,
        metrics: &'m [EvaluationMetric],
        configuration: &WeightConfiguration,
        evaluatee_type: EvaluateeType,
    ) -> Result<Vec<&'m EvaluationMetric>, EvaluationError> {
        if configuration.scope != evaluatee_type {
            return Err(EvaluationError::configuration(format!(
                "weight configuration `{}` is scoped to {} but evaluatee is a {}",
                configuration.id,
                configuration.scope.as_str(),
                evaluatee_type.as_str()
            )));
        }

        let applicable: Vec<&EvaluationMetric> = metrics
            .iter()
            .filter(|m| m.enabled && m.aggregation.covers(evaluatee_type))
            .collect();
        if applicable.is_empty() {
            return Err(EvaluationError::configuration(format!(
                "no enabled metric applies to {}",
                evaluatee_type.as_str()
            )));
        }

        for metric in &applicable {
            if !(0.0..=1.0).contains(&metric.weight) {
                return Err(EvaluationError::configuration(format!(
                    "metric `{}` weight {} is outside [0, 1]",
                    metric.id, metric.weight
                )));
            }
            let range = metric.range;
            if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
                return Err(EvaluationError::configuration(format!(
                    "metric `{}` has an invalid range [{}, {}]",
                    metric.id, range.min, range.max
                )));
            }
            if let CalculationMethod::Percentile { percentile } = metric.calculation {
                if !(0.0..=100.0).contains(&percentile) {
                    return Err(EvaluationError::configuration(format!(
                        "metric `{}` percentile {} is outside [0, 100]",
                        metric.id, percentile
                    )));
                }
            }
        }

        for (metric_id, weight) in &configuration.criterion_weights {
            if !metrics.iter().any(|m| &m.id == metric_id) {
                return Err(EvaluationError::configuration(format!(
                    "weight configuration `{}` references unknown metric `{}`",
                    configuration.id, metric_id
                )));
            }
            if !(0.0..=1.0).contains(weight) {
                return Err(EvaluationError::configuration(format!(
                    "criterion weight for `{metric_id}` is outside [0, 1]: {weight}"
                )));
            }
        }
        for (dimension, weight) in &configuration.dimension_weights {
            if !(0.0..=1.0).contains(weight) {
                return Err(EvaluationError::configuration(format!(
                    "dimension weight for {dimension:?} is outside [0, 1]: {weight}"
                )));
            }
        }

        let mut measured: Vec<Dimension> = applicable.iter().map(|m| m.dimension).collect();
        measured.sort();
        measured.dedup();
        let mut total = 0.0;
        for dimension in measured {
            let weight = configuration.dimension_weight(dimension).ok_or_else(|| {
                EvaluationError::configuration(format!(
                    "weight configuration `{}` has no weight for dimension {:?}",
                    configuration.id, dimension
                ))
            })?;
            total += weight;
        }
        if total <= 0.0 {
            return Err(EvaluationError::configuration(format!(
                "weight configuration `{}` gives every measured dimension zero weight",
                configuration.id
            )));
        }

        Ok(applicable)
    }

    pub fn calculate(
        &self,
        input: &CalculationInput<'_>,
    ) -> Result<OverallEvaluationResult, EvaluationError> {
        let metrics = self.validate(input.metrics, input.configuration, input.evaluatee_type)?;
        let levels = &self.ctx.levels;
        let scale = self.ctx.calculation.scale;
        let mut issues = Vec::new();

        let mut by_dimension: BTreeMap<Dimension, Vec<MetricScore>> = BTreeMap::new();
        for metric in metrics {
            let points = input
                .observations
                .get(&metric.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let population = input
                .populations
                .get(&metric.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let weight = input.configuration.metric_weight(metric);
            let score = self.score_metric(metric, weight, points, population, &mut issues);
            by_dimension.entry(metric.dimension).or_default().push(score);
        }

        let mut dimensions = Vec::new();
        let mut dimension_units = Vec::new();
        for (dimension, scores) in &by_dimension {
            let items: Vec<Weighted> = scores
                .iter()
                .map(|s| Weighted::new(s.unit(), s.weight))
                .collect();
            let unit = weighted_score(&items);
            if unit.is_none() && scores.iter().any(MetricScore::has_data) {
                issues.push(DataQualityIssue::ZeroWeight {
                    dimension: *dimension,
                });
            }

            let shares = weight_shares(&items);
            let metric_results: Vec<CalculationResult> = scores
                .iter()
                .zip(shares)
                .map(|(score, share)| self.metric_result(score, share))
                .collect();
            let confidence = weighted_score(
                &scores
                    .iter()
                    .map(|s| Weighted::new(s.has_data().then_some(s.confidence), s.weight))
                    .collect::<Vec<_>>(),
            )
            .unwrap_or(0.0);
            let score = unit.map(|u| scale.to_score(u));
            let (strengths, weaknesses) = insight::metric_highlights(&metric_results, levels);

            dimension_units.push(unit);
            dimensions.push(DimensionResult {
                dimension: *dimension,
                score,
                level: score.map(|s| levels.classify(s)),
                weight: input.configuration.dimension_weight(*dimension).unwrap_or(0.0),
                contribution: 0.0,
                confidence,
                strengths,
                weaknesses,
                metrics: metric_results,
            });
        }

        let overall_items: Vec<Weighted> = dimensions
            .iter()
            .zip(&dimension_units)
            .map(|(d, unit)| Weighted::new(*unit, d.weight))
            .collect();
        let overall_unit = weighted_score(&overall_items);
        let overall_score = overall_unit.map(|u| scale.to_score(u));
        for (dimension, share) in dimensions.iter_mut().zip(weight_shares(&overall_items)) {
            dimension.contribution = dimension.score.map_or(0.0, |s| s * share);
        }
        let confidence = weighted_score(
            &dimensions
                .iter()
                .zip(&dimension_units)
                .map(|(d, unit)| Weighted::new(unit.map(|_| d.confidence), d.weight))
                .collect::<Vec<_>>(),
        )
        .unwrap_or(0.0);

        let all_scores: Vec<&MetricScore> = by_dimension.values().flatten().collect();
        let summary = self.summary(&all_scores);
        let missing_ratio = 1.0 - summary.completeness;
        let is_valid = overall_score.is_some()
            && missing_ratio <= self.ctx.calculation.missing_data_threshold;
        let samples: Vec<f64> = all_scores
            .iter()
            .flat_map(|s| s.scaled_samples.iter().copied())
            .collect();

        let mut insights = insight::generate(&dimensions, levels, &self.ctx.insights);
        insights.trends = insight::trends(
            overall_score,
            &dimensions,
            input.baseline,
            self.ctx.calculation.trend_tolerance,
        );

        debug!(
            evaluatee_id = input.evaluatee_id,
            overall_score,
            is_valid,
            issues = issues.len(),
            "evaluation calculated"
        );

        Ok(OverallEvaluationResult {
            evaluatee_id: input.evaluatee_id.to_owned(),
            evaluatee_type: input.evaluatee_type,
            configuration_id: input.configuration.id.clone(),
            window: input.window,
            overall_score,
            overall_level: overall_score.map(|s| levels.classify(s)),
            confidence,
            is_valid,
            dimensions,
            summary,
            insights,
            distribution: self.distribution(&samples),
            data_quality: issues,
            calculated_at: Utc::now(),
        })
    }

    /// 同类对象的观测按本指标的计算方法归约成一个值, 与被评对象自身的取值可比
    pub fn peer_value(&self, metric: &EvaluationMetric, points: &[RawDataPoint]) -> Option<f64> {
        let (outcome, _) = self.prepare_samples(metric, points);
        reduce(metric, &outcome)
    }

    /// 数值化后做异常值处理, 返回处理结果和无法数值化的观测数
    ///
    /// 布尔观测只能取范围两端, 不参与异常值检测.
    fn prepare_samples(
        &self,
        metric: &EvaluationMetric,
        points: &[RawDataPoint],
    ) -> (OutlierOutcome, usize) {
        let mut non_numeric = 0;
        let mut continuous = Vec::new();
        let mut binary = Vec::new();
        for point in points {
            let Some(value) = point.value.as_numeric(&metric.range) else {
                non_numeric += 1;
                continue;
            };
            let quality = if point.quality.is_finite() {
                point.quality.clamp(0.0, 1.0)
            } else {
                0.0
            };
            let sample = Sample { value, quality };
            match point.value {
                RawValue::Boolean(_) => binary.push(sample),
                _ => continuous.push(sample),
            }
        }

        let mut outcome = self.ctx.outlier.apply(continuous);
        outcome.samples.extend(binary);
        (outcome, non_numeric)
    }

    /// 数值化 -> 异常值处理 -> 归约 -> 归一化
    fn score_metric<'m>(
        &self,
        metric: &'m EvaluationMetric,
        weight: f64,
        points: &[RawDataPoint],
        population: &[f64],
        issues: &mut Vec<DataQualityIssue>,
    ) -> MetricScore<'m> {
        let calc = &self.ctx.calculation;
        let required_samples = metric.min_sample_size.unwrap_or(calc.min_sample_size).max(1);

        let (outcome, non_numeric) = self.prepare_samples(metric, points);
        if non_numeric > 0 {
            issues.push(DataQualityIssue::NonNumericValues {
                metric_id: metric.id.clone(),
                count: non_numeric,
            });
        }

        let sample_size = outcome.samples.len();
        let raw_value = reduce(metric, &outcome);

        let normalization = raw_value.map(|raw| {
            normalize::normalize(metric.normalization, raw, &metric.range, population)
        });
        let mut confidence = normalize::sample_confidence(sample_size, required_samples);
        match normalization {
            None => {
                debug!(metric_id = %metric.id, "metric has no usable samples");
                issues.push(DataQualityIssue::NoData {
                    metric_id: metric.id.clone(),
                });
            }
            Some(n) => {
                if n.degenerate {
                    confidence *= calc.degenerate_confidence;
                    issues.push(DataQualityIssue::DegeneratePopulation {
                        metric_id: metric.id.clone(),
                        population_size: population.len(),
                    });
                }
                if sample_size < required_samples {
                    issues.push(DataQualityIssue::InsufficientSamples {
                        metric_id: metric.id.clone(),
                        sample_size,
                        required: required_samples,
                    });
                }
            }
        }

        let scaled_samples = outcome
            .samples
            .iter()
            .map(|s| calc.scale.to_score(normalize::min_max(s.value, &metric.range)))
            .collect();

        MetricScore {
            metric,
            weight,
            raw_value,
            normalization,
            confidence,
            sample_size,
            required_samples,
            outlier_count: outcome.flagged,
            removed_count: outcome.removed,
            scaled_samples,
        }
    }

    fn metric_result(&self, score: &MetricScore<'_>, share: f64) -> CalculationResult {
        let final_score = score.unit().map(|u| self.ctx.calculation.scale.to_score(u));
        CalculationResult {
            metric_id: score.metric.id.clone(),
            metric_name: score.metric.name.clone(),
            dimension: score.metric.dimension,
            raw_value: score.raw_value,
            normalized_value: score.normalization.map(|n| n.value),
            weighted_value: score.unit().map_or(0.0, |u| u * share),
            weight: score.weight,
            final_score,
            level: final_score.map(|s| self.ctx.levels.classify(s)),
            confidence: score.confidence,
            sample_size: score.sample_size,
            outlier_count: score.outlier_count,
            is_valid: score.has_data(),
        }
    }

    fn summary(&self, scores: &[&MetricScore<'_>]) -> SummaryStatistics {
        let metric_count = scores.len();
        let metrics_with_data = scores.iter().filter(|s| s.has_data()).count();
        let total_samples: usize = scores.iter().map(|s| s.sample_size).sum();
        let required: usize = scores.iter().map(|s| s.required_samples).sum();
        let reliability = weighted_score(
            &scores
                .iter()
                .map(|s| Weighted::new(s.has_data().then_some(s.confidence), s.weight))
                .collect::<Vec<_>>(),
        )
        .unwrap_or(0.0);

        SummaryStatistics {
            metric_count,
            metrics_with_data,
            total_samples,
            outlier_count: scores.iter().map(|s| s.outlier_count).sum(),
            removed_count: scores.iter().map(|s| s.removed_count).sum(),
            response_rate: if required == 0 {
                0.0
            } else {
                (total_samples as f64 / required as f64).min(1.0)
            },
            completeness: if metric_count == 0 {
                0.0
            } else {
                metrics_with_data as f64 / metric_count as f64
            },
            reliability,
        }
    }

    fn distribution(&self, samples: &[f64]) -> ScoreDistribution {
        if samples.is_empty() {
            return ScoreDistribution::default();
        }
        let sorted = stats::sorted(samples);
        let percentiles = REPORTED_PERCENTILES
            .iter()
            .filter_map(|p| {
                stats::quantile_sorted(&sorted, *p as f64 / 100.0).map(|v| (format!("p{p}"), v))
            })
            .collect();

        let scale = self.ctx.calculation.scale;
        let bins = self.ctx.calculation.histogram_bins.max(1);
        let width = (scale.max - scale.min) / bins as f64;
        let mut histogram: Vec<HistogramBin> = (0..bins)
            .map(|i| HistogramBin {
                lower: scale.min + width * i as f64,
                upper: scale.min + width * (i + 1) as f64,
                count: 0,
            })
            .collect();
        for value in &sorted {
            let index = ((value - scale.min) / width).floor().max(0.0) as usize;
            histogram[index.min(bins - 1)].count += 1;
        }

        ScoreDistribution {
            count: sorted.len(),
            mean: stats::mean(&sorted),
            median: stats::median(&sorted),
            std_dev: stats::population_std_dev(&sorted),
            min: sorted.first().copied(),
            max: sorted.last().copied(),
            percentiles,
            histogram,
        }
    }
}

fn reduce(metric: &EvaluationMetric, outcome: &OutlierOutcome) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = outcome.samples.iter().map(|s| (s.value, s.quality)).collect();
    metric.calculation.reduce(&pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{
        AggregationLevel, DataSource, NormalizationMethod, ScoreRange, WeightingStrategy,
    };
    use crate::pass::{EvaluationLevel, OutlierAction};
    use crate::result::TrendDirection;
    use chrono::{Duration, TimeZone};

    const LIKERT: ScoreRange = ScoreRange { min: 1.0, max: 5.0 };

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-9)
    }

    fn window() -> TimeWindow {
        let end = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        TimeWindow::last_days(end, 180)
    }

    fn metric(id: &str, dimension: Dimension, weight: f64) -> EvaluationMetric {
        EvaluationMetric {
            id: id.to_owned(),
            name: id.to_owned(),
            dimension,
            calculation: CalculationMethod::Average,
            normalization: NormalizationMethod::MinMax,
            aggregation: AggregationLevel::All,
            range: LIKERT,
            weight,
            enabled: true,
            min_sample_size: None,
        }
    }

    fn configuration(weights: &[(Dimension, f64)]) -> WeightConfiguration {
        WeightConfiguration {
            id: "default-teacher".to_owned(),
            name: "教师默认方案".to_owned(),
            strategy: WeightingStrategy::ExpertJudgment,
            scope: EvaluateeType::Teacher,
            is_default: true,
            dimension_weights: weights.iter().copied().collect(),
            criterion_weights: BTreeMap::new(),
        }
    }

    fn points(metric_id: &str, values: &[f64]) -> Vec<RawDataPoint> {
        let start = window().start;
        values
            .iter()
            .enumerate()
            .map(|(i, v)| RawDataPoint {
                metric_id: metric_id.to_owned(),
                value: RawValue::Numeric(*v),
                source: DataSource::StudentEvaluation,
                timestamp: start + Duration::days(i as i64),
                quality: 1.0,
            })
            .collect()
    }

    struct Fixture {
        ctx: EvaluationContext,
        metrics: Vec<EvaluationMetric>,
        configuration: WeightConfiguration,
        observations: HashMap<String, Vec<RawDataPoint>>,
        populations: HashMap<String, Vec<f64>>,
        baseline: Option<Baseline>,
    }

    impl Fixture {
        fn new(metrics: Vec<EvaluationMetric>, configuration: WeightConfiguration) -> Self {
            Self {
                ctx: EvaluationContext::default(),
                metrics,
                configuration,
                observations: HashMap::new(),
                populations: HashMap::new(),
                baseline: None,
            }
        }

        fn observe(mut self, metric_id: &str, values: &[f64]) -> Self {
            self.observations
                .insert(metric_id.to_owned(), points(metric_id, values));
            self
        }

        fn run(&self) -> Result<OverallEvaluationResult, EvaluationError> {
            Calculator::new(&self.ctx).calculate(&CalculationInput {
                evaluatee_id: "T001",
                evaluatee_type: EvaluateeType::Teacher,
                window: window(),
                metrics: &self.metrics,
                configuration: &self.configuration,
                observations: &self.observations,
                populations: &self.populations,
                baseline: self.baseline.as_ref(),
            })
        }
    }

    fn single_metric() -> Fixture {
        let mut teaching_method = metric("teaching_method", Dimension::TeachingMethod, 1.0);
        teaching_method.name = "教学方法".to_owned();
        Fixture::new(
            vec![teaching_method],
            configuration(&[(Dimension::TeachingMethod, 1.0)]),
        )
    }

    #[test]
    fn test_outlier_is_capped_not_discarded() {
        let result = single_metric()
            .observe("teaching_method", &[3.0, 4.0, 4.0, 5.0, 50.0])
            .run()
            .unwrap();
        let metric = &result.dimensions[0].metrics[0];
        assert_eq!(metric.sample_size, 5);
        assert_eq!(metric.outlier_count, 1);
        // [3, 4, 4, 5, 5.0] 的均值
        assert!(approx(metric.raw_value, 4.2));
        assert!(approx(metric.normalized_value, 0.8));
        assert!(approx(metric.final_score, 4.2));
        assert!(approx(result.overall_score, 4.2));
        assert_eq!(result.summary.outlier_count, 1);
    }

    #[test]
    fn test_score_on_threshold_is_classified_upward() {
        let result = single_metric()
            .observe("teaching_method", &[3.5, 3.5, 3.5, 3.5, 3.5])
            .run()
            .unwrap();
        assert_eq!(result.overall_score, Some(3.5));
        assert_eq!(result.overall_level, Some(EvaluationLevel::Good));
        assert_eq!(result.dimensions[0].level, Some(EvaluationLevel::Good));
        assert!(result.is_valid);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_uniform_weight_scaling_does_not_change_scores() {
        let build = |weights: [f64; 3]| {
            let metrics = vec![
                metric("a", Dimension::TeachingContent, weights[0]),
                metric("b", Dimension::TeachingContent, weights[1]),
                metric("c", Dimension::TeachingContent, weights[2]),
            ];
            Fixture::new(metrics, configuration(&[(Dimension::TeachingContent, 1.0)]))
                .observe("a", &[5.0, 5.0, 4.0, 5.0, 5.0])
                .observe("b", &[3.0, 2.0, 3.0, 3.0, 3.0])
                .observe("c", &[1.0, 2.0, 2.0, 1.0, 2.0])
                .run()
                .unwrap()
        };
        let heavy = build([0.2, 0.2, 0.4]);
        let light = build([0.1, 0.1, 0.2]);
        let heavy_score = heavy.dimensions[0].score.unwrap();
        assert!(approx(light.dimensions[0].score, heavy_score));
        assert!(approx(light.overall_score, heavy.overall_score.unwrap()));
    }

    #[test]
    fn test_metric_without_samples_is_excluded() {
        let with_empty = Fixture::new(
            vec![
                metric("a", Dimension::TeachingMethod, 0.5),
                metric("empty", Dimension::TeachingMethod, 0.5),
            ],
            configuration(&[(Dimension::TeachingMethod, 1.0)]),
        )
        .observe("a", &[4.0, 4.0, 4.0, 4.0, 4.0])
        .run()
        .unwrap();
        let without = Fixture::new(
            vec![metric("a", Dimension::TeachingMethod, 0.5)],
            configuration(&[(Dimension::TeachingMethod, 1.0)]),
        )
        .observe("a", &[4.0, 4.0, 4.0, 4.0, 4.0])
        .run()
        .unwrap();

        assert_eq!(with_empty.dimensions[0].score, without.dimensions[0].score);
        assert_eq!(with_empty.overall_score, Some(4.0));
        let empty = &with_empty.dimensions[0].metrics[1];
        assert!(!empty.is_valid);
        assert_eq!(empty.weighted_value, 0.0);
        assert!(with_empty
            .data_quality
            .contains(&DataQualityIssue::NoData { metric_id: "empty".into() }));
    }

    #[test]
    fn test_flag_action_does_not_change_score() {
        let values = [3.0, 4.0, 4.0, 5.0, 50.0];
        let mut flagged = single_metric().observe("teaching_method", &values);
        flagged.ctx.outlier.action = OutlierAction::Flag;
        let mut untouched = single_metric().observe("teaching_method", &values);
        untouched.ctx.outlier.enabled = false;

        let flagged = flagged.run().unwrap();
        let untouched = untouched.run().unwrap();
        assert_eq!(flagged.overall_score, untouched.overall_score);
        assert_eq!(flagged.dimensions[0].metrics[0].outlier_count, 1);
        assert_eq!(untouched.dimensions[0].metrics[0].outlier_count, 0);
    }

    #[test]
    fn test_remove_action_shrinks_sample() {
        let mut fixture = single_metric().observe("teaching_method", &[3.0, 4.0, 4.0, 5.0, 50.0]);
        fixture.ctx.outlier.action = OutlierAction::Remove;
        let result = fixture.run().unwrap();
        let metric = &result.dimensions[0].metrics[0];
        assert_eq!(metric.sample_size, 4);
        assert_eq!(metric.outlier_count, 1);
        assert_eq!(result.summary.removed_count, 1);
        assert!(approx(Some(metric.confidence), 0.8));
    }

    #[test]
    fn test_too_much_missing_data_marks_result_invalid() {
        let result = Fixture::new(
            vec![
                metric("a", Dimension::TeachingMethod, 1.0),
                metric("b", Dimension::TeachingContent, 1.0),
                metric("c", Dimension::StudentEngagement, 1.0),
            ],
            configuration(&[
                (Dimension::TeachingMethod, 0.4),
                (Dimension::TeachingContent, 0.3),
                (Dimension::StudentEngagement, 0.3),
            ]),
        )
        .observe("a", &[4.0, 4.0, 4.0, 4.0, 4.0])
        .run()
        .unwrap();

        assert!(!result.is_valid);
        assert_eq!(result.overall_score, Some(4.0));
        assert!(approx(Some(result.summary.completeness), 1.0 / 3.0));
        assert_eq!(result.dimension(Dimension::TeachingContent).unwrap().score, None);
    }

    #[test]
    fn test_contributions_add_up_to_overall_score() {
        let result = Fixture::new(
            vec![
                metric("a", Dimension::TeachingMethod, 1.0),
                metric("b", Dimension::TeachingContent, 1.0),
            ],
            configuration(&[
                (Dimension::TeachingMethod, 0.6),
                (Dimension::TeachingContent, 0.2),
            ]),
        )
        .observe("a", &[5.0, 5.0, 5.0, 5.0, 5.0])
        .observe("b", &[1.0, 1.0, 1.0, 1.0, 1.0])
        .run()
        .unwrap();

        // (1.0 * 0.6 + 0.0 * 0.2) / 0.8 = 0.75 -> 4.0
        assert!(approx(result.overall_score, 4.0));
        let total: f64 = result.dimensions.iter().map(|d| d.contribution).sum();
        assert!(approx(Some(total), 4.0));
        assert_eq!(result.insights.strengths.len(), 1);
        assert_eq!(result.insights.improvement_areas.len(), 1);
        assert_eq!(result.insights.recommendations.len(), 1);
    }

    #[test]
    fn test_insufficient_samples_lower_confidence() {
        let result = single_metric()
            .observe("teaching_method", &[4.0, 5.0])
            .run()
            .unwrap();
        let metric = &result.dimensions[0].metrics[0];
        assert!(approx(Some(metric.confidence), 0.4));
        assert!(result.data_quality.contains(&DataQualityIssue::InsufficientSamples {
            metric_id: "teaching_method".into(),
            sample_size: 2,
            required: 5,
        }));
        assert!(result.is_valid);
    }

    #[test]
    fn test_degenerate_population_is_neutral_with_lower_confidence() {
        let mut fixture = single_metric().observe("teaching_method", &[4.0, 4.0, 4.0, 4.0, 4.0]);
        fixture.metrics[0].normalization = NormalizationMethod::ZScore;
        fixture
            .populations
            .insert("teaching_method".into(), vec![3.8, 3.8, 3.8]);
        let result = fixture.run().unwrap();
        let metric = &result.dimensions[0].metrics[0];
        assert_eq!(metric.normalized_value, Some(0.0));
        assert!((metric.final_score.unwrap() - 3.0).abs() < 1e-6);
        assert_eq!(metric.confidence, 0.5);
    }

    #[test]
    fn test_boolean_observations_are_never_outliers() {
        let mut fixture = single_metric().observe("teaching_method", &[0.0; 5]);
        fixture.metrics[0].range = ScoreRange { min: 0.0, max: 1.0 };
        let attendance = [true, true, true, false, false];
        for (point, attended) in fixture
            .observations
            .get_mut("teaching_method")
            .unwrap()
            .iter_mut()
            .zip(attendance)
        {
            point.value = RawValue::Boolean(attended);
        }
        let result = fixture.run().unwrap();
        let metric = &result.dimensions[0].metrics[0];
        assert_eq!(metric.outlier_count, 0);
        assert!(approx(metric.raw_value, 0.6));
    }

    #[test]
    fn test_peer_value_uses_metric_calculation() {
        let fixture = single_metric();
        let calculator = Calculator::new(&fixture.ctx);
        let mut count = fixture.metrics[0].clone();
        count.calculation = CalculationMethod::Count;
        let median = EvaluationMetric {
            calculation: CalculationMethod::Median,
            ..count.clone()
        };

        let peer = points("teaching_method", &[2.0, 5.0, 3.0, 4.0, 3.0]);
        assert_eq!(calculator.peer_value(&count, &peer), Some(5.0));
        assert_eq!(calculator.peer_value(&median, &peer), Some(3.0));
        assert_eq!(calculator.peer_value(&count, &[]), None);
    }

    #[test]
    fn test_non_numeric_values_are_reported() {
        let mut fixture = single_metric().observe("teaching_method", &[4.0, 4.0, 4.0, 4.0, 4.0]);
        let mut text = fixture.observations["teaching_method"][0].clone();
        text.value = RawValue::Text("非常满意".into());
        fixture
            .observations
            .get_mut("teaching_method")
            .unwrap()
            .push(text);
        let result = fixture.run().unwrap();
        assert_eq!(result.dimensions[0].metrics[0].sample_size, 5);
        assert!(result.data_quality.contains(&DataQualityIssue::NonNumericValues {
            metric_id: "teaching_method".into(),
            count: 1,
        }));
    }

    #[test]
    fn test_distribution_and_histogram() {
        let result = single_metric()
            .observe("teaching_method", &[1.0, 2.0, 3.0, 4.0, 5.0])
            .run()
            .unwrap();
        let distribution = &result.distribution;
        assert_eq!(distribution.count, 5);
        assert_eq!(distribution.mean, Some(3.0));
        assert_eq!(distribution.median, Some(3.0));
        assert_eq!(distribution.min, Some(1.0));
        assert_eq!(distribution.max, Some(5.0));
        assert_eq!(distribution.percentiles["p25"], 2.0);
        let counts: Vec<usize> = distribution.histogram.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_trend_against_baseline() {
        let mut fixture = single_metric().observe("teaching_method", &[4.0, 4.0, 4.0, 4.0, 4.0]);
        fixture.baseline = Some(Baseline {
            window_end: window().start,
            overall_score: Some(4.5),
            dimension_scores: BTreeMap::from([(Dimension::TeachingMethod, 4.5)]),
        });
        let result = fixture.run().unwrap();
        assert_eq!(result.insights.trends.len(), 2);
        assert!(result
            .insights
            .trends
            .iter()
            .all(|t| t.direction == TrendDirection::Declining));
    }

    #[test]
    fn test_invalid_configuration_fails_fast() {
        let unknown_criterion = {
            let mut config = configuration(&[(Dimension::TeachingMethod, 1.0)]);
            config.criterion_weights.insert("ghost".into(), 0.5);
            config
        };
        let wrong_scope = WeightConfiguration {
            scope: EvaluateeType::Course,
            ..configuration(&[(Dimension::TeachingMethod, 1.0)])
        };
        let missing_dimension = configuration(&[(Dimension::TeachingContent, 1.0)]);
        let out_of_range = configuration(&[(Dimension::TeachingMethod, 1.5)]);

        for config in [unknown_criterion, wrong_scope, missing_dimension, out_of_range] {
            let fixture = Fixture::new(
                vec![metric("teaching_method", Dimension::TeachingMethod, 1.0)],
                config,
            );
            let err = fixture.run().unwrap_err();
            assert!(err.is_configuration(), "{err}");
        }

        let heavy_metric = Fixture::new(
            vec![metric("teaching_method", Dimension::TeachingMethod, 2.0)],
            configuration(&[(Dimension::TeachingMethod, 1.0)]),
        );
        assert!(heavy_metric.run().unwrap_err().is_configuration());
    }

    #[test]
    fn test_metrics_outside_evaluatee_level_are_ignored() {
        let mut course_only = metric("course_only", Dimension::TeachingContent, 1.0);
        course_only.aggregation = AggregationLevel::Course;
        let result = Fixture::new(
            vec![metric("a", Dimension::TeachingMethod, 1.0), course_only],
            configuration(&[(Dimension::TeachingMethod, 1.0)]),
        )
        .observe("a", &[4.0, 4.0, 4.0, 4.0, 4.0])
        .run()
        .unwrap();
        assert_eq!(result.summary.metric_count, 1);
        assert!(result.is_valid);
    }
}
