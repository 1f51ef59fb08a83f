use crate::calculator::{CalculationInput, Calculator};
use crate::config::EvaluationContext;
use crate::error::{CalculationError, EvaluationError};
use crate::metric::{EvaluateeType, EvaluationMetric, NormalizationMethod, TimeWindow};
use crate::result::OverallEvaluationResult;
use crate::source::{self, ConfigurationSelector, EvaluationSource};
use anyhow::Context;
use database::storage::evaluate_database::EvaluateDatabase;
use futures::future::{self, join_all};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 批量计算的取消标记; 取消后不再派发新的被评对象, 已开始的计算继续完成
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct BatchOutcome {
    /// 与输入顺序一致
    pub results: Vec<OverallEvaluationResult>,
    pub errors: Vec<CalculationError>,
    /// 因取消而没有派发的被评对象
    pub skipped: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub evaluated: usize,
    pub invalid: usize,
    pub failed: usize,
}

pub struct EvaluationManager<S> {
    source: Arc<S>,
    context: Arc<EvaluationContext>,
}

impl<S: EvaluationSource> EvaluationManager<S> {
    pub fn new(source: S, context: EvaluationContext) -> Result<Self, EvaluationError> {
        context.validate()?;
        Ok(Self {
            source: Arc::new(source),
            context: Arc::new(context),
        })
    }

    pub fn context(&self) -> &EvaluationContext {
        &self.context
    }

    pub async fn calculate_overall_evaluation(
        &self,
        evaluatee_id: &str,
        evaluatee_type: EvaluateeType,
        window: TimeWindow,
        configuration_id: Option<&str>,
    ) -> Result<OverallEvaluationResult, EvaluationError> {
        let metrics = self.source.load_metric_definitions(true).await?;
        self.calculate_with_metrics(&metrics, evaluatee_id, evaluatee_type, window, configuration_id)
            .await
    }

    /// 每个被评对象独立计算, 单个失败只记录在 `errors` 中
    pub async fn calculate_batch(
        &self,
        evaluatee_ids: &[String],
        evaluatee_type: EvaluateeType,
        window: TimeWindow,
        configuration_id: Option<&str>,
        cancel: &CancellationFlag,
    ) -> BatchOutcome {
        let metrics = match self.source.load_metric_definitions(true).await {
            Ok(metrics) => metrics,
            Err(err) => {
                warn!(error = %err, "metric definitions unavailable, batch not started");
                return BatchOutcome {
                    errors: evaluatee_ids
                        .iter()
                        .map(|id| CalculationError::new(id.clone(), &err))
                        .collect(),
                    ..Default::default()
                };
            }
        };

        let metrics = &metrics;
        let mut finished: Vec<(usize, Result<OverallEvaluationResult, EvaluationError>)> =
            futures::stream::iter(evaluatee_ids.iter().enumerate())
                .take_while(|_| future::ready(!cancel.is_cancelled()))
                .map(|(index, evaluatee_id)| async move {
                    let result = self
                        .calculate_with_metrics(
                            metrics,
                            evaluatee_id,
                            evaluatee_type,
                            window,
                            configuration_id,
                        )
                        .await;
                    (index, result)
                })
                .buffer_unordered(self.context.batch.concurrency)
                .collect()
                .await;
        finished.sort_by_key(|(index, _)| *index);

        let mut outcome = BatchOutcome::default();
        let mut dispatched = vec![false; evaluatee_ids.len()];
        for (index, result) in finished {
            dispatched[index] = true;
            match result {
                Ok(result) => outcome.results.push(result),
                Err(err) => {
                    warn!(evaluatee_id = %evaluatee_ids[index], error = %err, "evaluation failed");
                    outcome
                        .errors
                        .push(CalculationError::new(evaluatee_ids[index].clone(), &err));
                }
            }
        }
        outcome.skipped = evaluatee_ids
            .iter()
            .zip(dispatched)
            .filter(|(_, dispatched)| !dispatched)
            .map(|(id, _)| id.clone())
            .collect();

        info!(
            results = outcome.results.len(),
            errors = outcome.errors.len(),
            skipped = outcome.skipped.len(),
            "batch evaluation completed"
        );
        outcome
    }

    #[instrument(skip(self, metrics, window, evaluatee_type), fields(evaluatee_type = evaluatee_type.as_str()))]
    async fn calculate_with_metrics(
        &self,
        metrics: &[EvaluationMetric],
        evaluatee_id: &str,
        evaluatee_type: EvaluateeType,
        window: TimeWindow,
        configuration_id: Option<&str>,
    ) -> Result<OverallEvaluationResult, EvaluationError> {
        let configuration = self
            .source
            .load_weight_configuration(ConfigurationSelector {
                id: configuration_id,
                evaluatee_id,
                evaluatee_type,
            })
            .await?;
        let calculator = Calculator::new(&self.context);
        let applicable = calculator.validate(metrics, &configuration, evaluatee_type)?;

        // 并发拉取各指标的观测与总体
        let fetches = applicable.iter().map(|metric| {
            let source = &self.source;
            let (window, calculator) = (&window, &calculator);
            async move {
                let points = source
                    .fetch_raw_metric_data(evaluatee_id, evaluatee_type, &metric.id, window)
                    .await?;
                // 同类对象按同一计算方法归约后才与自身取值可比
                let population: Vec<f64> = if metric.normalization == NormalizationMethod::MinMax {
                    Vec::new()
                } else {
                    source
                        .fetch_population(evaluatee_type, &metric.id, window)
                        .await?
                        .iter()
                        .filter_map(|peer| calculator.peer_value(metric, peer))
                        .collect()
                };
                Ok::<_, EvaluationError>((metric.id.clone(), points, population))
            }
        });
        let mut observations = HashMap::new();
        let mut populations = HashMap::new();
        for fetched in join_all(fetches).await {
            let (metric_id, points, population) = fetched?;
            populations.insert(metric_id.clone(), population);
            observations.insert(metric_id, points);
        }
        let baseline = self
            .source
            .fetch_baseline(evaluatee_id, evaluatee_type, &window)
            .await?;

        calculator.calculate(&CalculationInput {
            evaluatee_id,
            evaluatee_type,
            window,
            metrics,
            configuration: &configuration,
            observations: &observations,
            populations: &populations,
            baseline: baseline.as_ref(),
        })
    }
}

impl EvaluationManager<EvaluateDatabase> {
    /// 计算所有教师与课程并保存结果, 取消后剩余对象不再计算
    pub async fn run(
        &self,
        window: TimeWindow,
        cancel: &CancellationFlag,
    ) -> anyhow::Result<RunSummary> {
        let metrics = self.source.load_metric_definitions(true).await?;
        let stg = &self.source;
        let teacher_stream = stg.get_teacher_stream().await?;

        let evaluated = AtomicUsize::new(0);
        let invalid = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let save = |result: OverallEvaluationResult| {
            let (evaluated, invalid) = (&evaluated, &invalid);
            async move {
                stg.insert_result(source::to_active_model(&result)?)
                    .await
                    .with_context(|| format!("Failed to save result of {}", result.evaluatee_id))?;
                evaluated.fetch_add(1, Ordering::Relaxed);
                if !result.is_valid {
                    invalid.fetch_add(1, Ordering::Relaxed);
                }
                Ok::<_, anyhow::Error>(())
            }
        };

        teacher_stream
            .map_err(anyhow::Error::from)
            .try_for_each_concurrent(self.context.batch.concurrency, |teacher| {
                let (metrics, save, failed) = (&metrics, &save, &failed);
                async move {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    let result = match self
                        .calculate_with_metrics(
                            metrics,
                            &teacher.id,
                            EvaluateeType::Teacher,
                            window,
                            None,
                        )
                        .await
                    {
                        Ok(result) => result,
                        Err(err) => {
                            warn!(teacher_id = %teacher.id, error = %err, "evaluation failed");
                            failed.fetch_add(1, Ordering::Relaxed);
                            return Ok(());
                        }
                    };
                    info!(
                        "Teacher {} ({}) evaluation completed - Scores: overall= {:?}, level= {:?}, confidence= {:.2}, valid= {}",
                        teacher.id,
                        teacher.name,
                        result.overall_score,
                        result.overall_level.map(|l| l.label()),
                        result.confidence,
                        result.is_valid,
                    );
                    save(result).await
                }
            })
            .await?;

        let course_ids = stg.get_course_ids().await?;
        let outcome = self
            .calculate_batch(&course_ids, EvaluateeType::Course, window, None, cancel)
            .await;
        failed.fetch_add(outcome.errors.len(), Ordering::Relaxed);
        for result in outcome.results {
            save(result).await?;
        }

        let summary = RunSummary {
            evaluated: evaluated.load(Ordering::Relaxed),
            invalid: invalid.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
        };
        info!(
            evaluated = summary.evaluated,
            invalid = summary.invalid,
            failed = summary.failed,
            "evaluation run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{
        AggregationLevel, CalculationMethod, DataSource, Dimension, RawDataPoint, RawValue,
        ScoreRange, WeightConfiguration, WeightingStrategy,
    };
    use crate::result::Baseline;
    use crate::source::memory::MemorySource;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn window() -> TimeWindow {
        let end = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        TimeWindow::last_days(end, 180)
    }

    fn metric(id: &str, dimension: Dimension) -> EvaluationMetric {
        EvaluationMetric {
            id: id.to_owned(),
            name: id.to_owned(),
            dimension,
            calculation: CalculationMethod::Average,
            normalization: NormalizationMethod::MinMax,
            aggregation: AggregationLevel::All,
            range: ScoreRange { min: 1.0, max: 5.0 },
            weight: 0.5,
            enabled: true,
            min_sample_size: None,
        }
    }

    fn points(metric_id: &str, values: &[f64]) -> Vec<RawDataPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| RawDataPoint {
                metric_id: metric_id.to_owned(),
                value: RawValue::Numeric(*v),
                source: DataSource::StudentEvaluation,
                timestamp: window().start + Duration::days(i as i64 + 1),
                quality: 1.0,
            })
            .collect()
    }

    fn source(evaluatees: &[String]) -> MemorySource {
        let mut source = MemorySource {
            metrics: vec![
                metric("method", Dimension::TeachingMethod),
                metric("content", Dimension::TeachingContent),
            ],
            configurations: vec![WeightConfiguration {
                id: "teacher-default".into(),
                name: "教师默认方案".into(),
                strategy: WeightingStrategy::ExpertJudgment,
                scope: EvaluateeType::Teacher,
                is_default: true,
                dimension_weights: BTreeMap::from([
                    (Dimension::TeachingMethod, 0.5),
                    (Dimension::TeachingContent, 0.5),
                ]),
                criterion_weights: BTreeMap::new(),
            }],
            ..Default::default()
        };
        for id in evaluatees {
            source.observe(id, points("method", &[4.0, 4.0, 5.0, 4.0, 5.0]));
            source.observe(id, points("content", &[3.0, 4.0, 3.0, 4.0, 3.0]));
        }
        source
    }

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("T{i:03}")).collect()
    }

    #[tokio::test]
    async fn test_single_evaluation() {
        let manager =
            EvaluationManager::new(source(&ids(1)), EvaluationContext::default()).unwrap();
        let result = manager
            .calculate_overall_evaluation("T001", EvaluateeType::Teacher, window(), None)
            .await
            .unwrap();
        assert_eq!(result.configuration_id, "teacher-default");
        assert_eq!(result.dimensions.len(), 2);
        assert!(result.is_valid);
        assert_eq!(result.summary.total_samples, 10);
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let evaluatees = ids(10);
        let mut source = source(&evaluatees);
        source.unconfigured.insert("T004".into());
        let manager = EvaluationManager::new(source, EvaluationContext::default()).unwrap();

        let outcome = manager
            .calculate_batch(
                &evaluatees,
                EvaluateeType::Teacher,
                window(),
                None,
                &CancellationFlag::new(),
            )
            .await;

        assert_eq!(outcome.results.len(), 9);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].evaluatee_id, "T004");
        assert!(outcome.skipped.is_empty());
        assert!(outcome.results.iter().all(|r| r.evaluatee_id != "T004"));
        assert_eq!(outcome.results[0].evaluatee_id, "T001");
        assert_eq!(outcome.results[8].evaluatee_id, "T010");
    }

    #[tokio::test]
    async fn test_cancelled_batch_dispatches_nothing_new() {
        let evaluatees = ids(3);
        let manager =
            EvaluationManager::new(source(&evaluatees), EvaluationContext::default()).unwrap();
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let outcome = manager
            .calculate_batch(&evaluatees, EvaluateeType::Teacher, window(), None, &cancel)
            .await;
        assert!(outcome.results.is_empty());
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.skipped, evaluatees);
    }

    #[tokio::test]
    async fn test_unknown_configuration_id_is_reported() {
        let evaluatees = ids(2);
        let manager =
            EvaluationManager::new(source(&evaluatees), EvaluationContext::default()).unwrap();
        let outcome = manager
            .calculate_batch(
                &evaluatees,
                EvaluateeType::Teacher,
                window(),
                Some("missing"),
                &CancellationFlag::new(),
            )
            .await;
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome
            .errors
            .iter()
            .all(|e| e.kind == crate::error::ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_baseline_and_population_are_used() {
        let mut source = source(&ids(1));
        source.metrics[1].normalization = NormalizationMethod::ZScore;
        source.observe("T002", points("content", &[2.0; 5]));
        source.observe("T003", points("content", &[5.0; 5]));
        source.baselines.insert(
            "T001".into(),
            Baseline {
                window_end: window().start,
                overall_score: Some(2.0),
                dimension_scores: BTreeMap::new(),
            },
        );
        let manager = EvaluationManager::new(source, EvaluationContext::default()).unwrap();
        let result = manager
            .calculate_overall_evaluation("T001", EvaluateeType::Teacher, window(), None)
            .await
            .unwrap();

        assert!(result.data_quality.is_empty());
        assert_eq!(result.insights.trends.len(), 1);
        assert!(result.insights.trends[0].change > 0.0);
    }

    #[tokio::test]
    async fn test_population_is_reduced_like_the_evaluatee() {
        let mut visits = metric("visits", Dimension::TeachingMethod);
        visits.calculation = CalculationMethod::Count;
        visits.normalization = NormalizationMethod::ZScore;
        let mut source = MemorySource {
            metrics: vec![visits],
            ..source(&[])
        };
        source.observe("T001", points("visits", &[4.0; 5]));
        source.observe("T002", points("visits", &[4.0; 3]));
        source.observe("T003", points("visits", &[4.0; 4]));
        let manager = EvaluationManager::new(source, EvaluationContext::default()).unwrap();

        let result = manager
            .calculate_overall_evaluation("T001", EvaluateeType::Teacher, window(), None)
            .await
            .unwrap();
        let metric = &result.dimensions[0].metrics[0];
        // 同类计数 [5, 3, 4]: 均值 4, 标准差 sqrt(2/3)
        assert_eq!(metric.raw_value, Some(5.0));
        let expected = 1.0 / (2.0_f64 / 3.0).sqrt();
        assert!((metric.normalized_value.unwrap() - expected).abs() < 1e-9);
        assert!(result.data_quality.is_empty());
    }

    /// 第 `after` 次加载权重配置时触发取消
    struct CancellingSource {
        inner: MemorySource,
        cancel: CancellationFlag,
        after: usize,
        loads: AtomicUsize,
    }

    #[async_trait]
    impl EvaluationSource for CancellingSource {
        async fn fetch_raw_metric_data(
            &self,
            evaluatee_id: &str,
            evaluatee_type: EvaluateeType,
            metric_id: &str,
            window: &TimeWindow,
        ) -> Result<Vec<RawDataPoint>, EvaluationError> {
            self.inner
                .fetch_raw_metric_data(evaluatee_id, evaluatee_type, metric_id, window)
                .await
        }

        async fn load_weight_configuration(
            &self,
            selector: ConfigurationSelector<'_>,
        ) -> Result<WeightConfiguration, EvaluationError> {
            if self.loads.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                self.cancel.cancel();
            }
            self.inner.load_weight_configuration(selector).await
        }

        async fn load_metric_definitions(
            &self,
            enabled_only: bool,
        ) -> Result<Vec<EvaluationMetric>, EvaluationError> {
            self.inner.load_metric_definitions(enabled_only).await
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_finishes_in_flight_work() {
        let evaluatees = ids(5);
        let cancel = CancellationFlag::new();
        let source = CancellingSource {
            inner: source(&evaluatees),
            cancel: cancel.clone(),
            after: 2,
            loads: AtomicUsize::new(0),
        };
        let mut context = EvaluationContext::default();
        context.batch.concurrency = 1;
        let manager = EvaluationManager::new(source, context).unwrap();

        let outcome = manager
            .calculate_batch(&evaluatees, EvaluateeType::Teacher, window(), None, &cancel)
            .await;
        // T002 在计算过程中收到取消, 仍然完成
        let finished: Vec<&str> = outcome
            .results
            .iter()
            .map(|r| r.evaluatee_id.as_str())
            .collect();
        assert_eq!(finished, vec!["T001", "T002"]);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.skipped, evaluatees[2..].to_vec());
    }

    #[test]
    fn test_invalid_context_is_rejected() {
        let mut context = EvaluationContext::default();
        context.batch.concurrency = 0;
        assert!(EvaluationManager::new(MemorySource::default(), context).is_err());
    }
}
