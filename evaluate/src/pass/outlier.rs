use serde::{Deserialize, Serialize};

use crate::stats;

/// 少于这个样本量时不做异常值检测
pub const MIN_SAMPLES_FOR_DETECTION: usize = 4;

/// 修正 z 分数中 MAD 到标准差的换算系数
const MAD_SCALE: f64 = 0.6745;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    /// Q1 - k·IQR 到 Q3 + k·IQR 的四分位距栅栏
    Iqr,
    ZScore,
    /// 以中位数为中心, MAD 为尺度的孤立度阈值
    Isolation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierAction {
    Remove,
    /// 截断到最近的栅栏
    Adjust,
    /// 只计数, 不改变数值
    Flag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierPolicy {
    pub enabled: bool,
    pub method: OutlierMethod,
    pub action: OutlierAction,
    pub iqr_multiplier: f64,
    pub z_threshold: f64,
    pub isolation_threshold: f64,
}

impl Default for OutlierPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            method: OutlierMethod::Iqr,
            action: OutlierAction::Adjust,
            iqr_multiplier: 1.5,
            z_threshold: 3.0,
            isolation_threshold: 3.5,
        }
    }
}

/// 一个数值化后的样本, `quality` 为原始观测的质量分
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub quality: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutlierOutcome {
    pub samples: Vec<Sample>,
    pub flagged: usize,
    pub removed: usize,
    pub adjusted: usize,
}

impl OutlierPolicy {
    pub fn validate(&self) -> Result<(), String> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(format!("outlier.{name} must be a positive number, got {value}"))
            }
        };
        positive("iqr_multiplier", self.iqr_multiplier)?;
        positive("z_threshold", self.z_threshold)?;
        positive("isolation_threshold", self.isolation_threshold)
    }

    /// 用全部样本的栅栏检测, 截断时使用未被标记样本重新计算的栅栏
    pub fn apply(&self, samples: Vec<Sample>) -> OutlierOutcome {
        if !self.enabled || samples.len() < MIN_SAMPLES_FOR_DETECTION {
            return OutlierOutcome {
                samples,
                ..Default::default()
            };
        }

        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let Some((lower, upper)) = self.fences(&values) else {
            return OutlierOutcome {
                samples,
                ..Default::default()
            };
        };
        let is_outlier = |value: f64| value < lower || value > upper;

        let retained: Vec<f64> = values.iter().copied().filter(|v| !is_outlier(*v)).collect();
        let (cap_lower, cap_upper) = self.fences(&retained).unwrap_or((lower, upper));

        let mut outcome = OutlierOutcome::default();
        for sample in samples {
            if !is_outlier(sample.value) {
                outcome.samples.push(sample);
                continue;
            }

            outcome.flagged += 1;
            match self.action {
                OutlierAction::Remove => outcome.removed += 1,
                OutlierAction::Adjust => {
                    outcome.adjusted += 1;
                    outcome.samples.push(Sample {
                        value: sample.value.clamp(cap_lower, cap_upper),
                        ..sample
                    });
                }
                OutlierAction::Flag => outcome.samples.push(sample),
            }
        }
        outcome
    }

    fn fences(&self, values: &[f64]) -> Option<(f64, f64)> {
        match self.method {
            OutlierMethod::Iqr => self.iqr_fences(values),
            OutlierMethod::ZScore => self.z_score_fences(values),
            OutlierMethod::Isolation => self.isolation_fences(values),
        }
    }

    fn iqr_fences(&self, values: &[f64]) -> Option<(f64, f64)> {
        let (q1, q3) = stats::quartiles(values)?;
        let reach = self.iqr_multiplier * (q3 - q1);
        Some((q1 - reach, q3 + reach))
    }

    fn z_score_fences(&self, values: &[f64]) -> Option<(f64, f64)> {
        let mean = stats::mean(values)?;
        let std_dev = stats::population_std_dev(values)?;
        if stats::negligible_spread(values, std_dev, mean) {
            return None;
        }
        let reach = self.z_threshold * std_dev;
        Some((mean - reach, mean + reach))
    }

    fn isolation_fences(&self, values: &[f64]) -> Option<(f64, f64)> {
        let median = stats::median(values)?;
        let mad = stats::median_absolute_deviation(values)?;
        if stats::negligible_spread(values, mad, median) {
            return None;
        }
        let reach = self.isolation_threshold * mad / MAD_SCALE;
        Some((median - reach, median + reach))
    }
}
