use crate::metric::{NormalizationMethod, ScoreRange};
use crate::stats;

/// 归一化结果
///
/// `value` 是方法本身的输出(min-max 为 0-1, z-score/robust 为标准化后的偏离量),
/// `unit` 是映射到 0-1 后参与加权聚合的值.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub value: f64,
    pub unit: f64,
    /// 总体样本不足或离散度为零, 此时 `value` 为中性值 0
    pub degenerate: bool,
}

impl Normalization {
    fn neutral() -> Self {
        Self {
            value: 0.0,
            unit: stats::normal_cdf(0.0),
            degenerate: true,
        }
    }

    fn standardized(value: f64) -> Self {
        Self {
            value,
            unit: stats::normal_cdf(value),
            degenerate: false,
        }
    }
}

/// `population` 只在 z-score 与 robust 方法中使用, 是同类被评对象的取值
pub fn normalize(
    method: NormalizationMethod,
    value: f64,
    range: &ScoreRange,
    population: &[f64],
) -> Normalization {
    match method {
        NormalizationMethod::MinMax => {
            let unit = min_max(value, range);
            Normalization {
                value: unit,
                unit,
                degenerate: false,
            }
        }
        NormalizationMethod::ZScore => z_score(value, population)
            .map(Normalization::standardized)
            .unwrap_or_else(Normalization::neutral),
        NormalizationMethod::Robust => robust(value, population)
            .map(Normalization::standardized)
            .unwrap_or_else(Normalization::neutral),
    }
}

/// 超出声明范围的值被截断而不是外推; 范围退化时返回 0
pub fn min_max(value: f64, range: &ScoreRange) -> f64 {
    let span = range.max - range.min;
    if span <= 0.0 {
        return 0.0;
    }
    ((value - range.min) / span).clamp(0.0, 1.0)
}

pub fn z_score(value: f64, population: &[f64]) -> Option<f64> {
    if population.len() < 2 {
        return None;
    }
    let mean = stats::mean(population)?;
    let std_dev = stats::population_std_dev(population)?;
    if stats::negligible_spread(population, std_dev, mean) {
        return None;
    }
    Some((value - mean) / std_dev)
}

pub fn robust(value: f64, population: &[f64]) -> Option<f64> {
    if population.len() < 2 {
        return None;
    }
    let median = stats::median(population)?;
    let (q1, q3) = stats::quartiles(population)?;
    let iqr = q3 - q1;
    if stats::negligible_spread(population, iqr, median) {
        return None;
    }
    Some((value - median) / iqr)
}

/// 样本量低于最小要求时置信度线性降低, 0 个样本为 0
pub fn sample_confidence(sample_size: usize, min_sample_size: usize) -> f64 {
    if min_sample_size == 0 {
        return 1.0;
    }
    (sample_size as f64 / min_sample_size as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIKERT: ScoreRange = ScoreRange { min: 1.0, max: 5.0 };

    #[test]
    fn test_min_max_is_clamped() {
        assert_eq!(min_max(3.0, &LIKERT), 0.5);
        assert_eq!(min_max(50.0, &LIKERT), 1.0);
        assert_eq!(min_max(-2.0, &LIKERT), 0.0);
        for value in [-10.0, 0.0, 1.0, 2.7, 5.0, 1e9] {
            let unit = min_max(value, &LIKERT);
            assert!((0.0..=1.0).contains(&unit));
        }
    }

    #[test]
    fn test_min_max_fails_closed_on_empty_range() {
        let flat = ScoreRange { min: 3.0, max: 3.0 };
        assert_eq!(min_max(3.0, &flat), 0.0);
        assert_eq!(min_max(4.0, &flat), 0.0);
    }

    #[test]
    fn test_z_score() {
        let population = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(z_score(9.0, &population), Some(2.0));
        assert_eq!(z_score(9.0, &[3.0]), None);
        assert_eq!(z_score(9.0, &[3.0, 3.0, 3.0]), None);
    }

    #[test]
    fn test_robust() {
        let population = [3.0, 4.0, 4.0, 5.0];
        assert_eq!(robust(4.5, &population), Some(1.0));
        assert_eq!(robust(4.5, &[4.0, 4.0, 4.0]), None);
    }

    #[test]
    fn test_rounding_noise_is_not_spread() {
        // 3.8 的累加会留下约 4e-16 的标准差
        assert_eq!(z_score(4.0, &[3.8, 3.8, 3.8]), None);
        assert_eq!(robust(4.0, &[3.8, 3.8, 3.8, 3.8]), None);
        let result = normalize(NormalizationMethod::ZScore, 4.0, &LIKERT, &[3.8, 3.8, 3.8]);
        assert!(result.degenerate);
        assert_eq!(result.value, 0.0);
        // 真实但很小的离散度仍然有效
        assert!(z_score(4.0, &[3.8, 3.8, 3.81]).is_some());
    }

    #[test]
    fn test_degenerate_population_is_neutral() {
        let result = normalize(NormalizationMethod::ZScore, 4.0, &LIKERT, &[4.0, 4.0]);
        assert!(result.degenerate);
        assert_eq!(result.value, 0.0);
        assert!((result.unit - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_standardized_values_map_into_unit_interval() {
        let population = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let above = normalize(NormalizationMethod::ZScore, 9.0, &LIKERT, &population);
        let below = normalize(NormalizationMethod::ZScore, 1.0, &LIKERT, &population);
        assert!(!above.degenerate);
        assert!(above.unit > 0.95 && above.unit < 1.0);
        assert!(below.unit < 0.05 && below.unit > 0.0);
    }

    #[test]
    fn test_sample_confidence() {
        assert_eq!(sample_confidence(0, 5), 0.0);
        assert_eq!(sample_confidence(2, 5), 0.4);
        assert_eq!(sample_confidence(8, 5), 1.0);
        assert_eq!(sample_confidence(0, 0), 1.0);
    }
}
