//! 计算过程中用到的描述统计. 空输入一律返回 None.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// `samples` 为 (值, 权重) 对, 权重和为 0 时返回 None
pub fn weighted_mean(samples: &[(f64, f64)]) -> Option<f64> {
    let total_weight: f64 = samples.iter().map(|(_, w)| *w).sum();
    if total_weight <= 0.0 {
        return None;
    }
    Some(samples.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight)
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

/// 线性插值分位数, `p` 取 0-100
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let sorted = sorted(values);
    quantile_sorted(&sorted, p / 100.0)
}

/// `sorted` 必须已升序排列, `q` 取 0-1
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// 总体标准差
pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// 离散度相对数据量级可以忽略: 取值全部相同, 或只剩浮点累加误差
pub fn negligible_spread(values: &[f64], spread: f64, center: f64) -> bool {
    values.windows(2).all(|pair| pair[0] == pair[1])
        || !spread.is_finite()
        || spread <= f64::EPSILON * center.abs().max(1.0) * 8.0
}

/// (Q1, Q3)
pub fn quartiles(values: &[f64]) -> Option<(f64, f64)> {
    let sorted = sorted(values);
    Some((quantile_sorted(&sorted, 0.25)?, quantile_sorted(&sorted, 0.75)?))
}

pub fn median_absolute_deviation(values: &[f64]) -> Option<f64> {
    let median = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
    self::median(&deviations)
}

/// 标准正态分布函数, erf 使用 Abramowitz-Stegun 7.1.26 近似
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;
    const P: f64 = 0.327_591_1;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(mean(&[]), None);
        assert_eq!(median(&[]), None);
        assert_eq!(population_std_dev(&[]), None);
        assert_eq!(quartiles(&[]), None);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [5.0, 3.0, 4.0, 4.0];
        assert_eq!(quartiles(&values), Some((3.75, 4.25)));
        assert_eq!(median(&values), Some(4.0));
        assert_eq!(percentile(&values, 100.0), Some(5.0));
        assert_eq!(percentile(&[7.0], 30.0), Some(7.0));
    }

    #[test]
    fn test_std_dev_and_mad() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(population_std_dev(&values), Some(2.0));
        assert_eq!(median_absolute_deviation(&values), Some(0.5));
    }

    #[test]
    fn test_weighted_mean_needs_positive_weight() {
        assert_eq!(weighted_mean(&[(1.0, 1.0), (3.0, 3.0)]), Some(2.5));
        assert_eq!(weighted_mean(&[(1.0, 0.0)]), None);
    }

    #[test]
    fn test_negligible_spread() {
        let constant = [3.8, 3.8, 3.8];
        let noise = population_std_dev(&constant).unwrap();
        assert!(negligible_spread(&constant, noise, 3.8));
        assert!(negligible_spread(&[1e6, 1e6 + 1e-10], 5e-11, 1e6));
        assert!(!negligible_spread(&[1.0, 2.0], 0.5, 1.5));
    }

    #[test]
    fn test_normal_cdf() {
        assert!(approx(normal_cdf(0.0), 0.5));
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-4);
        assert!(approx(normal_cdf(-1.0) + normal_cdf(1.0), 1.0));
    }
}
