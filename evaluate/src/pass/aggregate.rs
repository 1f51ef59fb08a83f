/// 参与加权聚合的一项; `value` 为 None 表示没有有效数据
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weighted {
    pub value: Option<f64>,
    pub weight: f64,
}

impl Weighted {
    pub fn new(value: Option<f64>, weight: f64) -> Self {
        Self { value, weight }
    }
}

/// Σ(value × weight) / Σ(weight)
///
/// 没有数据的项同时从分子和分母中剔除, 不按零分计算.
/// 权重因此不需要预先归一到 1. 没有可用项或权重和为 0 时返回 None.
pub fn weighted_score(items: &[Weighted]) -> Option<f64> {
    let (numerator, denominator) = items
        .iter()
        .filter_map(|item| item.value.map(|value| (value, item.weight)))
        .fold((0.0, 0.0), |(num, den), (value, weight)| {
            (num + value * weight, den + weight)
        });
    (denominator > 0.0).then(|| numerator / denominator)
}

/// 各有效项在分母中的占比, 无数据的项占比为 0
pub fn weight_shares(items: &[Weighted]) -> Vec<f64> {
    let total: f64 = items
        .iter()
        .filter(|item| item.value.is_some())
        .map(|item| item.weight)
        .sum();
    items
        .iter()
        .map(|item| match item.value {
            Some(_) if total > 0.0 => item.weight / total,
            _ => 0.0,
        })
        .collect()
}
