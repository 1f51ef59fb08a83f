use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::level::LevelThresholds;
use crate::metric::Dimension;
use crate::result::{
    Baseline, CalculationResult, DimensionResult, Insights, TrendDirection, TrendInsight,
};

/// 文案模板, 支持 `{dimension}` `{score}` `{target}` `{gap}` 占位符
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightTemplate {
    pub strength: String,
    pub weakness: String,
    pub recommendation: String,
}

/// 按维度覆盖内置模板, 未配置的维度使用内置文案
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct InsightTemplates {
    overrides: BTreeMap<Dimension, InsightTemplate>,
}

impl InsightTemplates {
    pub fn with_override(mut self, dimension: Dimension, template: InsightTemplate) -> Self {
        self.overrides.insert(dimension, template);
        self
    }

    pub fn template(&self, dimension: Dimension) -> InsightTemplate {
        self.overrides
            .get(&dimension)
            .cloned()
            .unwrap_or_else(|| default_template(dimension))
    }
}

fn default_template(dimension: Dimension) -> InsightTemplate {
    let recommendation = match dimension {
        Dimension::TeachingAttitude => "加强课前准备与课后答疑, {dimension}需提升 {gap} 分以达到 {target} 分",
        Dimension::TeachingContent => "更新课程内容并结合行业案例, {dimension}需提升 {gap} 分以达到 {target} 分",
        Dimension::TeachingMethod => "尝试项目式与混合式教学, {dimension}需提升 {gap} 分以达到 {target} 分",
        Dimension::TeachingEffectiveness => "加强过程性考核与学习反馈, {dimension}需提升 {gap} 分以达到 {target} 分",
        Dimension::ClassroomManagement => "明确课堂规范并关注考勤, {dimension}需提升 {gap} 分以达到 {target} 分",
        Dimension::StudentEngagement => "增加课堂互动与小组任务, {dimension}需提升 {gap} 分以达到 {target} 分",
        Dimension::ProfessionalDevelopment => "参加教研活动与专业培训, {dimension}需提升 {gap} 分以达到 {target} 分",
    };
    InsightTemplate {
        strength: "{dimension}表现突出, 得分 {score}".to_owned(),
        weakness: "{dimension}有待改进, 得分 {score}".to_owned(),
        recommendation: recommendation.to_owned(),
    }
}

fn render(text: &str, dimension: Dimension, score: f64, target: f64) -> String {
    text.replace("{dimension}", dimension.label())
        .replace("{score}", &format!("{score:.2}"))
        .replace("{target}", &format!("{target:.2}"))
        .replace("{gap}", &format!("{:.2}", (target - score).max(0.0)))
}

/// 达到"良好"线的维度记为优势; 低于"中等"线的维度记为待改进并给出建议
pub fn generate(
    dimensions: &[DimensionResult],
    thresholds: &LevelThresholds,
    templates: &InsightTemplates,
) -> Insights {
    let mut insights = Insights::default();
    for dimension in dimensions {
        let Some(score) = dimension.score else {
            continue;
        };
        let template = templates.template(dimension.dimension);
        let target = thresholds.good;
        if score >= thresholds.good {
            insights
                .strengths
                .push(render(&template.strength, dimension.dimension, score, target));
        } else if score < thresholds.average {
            insights
                .improvement_areas
                .push(render(&template.weakness, dimension.dimension, score, target));
            insights.recommendations.push(render(
                &template.recommendation,
                dimension.dimension,
                score,
                target,
            ));
        }
    }
    insights
}

/// 维度内表现好与差的指标
pub fn metric_highlights(
    metrics: &[CalculationResult],
    thresholds: &LevelThresholds,
) -> (Vec<String>, Vec<String>) {
    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();
    for metric in metrics {
        let Some(score) = metric.final_score else {
            continue;
        };
        let text = format!("{}（{:.2}）", metric.metric_name, score);
        if score >= thresholds.good {
            strengths.push(text);
        } else if score < thresholds.average {
            weaknesses.push(text);
        }
    }
    (strengths, weaknesses)
}

/// 与历史基线比较, 变化幅度不超过 `tolerance` 视为持平
pub fn trends(
    overall_score: Option<f64>,
    dimensions: &[DimensionResult],
    baseline: Option<&Baseline>,
    tolerance: f64,
) -> Vec<TrendInsight> {
    let Some(baseline) = baseline else {
        return Vec::new();
    };

    let compare = |dimension: Option<Dimension>, previous: f64, current: f64| {
        let change = current - previous;
        let direction = if change.abs() <= tolerance {
            TrendDirection::Stable
        } else if change > 0.0 {
            TrendDirection::Improving
        } else {
            TrendDirection::Declining
        };
        TrendInsight {
            dimension,
            previous,
            current,
            change,
            direction,
        }
    };

    let mut trends = Vec::new();
    if let (Some(previous), Some(current)) = (baseline.overall_score, overall_score) {
        trends.push(compare(None, previous, current));
    }
    for dimension in dimensions {
        let previous = baseline.dimension_scores.get(&dimension.dimension);
        if let (Some(previous), Some(current)) = (previous, dimension.score) {
            trends.push(compare(Some(dimension.dimension), *previous, current));
        }
    }
    trends
}
