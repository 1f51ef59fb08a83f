use serde::{Deserialize, Serialize};

/// 评价等级, 声明顺序即高低顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationLevel {
    Poor,
    Average,
    Good,
    Excellent,
}

impl EvaluationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationLevel::Excellent => "excellent",
            EvaluationLevel::Good => "good",
            EvaluationLevel::Average => "average",
            EvaluationLevel::Poor => "poor",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EvaluationLevel::Excellent => "优秀",
            EvaluationLevel::Good => "良好",
            EvaluationLevel::Average => "中等",
            EvaluationLevel::Poor => "较差",
        }
    }
}

/// 等级下限(含), 指标, 维度, 总体三级共用同一张表
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelThresholds {
    pub excellent: f64,
    pub good: f64,
    pub average: f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            excellent: 4.5,
            good: 3.5,
            average: 2.5,
        }
    }
}

impl LevelThresholds {
    pub fn validate(&self) -> Result<(), String> {
        let all_finite = [self.excellent, self.good, self.average]
            .iter()
            .all(|t| t.is_finite());
        if !all_finite || self.excellent < self.good || self.good < self.average {
            return Err(format!(
                "level thresholds must be finite and descending, got excellent={} good={} average={}",
                self.excellent, self.good, self.average
            ));
        }
        Ok(())
    }

    /// 将分数转换为等级
    pub fn classify(&self, score: f64) -> EvaluationLevel {
        match score {
            s if s >= self.excellent => EvaluationLevel::Excellent,
            s if s >= self.good => EvaluationLevel::Good,
            s if s >= self.average => EvaluationLevel::Average,
            _ => EvaluationLevel::Poor,
        }
    }

    /// 达到该等级所需的最低分
    pub fn floor(&self, level: EvaluationLevel) -> Option<f64> {
        match level {
            EvaluationLevel::Excellent => Some(self.excellent),
            EvaluationLevel::Good => Some(self.good),
            EvaluationLevel::Average => Some(self.average),
            EvaluationLevel::Poor => None,
        }
    }
}
