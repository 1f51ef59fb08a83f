use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "evaluation_results")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub evaluatee_id: String,
    pub evaluatee_type: String,
    pub configuration_id: String,
    pub window_start: DateTime,
    pub window_end: DateTime,
    pub overall_score: Option<f64>,
    pub overall_level: Option<String>,
    pub confidence: f64,
    pub is_valid: bool,
    pub dimension_scores: Json, // {"teaching_method": 4.2, ...}, 用作趋势基线
    pub payload: Json,
    pub calculated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
