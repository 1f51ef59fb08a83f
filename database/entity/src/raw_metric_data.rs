use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "raw_metric_data")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub evaluatee_id: String,
    pub evaluatee_type: String,
    pub metric_id: String,
    pub source: String,
    // 三者只有一个非空
    pub value_numeric: Option<f64>,
    pub value_text: Option<String>,
    pub value_bool: Option<bool>,
    pub quality_score: f64,
    pub observed_at: DateTime,
    pub external_ref: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
