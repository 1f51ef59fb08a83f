use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "evaluation_metrics")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub dimension: String,
    pub calculation: Json, // 带 `method` 标签的计算方法
    pub normalization: String,
    pub aggregation: String,
    pub range_min: f64,
    pub range_max: f64,
    pub weight: f64,
    pub min_sample_size: Option<i32>,
    pub enabled: bool,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
