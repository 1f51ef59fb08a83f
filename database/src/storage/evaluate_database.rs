use chrono::NaiveDateTime;
use entity::{course, evaluation_metric, evaluation_result, raw_metric_data, teacher, weight_configuration};
use futures::Stream;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct EvaluateDatabase {
    pub connection: Arc<DatabaseConnection>,
}

impl EvaluateDatabase {
    /// 获取底层连接
    pub fn get_connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        EvaluateDatabase { connection }
    }

    /// 获取指标定义, `enabled_only` 为真时只返回启用的指标
    pub async fn get_metric_definitions(
        &self,
        enabled_only: bool,
    ) -> Result<Vec<evaluation_metric::Model>, DbErr> {
        let mut query = evaluation_metric::Entity::find();
        if enabled_only {
            query = query.filter(evaluation_metric::Column::Enabled.eq(true));
        }
        query
            .order_by_asc(evaluation_metric::Column::Id)
            .all(self.get_connection())
            .await
    }

    pub async fn get_weight_configuration(
        &self,
        id: &str,
    ) -> Result<Option<weight_configuration::Model>, DbErr> {
        weight_configuration::Entity::find_by_id(id.to_owned())
            .one(self.get_connection())
            .await
    }

    /// 某个作用域下所有标记为默认的权重配置, 正常情况下只有一条
    pub async fn get_default_configurations(
        &self,
        scope: &str,
    ) -> Result<Vec<weight_configuration::Model>, DbErr> {
        weight_configuration::Entity::find()
            .filter(weight_configuration::Column::Scope.eq(scope))
            .filter(weight_configuration::Column::IsDefault.eq(true))
            .order_by_asc(weight_configuration::Column::Id)
            .all(self.get_connection())
            .await
    }

    /// 某个被评对象在时间窗口 [start, end) 内某个指标的全部观测
    pub async fn get_raw_metric_data(
        &self,
        evaluatee_id: &str,
        evaluatee_type: &str,
        metric_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<raw_metric_data::Model>, DbErr> {
        let rows = raw_metric_data::Entity::find()
            .filter(raw_metric_data::Column::EvaluateeId.eq(evaluatee_id))
            .filter(raw_metric_data::Column::EvaluateeType.eq(evaluatee_type))
            .filter(raw_metric_data::Column::MetricId.eq(metric_id))
            .filter(raw_metric_data::Column::ObservedAt.gte(start))
            .filter(raw_metric_data::Column::ObservedAt.lt(end))
            .order_by_asc(raw_metric_data::Column::ObservedAt)
            .all(self.get_connection())
            .await?;
        debug!(evaluatee_id, metric_id, rows = rows.len(), "raw metric data fetched");
        Ok(rows)
    }

    /// 同类被评对象在窗口 [start, end) 内某个指标的全部观测, 按被评对象分组排列
    pub async fn get_population_samples(
        &self,
        evaluatee_type: &str,
        metric_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<raw_metric_data::Model>, DbErr> {
        let rows = raw_metric_data::Entity::find()
            .filter(raw_metric_data::Column::EvaluateeType.eq(evaluatee_type))
            .filter(raw_metric_data::Column::MetricId.eq(metric_id))
            .filter(raw_metric_data::Column::ObservedAt.gte(start))
            .filter(raw_metric_data::Column::ObservedAt.lt(end))
            .order_by_asc(raw_metric_data::Column::EvaluateeId)
            .order_by_asc(raw_metric_data::Column::ObservedAt)
            .all(self.get_connection())
            .await?;
        debug!(metric_id, rows = rows.len(), "population samples fetched");
        Ok(rows)
    }

    /// 获取 teachers 表的查询流
    pub async fn get_teacher_stream(
        &self,
    ) -> Result<impl Stream<Item = Result<teacher::Model, DbErr>> + Send + '_, DbErr> {
        teacher::Entity::find()
            .order_by_asc(teacher::Column::Id)
            .stream(self.get_connection())
            .await
    }

    pub async fn get_course_ids(&self) -> Result<Vec<String>, DbErr> {
        course::Entity::find()
            .select_only()
            .column(course::Column::Id)
            .order_by_asc(course::Column::Id)
            .into_tuple()
            .all(self.get_connection())
            .await
    }

    /// 窗口开始之前最近一次保存的结果, 作为趋势基线
    pub async fn get_latest_result_before(
        &self,
        evaluatee_id: &str,
        evaluatee_type: &str,
        before: NaiveDateTime,
    ) -> Result<Option<evaluation_result::Model>, DbErr> {
        evaluation_result::Entity::find()
            .filter(evaluation_result::Column::EvaluateeId.eq(evaluatee_id))
            .filter(evaluation_result::Column::EvaluateeType.eq(evaluatee_type))
            .filter(evaluation_result::Column::WindowEnd.lte(before))
            .order_by_desc(evaluation_result::Column::WindowEnd)
            .order_by_desc(evaluation_result::Column::CalculatedAt)
            .one(self.get_connection())
            .await
    }

    pub async fn insert_result(
        &self,
        result: evaluation_result::ActiveModel,
    ) -> Result<(), DbErr> {
        evaluation_result::Entity::insert(result)
            .exec_without_returning(self.get_connection())
            .await?;
        Ok(())
    }
}
