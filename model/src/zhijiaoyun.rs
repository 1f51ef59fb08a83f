use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, NaiveDateTime, Utc};
use entity::{course, raw_metric_data, teacher};
use sea_orm::ActiveValue::Set;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SUCCESS_CODE: i32 = 200;

pub const ATTENDANCE_METRIC: &str = "attendance_rate";
pub const EXAM_SCORE_METRIC: &str = "exam_score";

// 职教云接口统一的返回结构
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    #[serde(default)]
    pub msg: String,
    pub data: Option<PageData<T>>,
}

impl<T> ApiResponse<T> {
    /// 非成功状态码或缺少 data 时返回错误
    pub fn into_page(self) -> anyhow::Result<PageData<T>> {
        if self.code != SUCCESS_CODE {
            bail!("zhijiaoyun request failed with code {}: {}", self.code, self.msg);
        }
        self.data
            .ok_or_else(|| anyhow!("zhijiaoyun response has no data: {}", self.msg))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> PageData<T> {
    pub fn has_next_page(&self) -> bool {
        u64::from(self.page) * u64::from(self.page_size) < self.total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Users,
    Courses,
    Attendance,
    Scores,
    Evaluations,
}

impl ResourceKind {
    pub fn path(self) -> &'static str {
        match self {
            ResourceKind::Users => "/api/users",
            ResourceKind::Courses => "/api/courses",
            ResourceKind::Attendance => "/api/attendance",
            ResourceKind::Scores => "/api/scores",
            ResourceKind::Evaluations => "/api/evaluations",
        }
    }
}

/// 一次分页拉取的筛选条件
#[derive(Debug, Clone, PartialEq)]
pub struct ZjyQuery {
    pub resource: ResourceKind,
    pub page: u32,
    pub page_size: u32,
    pub teacher_id: Option<String>,
    pub course_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl ZjyQuery {
    pub fn new(resource: ResourceKind) -> Self {
        Self {
            resource,
            page: 1,
            page_size: 100,
            teacher_id: None,
            course_id: None,
            start_date: None,
            end_date: None,
        }
    }

    pub fn next_page(&self) -> Self {
        Self {
            page: self.page + 1,
            ..self.clone()
        }
    }

    /// 查询参数, 未设置的筛选条件不出现
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.to_string()),
            ("pageSize", self.page_size.to_string()),
        ];
        let optional = [
            ("teacherId", &self.teacher_id),
            ("courseId", &self.course_id),
            ("startDate", &self.start_date),
            ("endDate", &self.end_date),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                params.push((key, value.clone()));
            }
        }
        params
    }
}

fn parse_time(value: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT)
        .or_else(|_| value.parse::<DateTime<Utc>>().map(|t| t.naive_utc()))
        .with_context(|| format!("invalid zhijiaoyun time `{value}`"))
}

fn raw_metric(
    teacher_id: &str,
    metric_id: &str,
    source: &str,
    observed_at: NaiveDateTime,
    external_ref: String,
) -> raw_metric_data::ActiveModel {
    raw_metric_data::ActiveModel {
        id: Set(Uuid::new_v4()),
        evaluatee_id: Set(teacher_id.to_owned()),
        evaluatee_type: Set("teacher".to_owned()),
        metric_id: Set(metric_id.to_owned()),
        source: Set(source.to_owned()),
        value_numeric: Set(None),
        value_text: Set(None),
        value_bool: Set(None),
        quality_score: Set(1.0),
        observed_at: Set(observed_at),
        external_ref: Set(Some(external_ref)),
    }
}

// 用户
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZjyUser {
    pub user_id: String,
    /// 工号, 存在时作为本地教师 id
    pub employee_no: Option<String>,
    pub name: String,
    pub role: String,
    pub department: Option<String>,
    pub title: Option<String>,
    pub email: Option<String>,
    pub create_time: String,
}

impl ZjyUser {
    pub fn is_teacher(&self) -> bool {
        self.role == "teacher"
    }
}

impl TryFrom<ZjyUser> for teacher::ActiveModel {
    type Error = anyhow::Error;

    fn try_from(user: ZjyUser) -> Result<Self, Self::Error> {
        if !user.is_teacher() {
            bail!("zhijiaoyun user {} is a {}, not a teacher", user.user_id, user.role);
        }
        let created_at = parse_time(&user.create_time)?;
        Ok(Self {
            id: Set(user.employee_no.unwrap_or_else(|| user.user_id.clone())),
            name: Set(user.name),
            department: Set(user.department),
            title: Set(user.title),
            email: Set(user.email),
            zhijiaoyun_id: Set(Some(user.user_id)),
            created_at: Set(created_at),
            updated_at: Set(Utc::now().naive_utc()),
        })
    }
}

// 课程
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZjyCourse {
    pub course_id: String,
    pub course_name: String,
    pub teacher_id: Option<String>,
    pub class_name: Option<String>,
    pub term: Option<String>,
    pub credit: Option<f64>,
    pub create_time: String,
}

impl TryFrom<ZjyCourse> for course::ActiveModel {
    type Error = anyhow::Error;

    fn try_from(item: ZjyCourse) -> Result<Self, Self::Error> {
        Ok(Self {
            created_at: Set(parse_time(&item.create_time)?),
            updated_at: Set(Utc::now().naive_utc()),
            id: Set(item.course_id),
            name: Set(item.course_name),
            teacher_id: Set(item.teacher_id),
            class_name: Set(item.class_name),
            term: Set(item.term),
            credit: Set(item.credit),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    Leave,
}

// 考勤记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZjyAttendance {
    pub record_id: String,
    pub student_id: String,
    pub course_id: String,
    pub teacher_id: String,
    pub status: AttendanceStatus,
    pub sign_time: String,
}

impl ZjyAttendance {
    /// 请假不计入出勤率, 返回 None
    pub fn to_raw_metric(&self) -> anyhow::Result<Option<raw_metric_data::ActiveModel>> {
        let attended = match self.status {
            AttendanceStatus::Present | AttendanceStatus::Late => true,
            AttendanceStatus::Absent => false,
            AttendanceStatus::Leave => return Ok(None),
        };
        let mut model = raw_metric(
            &self.teacher_id,
            ATTENDANCE_METRIC,
            "attendance",
            parse_time(&self.sign_time)?,
            self.record_id.clone(),
        );
        model.value_bool = Set(Some(attended));
        Ok(Some(model))
    }
}

fn default_full_score() -> f64 {
    100.0
}

// 成绩记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZjyScore {
    pub record_id: String,
    pub student_id: String,
    pub course_id: String,
    pub teacher_id: String,
    pub score: f64,
    #[serde(default = "default_full_score")]
    pub full_score: f64,
    pub exam_time: String,
}

impl TryFrom<&ZjyScore> for raw_metric_data::ActiveModel {
    type Error = anyhow::Error;

    /// 按满分换算成百分制
    fn try_from(item: &ZjyScore) -> Result<Self, Self::Error> {
        if !(item.full_score > 0.0) {
            bail!("score record {} has full score {}", item.record_id, item.full_score);
        }
        let mut model = raw_metric(
            &item.teacher_id,
            EXAM_SCORE_METRIC,
            "exam_score",
            parse_time(&item.exam_time)?,
            item.record_id.clone(),
        );
        model.value_numeric = Set(Some(item.score / item.full_score * 100.0));
        Ok(model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorRole {
    Student,
    Peer,
    Supervisor,
    #[serde(rename = "self")]
    Oneself,
}

impl EvaluatorRole {
    pub fn data_source(self) -> &'static str {
        match self {
            EvaluatorRole::Student => "student_evaluation",
            EvaluatorRole::Peer => "peer_review",
            EvaluatorRole::Supervisor => "supervisor_review",
            EvaluatorRole::Oneself => "self_assessment",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZjyEvaluationItem {
    pub item_code: String,
    pub score: Option<f64>,
    pub comment: Option<String>,
}

// 评教记录, 一条记录包含多个评价项
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZjyEvaluation {
    pub evaluation_id: String,
    pub teacher_id: String,
    pub course_id: Option<String>,
    pub evaluator_role: EvaluatorRole,
    #[serde(default)]
    pub items: Vec<ZjyEvaluationItem>,
    pub submit_time: String,
}

impl ZjyEvaluation {
    /// 每个评价项一行, 既没有分数也没有评语的项被跳过
    pub fn to_raw_metrics(&self) -> anyhow::Result<Vec<raw_metric_data::ActiveModel>> {
        let observed_at = parse_time(&self.submit_time)?;
        let rows = self
            .items
            .iter()
            .filter(|item| item.score.is_some() || item.comment.is_some())
            .map(|item| {
                let mut model = raw_metric(
                    &self.teacher_id,
                    &item.item_code,
                    self.evaluator_role.data_source(),
                    observed_at,
                    self.evaluation_id.clone(),
                );
                match item.score {
                    Some(score) => model.value_numeric = Set(Some(score)),
                    None => model.value_text = Set(item.comment.clone()),
                }
                model
            })
            .collect();
        Ok(rows)
    }
}
