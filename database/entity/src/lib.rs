pub mod course;
pub mod evaluation_metric;
pub mod evaluation_result;
pub mod raw_metric_data;
pub mod teacher;
pub mod weight_configuration;
