pub mod evaluate_database;

use evaluate_database::EvaluateDatabase;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 存储上下文, 持有共享连接并分发各业务的存储对象
#[derive(Clone)]
pub struct Context {
    connection: Arc<DatabaseConnection>,
}

impl Context {
    pub async fn new(database_url: &str) -> Result<Self, DbErr> {
        let mut opt = ConnectOptions::new(database_url.to_owned());
        opt.max_connections(16)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);
        let connection = Database::connect(opt).await?;
        info!("database connected");
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: DatabaseConnection) -> Self {
        Self {
            connection: Arc::new(connection),
        }
    }

    pub fn evaluate_database_stg(&self) -> EvaluateDatabase {
        EvaluateDatabase::new(self.connection.clone())
    }
}
