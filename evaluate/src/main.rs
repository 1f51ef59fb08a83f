use anyhow::Result;
use chrono::Utc;
use database::storage::Context;
use evaluate::manager::{CancellationFlag, EvaluationManager};
use evaluate::{EvaluationContext, TimeWindow};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_logger() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_target(false),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志记录器
    init_logger();

    // 加载配置, 第一个参数可指定配置文件
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "evaluate/config".to_owned());
    let ctx = EvaluationContext::load_config(&config_path)?;
    let window = TimeWindow::last_days(Utc::now(), ctx.batch.window_days);

    // 初始化数据库连接
    let db_ctx = Context::new(&ctx.database_url.url).await?;
    let manager = EvaluationManager::new(db_ctx.evaluate_database_stg(), ctx)?;

    // Ctrl-C 后不再派发新的计算
    let cancel = CancellationFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight evaluations");
            on_signal.cancel();
        }
    });

    let summary = manager.run(window, &cancel).await?;
    info!(
        "Evaluation of {} - {} finished: {} saved, {} invalid, {} failed",
        window.start.date_naive(),
        window.end.date_naive(),
        summary.evaluated,
        summary.invalid,
        summary.failed
    );

    Ok(())
}
