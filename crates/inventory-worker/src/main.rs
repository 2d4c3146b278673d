//! 库存事件处理服务
//!
//! 消费 Kafka 订单事件，幂等扣减库存，毒消息转入死信队列。

use std::sync::Arc;

use anyhow::Result;
use order_management::repository::PgInventoryStore;
use order_shared::{
    config::AppConfig,
    database::Database,
    dlq::DlqProducer,
    kafka::{KafkaMessageSource, KafkaProducer},
    observability,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use inventory_worker::{ConsumerSettings, InventoryApplier, InventoryConsumer};

const SERVICE_NAME: &str = "inventory-worker";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置，失败时退回默认值
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..AppConfig::default()
        }
    });

    // 2. 日志与指标
    let _guard = observability::init(&config.service_name, &config.observability).await?;
    info!(
        environment = %config.environment,
        topic = %config.kafka.order_events_topic,
        group = %config.kafka.consumer_group,
        "Starting inventory-worker..."
    );

    // 3. 数据库
    let db = Database::connect(&config.database).await?;
    db.health_check().await?;
    db.run_migrations().await?;
    info!("Database connection established");

    // 4. Kafka 消费者与死信生产者
    let source = KafkaMessageSource::new(&config.kafka, &[config.kafka.order_events_topic.as_str()])?;
    let dlq = DlqProducer::new(
        KafkaProducer::new(&config.kafka)?,
        config.kafka.dead_letter_topic.clone(),
    );

    // 5. 组装消费循环
    let applier = InventoryApplier::new(Arc::new(PgInventoryStore::new(db.pool().clone())));
    let consumer = InventoryConsumer::new(
        source,
        applier,
        Arc::new(dlq),
        ConsumerSettings::from_config(&config.kafka),
    );

    // 6. Ctrl-C / SIGTERM 触发关闭
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let stats = consumer.run(shutdown_rx).await;
    info!(?stats, "inventory-worker stopped");

    db.close().await;
    Ok(())
}

/// 监听 Ctrl+C 和 SIGTERM
///
/// 某个信号处理器安装失败时只记录错误，该分支永不就绪，不会误触发关闭。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
