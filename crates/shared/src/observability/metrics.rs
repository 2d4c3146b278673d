//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//! 未安装 recorder 时（例如单元测试）所有记录函数都是空操作。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "inventory_events_total",
        "Order events handled by the inventory consumer, by outcome"
    );
    metrics::describe_histogram!(
        "inventory_apply_duration_seconds",
        "Duration of the idempotent inventory apply transaction"
    );
    metrics::describe_counter!(
        "inventory_offset_commit_failures_total",
        "Offset commits that failed and were left for redelivery"
    );
    metrics::describe_counter!(
        "inventory_dead_letter_failures_total",
        "Poison messages that could not be written to the dead-letter topic"
    );
    metrics::describe_counter!(
        "order_events_published_total",
        "Order events delivered to the bus"
    );
    metrics::describe_counter!(
        "order_event_publish_failures_total",
        "Order events dropped after exhausting publish retries"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一条订单事件的处理结果
#[inline]
pub fn record_inventory_event(outcome: &'static str) {
    metrics::counter!("inventory_events_total", "outcome" => outcome).increment(1);
}

/// 记录库存扣减事务耗时
#[inline]
pub fn record_apply_duration(duration_secs: f64) {
    metrics::histogram!("inventory_apply_duration_seconds").record(duration_secs);
}

#[inline]
pub fn record_offset_commit_failure() {
    metrics::counter!("inventory_offset_commit_failures_total").increment(1);
}

#[inline]
pub fn record_dead_letter_failure() {
    metrics::counter!("inventory_dead_letter_failures_total").increment(1);
}

/// 记录事件发布结果
#[inline]
pub fn record_event_published(event_type: &'static str, delivered: bool) {
    if delivered {
        metrics::counter!("order_events_published_total", "type" => event_type).increment(1);
    } else {
        metrics::counter!("order_event_publish_failures_total", "type" => event_type)
            .increment(1);
    }
}
