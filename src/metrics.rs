//! # 指标模块
//!
//! 进程内唯一的 Prometheus 注册表，以及请求计数器、请求耗时直方图。
//!
//! `Metrics` 在启动时构建一次，通过 `AppState` 注入到计时中间件和 `/metrics` handler，
//! 不使用全局静态变量。

mod process;

use std::sync::atomic::AtomicU64;

use axum::http::{Method, StatusCode};
use prometheus_client::{
    encoding::{EncodeLabelSet, text::encode},
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};

use self::process::ProcessCollector;

/// `text::encode` 输出的 OpenMetrics 文本格式对应的 Content-Type
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// 请求耗时直方图的桶上界，单位毫秒，必须升序
pub const LATENCY_BUCKETS_MS: [f64; 8] = [1.0, 50.0, 100.0, 300.0, 500.0, 1000.0, 2000.0, 5000.0];

/// Prometheus counter 编码时会自动追加 `_total` 后缀，最终暴露为 `http_request_total`
const REQ_TOTAL_NAME: &str = "http_request";
const REQ_RES_TIME_NAME: &str = "http_req_res_time_seconds";
const PROCESS_START_TIME_NAME: &str = "process_start_time_seconds";

type HistogramFamily = Family<HttpReqLabel, Histogram, fn() -> Histogram>;

/// 请求耗时的标签
///
/// 所有字段都是显式构造的字符串，状态码通过 `StatusCode::as_str` 转换
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpReqLabel {
    pub method: String,
    pub route: String,
    pub status_code: String,
}

impl HttpReqLabel {
    pub fn new(method: &Method, route: &str, status: StatusCode) -> Self {
        Self {
            method: method.as_str().to_string(),
            route: route.to_string(),
            status_code: status.as_str().to_string(),
        }
    }
}

/// 指标集合
pub struct Metrics {
    /// Prometheus 注册表
    prom_registry: Registry,

    /// 收到的请求总数
    req_total: Counter,

    /// 请求耗时 (毫秒)，按 method / route / status_code 分组
    req_res_time: HistogramFamily,

    /// 进程启动时间 (unix 秒)
    process_start_time: Gauge<f64, AtomicU64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut prom_registry = Registry::default();

        let req_total: Counter = Counter::default();
        prom_registry.register(REQ_TOTAL_NAME, "total number of requests received", req_total.clone());

        let req_res_time: HistogramFamily = Family::new_with_constructor(|| Histogram::new(LATENCY_BUCKETS_MS.iter().copied()));
        prom_registry.register(REQ_RES_TIME_NAME, "total time taken for processing", req_res_time.clone());

        let process_start_time = Gauge::<f64, AtomicU64>::default();
        process_start_time.set(chrono::Utc::now().timestamp_millis() as f64 / 1000.0);
        prom_registry.register(PROCESS_START_TIME_NAME, "Start time of the process since unix epoch in seconds", process_start_time.clone());
        prom_registry.register_collector(Box::new(ProcessCollector));

        Metrics {
            prom_registry,
            req_total,
            req_res_time,
            process_start_time,
        }
    }

    /// 记录一次已完成的请求：总数加一，并把耗时写入对应标签的直方图
    pub fn observe_request(&self, label: &HttpReqLabel, elapsed_ms: f64) {
        self.req_total.inc();
        self.req_res_time.get_or_create(label).observe(elapsed_ms);
    }

    pub fn request_total(&self) -> u64 {
        self.req_total.get()
    }

    pub fn process_start_time(&self) -> f64 {
        self.process_start_time.get()
    }

    /// 以 OpenMetrics 文本格式序列化当前注册表，不修改任何指标
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.prom_registry)?;
        Ok(buffer)
    }
}
