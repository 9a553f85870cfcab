//! # 启动参数
//!
//! 命令行参数与环境变量，`PORT` 等变量可以直接覆盖默认值。

use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_APP_NAME: &str = "Production-Server";
pub const DEFAULT_SLOW_DELAYS_MS: [u64; 9] = [100, 150, 200, 300, 600, 500, 1000, 1400, 2500];
pub const DEFAULT_SLOW_FAILURE_RATE: f64 = 0.125;

/// 带 prometheus 指标的 axum 服务
#[derive(Parser, Debug, Clone)]
#[command(author, version=None, about, long_about = None)]
pub struct Param {
    /// 监听端口，非法值回退到 8000
    #[arg(long, env = "PORT", value_name = "port", default_value = "8000")]
    pub port: String,

    /// 连接空闲超时 (秒)
    #[arg(long, env = "IDLE_TIMEOUT_SECS", default_value_t = 120)]
    pub idle_timeout_secs: u64,

    /// 写入请求 span 的应用名
    #[arg(long, env = "APP_NAME", default_value = DEFAULT_APP_NAME)]
    pub app_name: String,

    /// /slow 的候选耗时 (毫秒)，逗号分隔
    #[arg(long, env = "SLOW_DELAYS_MS", value_delimiter = ',', default_value = "100,150,200,300,600,500,1000,1400,2500")]
    pub slow_delays_ms: Vec<u64>,

    /// /slow 的失败概率
    #[arg(long, env = "SLOW_FAILURE_RATE", default_value_t = DEFAULT_SLOW_FAILURE_RATE)]
    pub slow_failure_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlowTaskConfig {
    pub delays_ms: Vec<u64>,
    pub failure_rate: f64,
}

impl Default for SlowTaskConfig {
    fn default() -> Self {
        Self {
            delays_ms: DEFAULT_SLOW_DELAYS_MS.to_vec(),
            failure_rate: DEFAULT_SLOW_FAILURE_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub idle_timeout: Duration,
    pub app_name: String,
    pub slow_task: SlowTaskConfig,
}

impl Config {
    pub fn from_param(param: &Param) -> Result<Self, ConfigError> {
        if param.slow_delays_ms.is_empty() {
            return Err(ConfigError::EmptyDelays);
        }
        if !(0.0..=1.0).contains(&param.slow_failure_rate) {
            return Err(ConfigError::FailureRateOutOfRange(param.slow_failure_rate));
        }
        if param.idle_timeout_secs == 0 {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        Ok(Config {
            port: parse_port(&param.port),
            idle_timeout: Duration::from_secs(param.idle_timeout_secs),
            app_name: param.app_name.clone(),
            slow_task: SlowTaskConfig {
                delays_ms: param.slow_delays_ms.clone(),
                failure_rate: param.slow_failure_rate,
            },
        })
    }
}

/// 解析端口，空值、非数字或 0 都回退到 [`DEFAULT_PORT`]
pub fn parse_port(raw: &str) -> u16 {
    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => port,
        _ => {
            log::warn!("invalid port {raw:?}, fallback to {DEFAULT_PORT}");
            DEFAULT_PORT
        }
    }
}
