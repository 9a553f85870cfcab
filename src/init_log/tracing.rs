use time::UtcOffset;
use time::macros::format_description;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::DynError;

/// 初始化 tracing，`RUST_LOG` 优先于默认过滤规则
pub fn init(env_cargo_crate_name: &str) -> Result<(), DynError> {
    // 多线程环境下 time 拿不到本地时区，退回 UTC
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(offset, format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(env_cargo_crate_name).into()))
        .with(tracing_subscriber::fmt::layer().with_thread_ids(true).with_ansi(true).with_timer(timer))
        .try_init()?;
    Ok(())
}

fn default_filter(env_cargo_crate_name: &str) -> String {
    format!("{env_cargo_crate_name}=info,tower_http=error")
}
