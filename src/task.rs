//! 模拟耗时操作，供 `/slow` 使用

use std::time::Duration;

use futures_util::future::BoxFuture;
use rand::{Rng, seq::SliceRandom};

use crate::{config::SlowTaskConfig, error::TaskError};

/// 失败时随机挑选的错误详情
pub const FAILURE_MESSAGES: [&str; 4] = ["DB Payment Failure", "DB Server is Down", "Access Denied", "Not Found Error"];

/// 一个可能失败的异步操作，成功时返回耗时毫秒数
pub trait TaskRunner: Send + Sync {
    fn run(&self) -> BoxFuture<'static, Result<u64, TaskError>>;
}

/// 从候选耗时中随机挑一个 sleep，按 `failure_rate` 的概率直接失败
#[derive(Debug, Clone)]
pub struct HeavyTask {
    delays_ms: Vec<u64>,
    failure_rate: f64,
}

impl HeavyTask {
    pub fn new(config: &SlowTaskConfig) -> Self {
        Self {
            delays_ms: config.delays_ms.clone(),
            // NaN would make gen_bool panic
            failure_rate: if config.failure_rate.is_nan() { 0.0 } else { config.failure_rate.clamp(0.0, 1.0) },
        }
    }
}

impl TaskRunner for HeavyTask {
    fn run(&self) -> BoxFuture<'static, Result<u64, TaskError>> {
        // ThreadRng is !Send, draw everything before the future is built
        let mut rng = rand::thread_rng();
        let delay_ms = self.delays_ms.choose(&mut rng).copied().unwrap_or_default();
        let failure = match rng.gen_bool(self.failure_rate) {
            true => FAILURE_MESSAGES.choose(&mut rng).copied(),
            false => None,
        };

        Box::pin(async move {
            if let Some(message) = failure {
                return Err(TaskError(message.to_string()));
            }
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(delay_ms)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(delays_ms: Vec<u64>, failure_rate: f64) -> HeavyTask {
        HeavyTask::new(&SlowTaskConfig { delays_ms, failure_rate })
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_with_one_of_the_delays() {
        let task = task(vec![100, 250, 600], 0.0);
        for _ in 0..20 {
            let start = tokio::time::Instant::now();
            let ms = task.run().await.unwrap();
            assert!([100, 250, 600].contains(&ms));
            assert!(start.elapsed() >= Duration::from_millis(ms));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fails_with_known_message() {
        let task = task(vec![100], 1.0);
        let start = tokio::time::Instant::now();
        let err = task.run().await.unwrap_err();
        assert!(FAILURE_MESSAGES.contains(&err.0.as_str()));
        // fails before sleeping
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn clamps_failure_rate() {
        assert_eq!(task(vec![1], 3.0).failure_rate, 1.0);
        assert_eq!(task(vec![1], -0.5).failure_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn nan_failure_rate_never_fails() {
        let nan = task(vec![1], f64::NAN);
        assert_eq!(nan.failure_rate, 0.0);
        for _ in 0..10 {
            assert_eq!(nan.run().await, Ok(1));
        }
    }
}
