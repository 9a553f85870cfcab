//! # 进程指标
//!
//! 每次抓取时从 `/proc/self` 读取 CPU、内存和文件描述符，非 Linux 平台不输出。

use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{counter::ConstCounter, gauge::ConstGauge},
};

#[derive(Debug, Default)]
pub(crate) struct ProcessCollector;

impl Collector for ProcessCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
        let Some(stats) = ProcessStats::read() else {
            return Ok(());
        };

        // counter 编码时追加 `_total`
        let cpu = ConstCounter::new(stats.cpu_seconds);
        let metric_encoder = encoder.encode_descriptor("process_cpu_seconds", "Total user and system CPU time spent in seconds", None, cpu.metric_type())?;
        cpu.encode(metric_encoder)?;

        encode_gauge(&mut encoder, "process_resident_memory_bytes", "Resident memory size in bytes", stats.resident_memory_bytes)?;
        encode_gauge(&mut encoder, "process_virtual_memory_bytes", "Virtual memory size in bytes", stats.virtual_memory_bytes)?;
        encode_gauge(&mut encoder, "process_open_fds", "Number of open file descriptors", stats.open_fds)?;
        if let Some(max_fds) = stats.max_fds {
            encode_gauge(&mut encoder, "process_max_fds", "Maximum number of open file descriptors", max_fds)?;
        }
        Ok(())
    }
}

fn encode_gauge(encoder: &mut DescriptorEncoder<'_>, name: &str, help: &str, value: i64) -> Result<(), std::fmt::Error> {
    let gauge = ConstGauge::new(value);
    let metric_encoder = encoder.encode_descriptor(name, help, None, gauge.metric_type())?;
    gauge.encode(metric_encoder)
}

#[derive(Debug, Clone, PartialEq)]
struct ProcessStats {
    cpu_seconds: f64,
    resident_memory_bytes: i64,
    virtual_memory_bytes: i64,
    open_fds: i64,
    max_fds: Option<i64>,
}

impl ProcessStats {
    /// 读取失败只记 debug 日志，不影响抓取
    #[cfg(target_os = "linux")]
    fn read() -> Option<Self> {
        match Self::read_procfs() {
            Ok(stats) => Some(stats),
            Err(e) => {
                log::debug!("read process stats failed: {e}");
                None
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn read() -> Option<Self> {
        None
    }

    #[cfg(target_os = "linux")]
    fn read_procfs() -> procfs::ProcResult<Self> {
        use procfs::process::{LimitValue, Process};

        let process = Process::myself()?;
        let stat = process.stat()?;
        let ticks_per_second = procfs::ticks_per_second() as f64;
        let max_fds = match process.limits()?.max_open_files.soft_limit {
            LimitValue::Value(limit) => Some(limit as i64),
            LimitValue::Unlimited => None,
        };
        Ok(ProcessStats {
            cpu_seconds: (stat.utime + stat.stime) as f64 / ticks_per_second,
            resident_memory_bytes: (stat.rss * procfs::page_size()) as i64,
            virtual_memory_bytes: stat.vsize as i64,
            open_fds: process.fd_count()? as i64,
            max_fds,
        })
    }
}
