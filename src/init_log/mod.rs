#[cfg(feature = "use_tracing_subscriber")]
pub mod tracing;
