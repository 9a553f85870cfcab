use std::{convert::Infallible, net::SocketAddr, time::Duration};

pub mod config;
pub mod error;
pub mod handler;
pub mod init_log;
pub mod layers;
pub mod metrics;
pub mod task;
pub mod util;
type DynError = Box<dyn std::error::Error + Send + Sync>;
use crate::util::io::{self, create_dual_stack_listener};

use axum::{Router, extract::Request};

use hyper::body::Incoming;
use hyper_util::rt::TokioExecutor;
use log::{info, warn};
use tokio::{net::TcpListener, sync::mpsc};
use tower::{Service, ServiceExt};

const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Server {
    pub port: u16,
    router: Router,
    pub idle_timeout: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// 创建服务器，返回值中的 Sender 用于触发优雅关闭
pub fn new_server(port: u16, router: Router) -> (Server, mpsc::Sender<()>) {
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let server = Server {
        port,
        router,
        idle_timeout: DEFAULT_IDLE_TIMEOUT,
        shutdown_rx,
    };
    (server, shutdown_tx)
}

impl Server {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// 在 `port` 上创建双栈 listener 并开始服务
    pub async fn run(self) -> Result<(), std::io::Error> {
        let listener = create_dual_stack_listener(self.port).await?;
        self.serve(listener).await
    }

    /// 使用已绑定的 listener 服务，直到收到关闭信号
    pub async fn serve(mut self, listener: TcpListener) -> Result<(), std::io::Error> {
        info!("Server is running at http://localhost:{}", listener.local_addr()?.port());
        let server = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
        let graceful = hyper_util::server::graceful::GracefulShutdown::new();
        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("start graceful shutdown!");
                    drop(listener);
                    break;
                }
                conn = listener.accept() => {
                    match conn {
                        Ok((conn, client_socket_addr)) => {
                            handle_connection(conn, client_socket_addr, self.router.clone(), server.clone(), &graceful, self.idle_timeout).await;
                        }
                        Err(e) => {
                            warn!("accept error:{e}");
                        }
                    }
                }
            }
        }
        tokio::select! {
            _ = graceful.shutdown() => {
                info!("Gracefully shutdown!");
            },
            _ = tokio::time::sleep(GRACEFUL_SHUTDOWN_TIMEOUT) => {
                info!("Waited {GRACEFUL_SHUTDOWN_TIMEOUT:?} for graceful shutdown, aborting...");
            }
        }
        Ok(())
    }
}

async fn handle_connection<C>(
    conn: C, client_socket_addr: SocketAddr, app: Router, server: hyper_util::server::conn::auto::Builder<TokioExecutor>,
    graceful: &hyper_util::server::graceful::GracefulShutdown, timeout: Duration,
) where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + 'static + Send + Sync,
{
    let timeout_io = Box::pin(io::TimeoutIO::new(conn, timeout));
    let stream = hyper_util::rt::TokioIo::new(timeout_io);
    let mut app = app.into_make_service_with_connect_info::<SocketAddr>();
    let app: axum::middleware::AddExtension<Router, axum::extract::ConnectInfo<SocketAddr>> = unwrap_infallible(app.call(client_socket_addr).await);
    // https://github.com/tokio-rs/axum/blob/main/examples/serve-with-hyper/src/main.rs
    let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| {
        let app = app.clone();
        async move {
            app.oneshot(request)
                .await
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::Interrupted, err))
        }
    });

    let conn = server.serve_connection_with_upgrades(stream, hyper_service);
    let conn = graceful.watch(conn.into_owned());

    tokio::spawn(async move {
        if let Err(err) = conn.await {
            handle_hyper_error(client_socket_addr, err);
        }
        log::debug!("connection dropped: {client_socket_addr}");
    });
}

fn handle_hyper_error(client_socket_addr: SocketAddr, http_err: DynError) {
    use std::error::Error;
    let peer = format!("{} {}", client_socket_addr.ip().to_canonical(), client_socket_addr.port());
    match http_err.downcast_ref::<hyper::Error>() {
        Some(hyper_err) => {
            let level = if hyper_err.is_user() { log::Level::Warn } else { log::Level::Debug };
            let source = hyper_err.source().unwrap_or(hyper_err);
            log::log!(level, "[hyper {}]: {:?} from {}", if hyper_err.is_user() { "user" } else { "system" }, source, peer);
        }
        None => match http_err.downcast_ref::<std::io::Error>() {
            Some(io_err) => {
                warn!("[hyper io]: [{}] {} from {}", io_err.kind(), io_err, peer);
            }
            None => {
                warn!("[hyper]: {http_err} from {peer}");
            }
        },
    }
}

/// 等待 SIGTERM 或 Ctrl-C
#[cfg(unix)]
pub async fn wait_signal() -> Result<(), DynError> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut terminate_signal = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = terminate_signal.recv() => {
            info!("receive terminate signal");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("receive ctrl_c signal");
        },
    };
    Ok(())
}

#[cfg(windows)]
pub async fn wait_signal() -> Result<(), DynError> {
    let _ = tokio::signal::ctrl_c().await;
    info!("receive ctrl_c signal");
    Ok(())
}

fn unwrap_infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => match err {},
    }
}
