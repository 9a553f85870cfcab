use std::{
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use pin_project_lite::pin_project;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    time::{Instant, Sleep, sleep},
};

/// 监听 `[::]:port`，同时接受 IPv4 和 IPv6 连接
pub(crate) async fn create_dual_stack_listener(port: u16) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    #[cfg(not(windows))]
    socket.set_reuse_address(true)?; // 快速重启
    socket.set_only_v6(false)?;
    let addr = SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 0], port));
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener = std::net::TcpListener::from(socket);
    std_listener.set_nonblocking(true)?;
    TcpListener::from_std(std_listener)
}

pin_project! {
    /// 连接在 `timeout` 内没有任何读写就返回 TimedOut
    #[derive(Debug)]
    pub struct TimeoutIO<T>
    where
    T: AsyncWrite,
    T: AsyncRead,
    {
        #[pin]
        inner: T,
        timeout: Duration,
        #[pin]
        idle_future: Sleep
    }
}

impl<T> TimeoutIO<T>
where
    T: AsyncWrite + AsyncRead,
{
    pub fn new(inner: T, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            idle_future: sleep(timeout),
        }
    }
}

/// 就绪则重置空闲计时；未就绪且已超时则返回错误
fn watch_idle<R>(poll: Poll<io::Result<R>>, idle_future: Pin<&mut Sleep>, timeout: Duration, cx: &mut Context<'_>, op: &str) -> Poll<io::Result<R>> {
    if poll.is_ready() {
        idle_future.reset(Instant::now() + timeout);
        poll
    } else if idle_future.poll(cx).is_ready() {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::TimedOut, format!("{op} idle for {timeout:?}"))))
    } else {
        poll
    }
}

impl<T> AsyncRead for TimeoutIO<T>
where
    T: AsyncWrite + AsyncRead,
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut tokio::io::ReadBuf<'_>) -> Poll<io::Result<()>> {
        let pro = self.project();
        let poll = pro.inner.poll_read(cx, buf);
        watch_idle(poll, pro.idle_future, *pro.timeout, cx, "read")
    }
}

impl<T> AsyncWrite for TimeoutIO<T>
where
    T: AsyncWrite + AsyncRead,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let pro = self.project();
        let poll = pro.inner.poll_write(cx, buf);
        watch_idle(poll, pro.idle_future, *pro.timeout, cx, "write")
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let pro = self.project();
        let poll = pro.inner.poll_flush(cx);
        watch_idle(poll, pro.idle_future, *pro.timeout, cx, "write")
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let pro = self.project();
        let poll = pro.inner.poll_shutdown(cx);
        watch_idle(poll, pro.idle_future, *pro.timeout, cx, "write")
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(self: Pin<&mut Self>, cx: &mut Context<'_>, bufs: &[io::IoSlice<'_>]) -> Poll<io::Result<usize>> {
        let pro = self.project();
        let poll = pro.inner.poll_write_vectored(cx, bufs);
        watch_idle(poll, pro.idle_future, *pro.timeout, cx, "write")
    }
}
