//! Client/upstream relay for forwarded connections
//!
//! Copies bytes in both directions until the upstream finishes its response
//! stream. The two directions are not symmetric:
//!
//! - Client EOF shuts down the upstream write half and keeps relaying the
//!   upstream's response.
//! - Upstream EOF ends the relay, whether or not the client is still sending.
//! - Any read or write error in either direction ends the relay.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};
use tracing::{debug, trace};

/// Per-direction relay buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Byte counts of a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes transferred from client to upstream
    pub client_to_upstream: u64,
    /// Bytes transferred from upstream to client
    pub upstream_to_client: u64,
}

/// Relay state machine
struct Relay<'a, C, U>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    client: &'a mut C,
    upstream: &'a mut U,
    client_to_upstream: TransferState,
    upstream_to_client: TransferState,
    idle_timeout: Option<Duration>,
    idle_timer: Option<Pin<Box<Sleep>>>,
}

/// State for one direction of transfer
struct TransferState {
    buf: Box<[u8]>,
    read_done: bool,
    write_done: bool,
    pos: usize,
    cap: usize,
    bytes_transferred: u64,
    /// Incremented on every read or write that moved data
    progress: u64,
}

impl TransferState {
    fn new(buf_size: usize) -> Self {
        Self {
            buf: vec![0u8; buf_size].into_boxed_slice(),
            read_done: false,
            write_done: false,
            pos: 0,
            cap: 0,
            bytes_transferred: 0,
            progress: 0,
        }
    }

    fn is_done(&self) -> bool {
        self.read_done && self.write_done
    }

    /// Drive this direction as far as it can go.
    ///
    /// Ready(Ok) means the reader hit EOF, all data was written and the
    /// writer was shut down.
    fn poll_transfer<R, W>(
        &mut self,
        cx: &mut Context<'_>,
        mut reader: Pin<&mut R>,
        mut writer: Pin<&mut W>,
    ) -> Poll<io::Result<()>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            if self.pos < self.cap {
                let n = match writer.as_mut().poll_write(cx, &self.buf[self.pos..self.cap]) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "write zero bytes",
                        )));
                    }
                    Poll::Ready(Ok(n)) => n,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                };
                self.pos += n;
                self.bytes_transferred += n as u64;
                self.progress += 1;

                if self.pos == self.cap {
                    self.pos = 0;
                    self.cap = 0;
                }
            } else if self.read_done {
                if !self.write_done {
                    match writer.as_mut().poll_flush(cx) {
                        Poll::Ready(Ok(())) => {}
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                    match writer.as_mut().poll_shutdown(cx) {
                        Poll::Ready(Ok(())) => {
                            self.write_done = true;
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                return Poll::Ready(Ok(()));
            } else {
                let mut read_buf = ReadBuf::new(&mut self.buf);
                match reader.as_mut().poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            self.read_done = true;
                        } else {
                            self.cap = n;
                            self.progress += 1;
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
        }
    }
}

impl<'a, C, U> Relay<'a, C, U>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    fn new(
        client: &'a mut C,
        upstream: &'a mut U,
        buf_size: usize,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            client,
            upstream,
            client_to_upstream: TransferState::new(buf_size),
            upstream_to_client: TransferState::new(buf_size),
            idle_timeout,
            idle_timer: idle_timeout.map(|d| Box::pin(sleep(d))),
        }
    }

    fn result(&self) -> RelayStats {
        RelayStats {
            client_to_upstream: self.client_to_upstream.bytes_transferred,
            upstream_to_client: self.upstream_to_client.bytes_transferred,
        }
    }

    fn progress(&self) -> u64 {
        self.client_to_upstream.progress + self.upstream_to_client.progress
    }
}

impl<C, U> Future for Relay<'_, C, U>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    type Output = io::Result<RelayStats>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let progress_before = this.progress();

        if !this.client_to_upstream.is_done() {
            match this.client_to_upstream.poll_transfer(
                cx,
                Pin::new(&mut *this.client),
                Pin::new(&mut *this.upstream),
            ) {
                Poll::Ready(Ok(())) => {
                    trace!(
                        "Client finished sending after {} bytes, upstream write side closed",
                        this.client_to_upstream.bytes_transferred
                    );
                }
                Poll::Ready(Err(e)) => {
                    debug!("Client->upstream transfer error: {}", e);
                    return Poll::Ready(Err(e));
                }
                Poll::Pending => {}
            }
        }

        match this.upstream_to_client.poll_transfer(
            cx,
            Pin::new(&mut *this.upstream),
            Pin::new(&mut *this.client),
        ) {
            Poll::Ready(Ok(())) => return Poll::Ready(Ok(this.result())),
            Poll::Ready(Err(e)) => {
                debug!("Upstream->client transfer error: {}", e);
                return Poll::Ready(Err(e));
            }
            Poll::Pending => {}
        }

        let progressed = this.progress() != progress_before;
        if let (Some(timeout), Some(timer)) = (this.idle_timeout, this.idle_timer.as_mut()) {
            if progressed {
                timer.as_mut().reset(Instant::now() + timeout);
            }
            if timer.as_mut().poll(cx).is_ready() {
                debug!("Relay idle for {:?}, closing", timeout);
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no traffic for {}s", timeout.as_secs()),
                )));
            }
        }

        Poll::Pending
    }
}

/// Relay bytes between a client and its upstream.
///
/// Returns when the upstream has finished sending and everything it sent
/// has been written to the client. With `idle_timeout` set, a period with no
/// traffic in either direction fails the relay with `ErrorKind::TimedOut`.
///
/// # Errors
///
/// Returns the first I/O error from either direction.
pub async fn relay<C, U>(
    client: &mut C,
    upstream: &mut U,
    idle_timeout: Option<Duration>,
) -> io::Result<RelayStats>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    Relay::new(client, upstream, DEFAULT_BUFFER_SIZE, idle_timeout).await
}
