use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::CvsError;

type DynRead = Box<dyn AsyncRead + Unpin + Send>;
type DynWrite = Box<dyn AsyncWrite + Unpin + Send>;

const READ_CHUNK: usize = 16 * 1024;

struct Connection {
    read: DynRead,
    write: DynWrite,
    buf: Vec<u8>,
    pos: usize,
}

/// Timeouts applied by a [`Transport`].
#[derive(Clone, Copy, Debug)]
pub(crate) struct TransportTimeouts {
    pub(crate) connect: Duration,
    pub(crate) write: Duration,
    pub(crate) read: Option<Duration>,
}

/// One buffered TCP connection to a pserver (or none).
pub(crate) struct Transport {
    conn: Option<Connection>,
    timeouts: TransportTimeouts,
}

impl Transport {
    pub(crate) fn new(timeouts: TransportTimeouts) -> Self {
        Self {
            conn: None,
            timeouts,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub(crate) async fn connect(&mut self, address: &str, port: u16) -> Result<(), CvsError> {
        self.close();
        let addr = format_addr(address, port);
        let stream = tokio::time::timeout(self.timeouts.connect, TcpStream::connect(&addr))
            .await
            .map_err(|_| CvsError::Connection {
                addr: addr.clone(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })?
            .map_err(|source| CvsError::Connection {
                addr: addr.clone(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        let (read, write) = stream.into_split();
        self.conn = Some(Connection {
            read: Box::new(read),
            write: Box::new(write),
            buf: Vec::new(),
            pos: 0,
        });
        debug!(addr = %addr, "connected");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn attach<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        self.conn = Some(Connection {
            read: Box::new(read),
            write: Box::new(write),
            buf: Vec::new(),
            pos: 0,
        });
    }

    /// Drops the connection. Safe to call when already closed.
    pub(crate) fn close(&mut self) {
        if self.conn.take().is_some() {
            debug!("connection closed");
        }
    }

    pub(crate) async fn send(&mut self, bytes: &[u8]) -> Result<(), CvsError> {
        let write_timeout = self.timeouts.write;
        let conn = self.conn_mut()?;
        let result = tokio::time::timeout(write_timeout, async {
            conn.write.write_all(bytes).await?;
            conn.write.flush().await
        })
        .await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.close();
                Err(CvsError::Transport(err))
            }
            Err(_) => {
                self.close();
                Err(CvsError::timed_out("write"))
            }
        }
    }

    /// Reads exactly `n` bytes.
    pub(crate) async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, CvsError> {
        let mut out = Vec::with_capacity(n.min(READ_CHUNK));
        while out.len() < n {
            let conn = self.conn_mut()?;
            if conn.pos < conn.buf.len() {
                let take = (n - out.len()).min(conn.buf.len() - conn.pos);
                out.extend_from_slice(&conn.buf[conn.pos..conn.pos + take]);
                conn.pos += take;
            } else {
                self.fill().await?;
            }
        }
        Ok(out)
    }

    /// Reads up to (and consumes) `delim`; the delimiter is not returned.
    pub(crate) async fn read_token(&mut self, delim: u8) -> Result<Vec<u8>, CvsError> {
        let mut out = Vec::new();
        loop {
            let conn = self.conn_mut()?;
            if conn.pos < conn.buf.len() {
                let avail = &conn.buf[conn.pos..];
                if let Some(idx) = avail.iter().position(|b| *b == delim) {
                    out.extend_from_slice(&avail[..idx]);
                    conn.pos += idx + 1;
                    return Ok(out);
                }
                out.extend_from_slice(avail);
                conn.pos = conn.buf.len();
            }
            self.fill().await?;
        }
    }

    /// Reads one `\n`-terminated line.
    pub(crate) async fn read_line(&mut self) -> Result<Vec<u8>, CvsError> {
        self.read_token(b'\n').await
    }

    /// Waits until at least one byte can be read.
    ///
    /// `Some(timeout)` bounds the wait and yields [`CvsError::NotReady`] when
    /// nothing arrived; `None` waits indefinitely.
    pub(crate) async fn poll_readable(&mut self, timeout: Option<Duration>) -> Result<(), CvsError> {
        let conn = self.conn_mut()?;
        if conn.pos < conn.buf.len() {
            return Ok(());
        }
        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.fill_unbounded()).await {
                Ok(result) => result,
                Err(_) => Err(CvsError::NotReady),
            },
            None => self.fill_unbounded().await,
        }
    }

    async fn fill(&mut self) -> Result<(), CvsError> {
        match self.timeouts.read {
            Some(timeout) => match tokio::time::timeout(timeout, self.fill_unbounded()).await {
                Ok(result) => result,
                Err(_) => {
                    self.close();
                    Err(CvsError::timed_out("read"))
                }
            },
            None => self.fill_unbounded().await,
        }
    }

    /// One `read` call appended to the buffer. Cancel-safe: a dropped future
    /// loses no bytes.
    async fn fill_unbounded(&mut self) -> Result<(), CvsError> {
        let conn = self.conn_mut()?;
        if conn.pos > 0 {
            let len = conn.buf.len();
            conn.buf.copy_within(conn.pos..len, 0);
            conn.buf.truncate(len - conn.pos);
            conn.pos = 0;
        }
        let mut temp = [0u8; READ_CHUNK];
        let result = conn.read.read(&mut temp).await;
        match result {
            Ok(0) => {
                self.close();
                Err(CvsError::eof())
            }
            Ok(n) => {
                conn.buf.extend_from_slice(&temp[..n]);
                Ok(())
            }
            Err(err) => {
                self.close();
                Err(CvsError::Transport(err))
            }
        }
    }

    fn conn_mut(&mut self) -> Result<&mut Connection, CvsError> {
        self.conn
            .as_mut()
            .ok_or_else(|| CvsError::Session("not connected".into()))
    }
}

/// Formats `host:port` for `TcpStream::connect`, bracketing IPv6 literals.
pub(crate) fn format_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
