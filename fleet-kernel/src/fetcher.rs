//! One stats read cycle against a uWSGI stats socket.
//!
//! The protocol has no request and no length prefix: connect, read until the
//! server closes the socket, done. Connecting and reading are separate steps so
//! the poller can track where a cycle failed.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::FetchError;
use crate::models::HostAddress;

#[async_trait]
pub trait StatsFetcher: Send + Sync {
    async fn connect(&self, target: &HostAddress) -> Result<Box<dyn StatsConnection>, FetchError>;
}

#[async_trait]
pub trait StatsConnection: Send {
    /// Read the whole response, up to end-of-stream.
    async fn read_to_end(self: Box<Self>) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct TcpStatsFetcher {
    connect_timeout: Duration,
    read_timeout: Duration,
    max_response_bytes: usize,
}

impl TcpStatsFetcher {
    pub fn new(
        connect_timeout: Duration,
        read_timeout: Duration,
        max_response_bytes: usize,
    ) -> Self {
        Self {
            connect_timeout,
            read_timeout,
            max_response_bytes,
        }
    }
}

#[async_trait]
impl StatsFetcher for TcpStatsFetcher {
    async fn connect(&self, target: &HostAddress) -> Result<Box<dyn StatsConnection>, FetchError> {
        let addr = target.to_string();
        let stream = match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(FetchError::Connect { target: addr, source }),
            Err(_) => {
                return Err(FetchError::ConnectTimeout {
                    target: addr,
                    timeout: self.connect_timeout,
                })
            }
        };
        debug!("connected to {}", addr);
        Ok(Box::new(TcpStatsConnection {
            target: addr,
            stream,
            read_timeout: self.read_timeout,
            limit: self.max_response_bytes,
        }))
    }
}

struct TcpStatsConnection {
    target: String,
    stream: TcpStream,
    read_timeout: Duration,
    limit: usize,
}

#[async_trait]
impl StatsConnection for TcpStatsConnection {
    async fn read_to_end(self: Box<Self>) -> Result<Vec<u8>, FetchError> {
        let TcpStatsConnection {
            target,
            stream,
            read_timeout,
            limit,
        } = *self;
        let mut buf = Vec::with_capacity(16 * 1024);
        // one byte past the limit tells "exactly at limit" from "too large"
        let mut limited = stream.take(limit as u64 + 1);
        match timeout(read_timeout, limited.read_to_end(&mut buf)).await {
            Ok(Ok(_)) => {}
            Ok(Err(source)) => return Err(FetchError::Read { target, source }),
            Err(_) => {
                return Err(FetchError::ReadTimeout {
                    target,
                    timeout: read_timeout,
                })
            }
        }
        if buf.len() > limit {
            return Err(FetchError::TooLarge { target, limit });
        }
        debug!("read {} bytes from {}", buf.len(), target);
        Ok(buf)
    }
}
