use anyhow::{Result, anyhow, bail};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;

use super::protocol::{Request, Response, read_body_into_spool, read_frame, write_body, write_frame};
use crate::membership::types::NodeId;
use crate::store::types::Spool;

/// Peer-side client for forwarded operations. Every call dials, performs one
/// operation under a single deadline, and drops the connection. Failures only
/// affect the attempt; the router decides what to try next.
#[derive(Debug, Clone)]
pub struct PeerClient {
    timeout: Duration,
    from: NodeId,
}

impl PeerClient {
    pub fn new(timeout: Duration, from: NodeId) -> Self {
        Self { timeout, from }
    }

    /// Fetches `key` from a peer into `spool`. `Ok(Some(size))` on a hit,
    /// `Ok(None)` when the peer does not have the key.
    pub async fn fetch(
        &self,
        addr: SocketAddr,
        key: &str,
        hops: u32,
        spool: &mut Spool,
    ) -> Result<Option<u64>> {
        let request = Request::ForwardGet {
            key: key.to_string(),
            hops,
            from: self.from.clone(),
        };

        tokio::time::timeout(self.timeout, async {
            let mut stream = TcpStream::connect(addr).await?;
            write_frame(&mut stream, &request).await?;
            match read_frame::<_, Response>(&mut stream).await? {
                Response::Found { size } => {
                    let received = read_body_into_spool(&mut stream, spool).await?;
                    if received != size {
                        bail!("truncated body: expected {} bytes, got {}", size, received);
                    }
                    Ok(Some(received))
                }
                Response::NotFound => Ok(None),
                Response::Failed { message } => bail!("peer reported failure: {}", message),
                other => bail!("unexpected response: {:?}", other),
            }
        })
        .await
        .map_err(|_| anyhow!("fetch from {} timed out", addr))?
    }

    /// Pushes a blob to a peer via `ForwardPut`.
    pub async fn push<R>(&self, addr: SocketAddr, key: &str, hops: u32, body: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let request = Request::ForwardPut {
            key: key.to_string(),
            hops,
            from: self.from.clone(),
        };

        tokio::time::timeout(self.timeout, async {
            let mut stream = TcpStream::connect(addr).await?;
            write_frame(&mut stream, &request).await?;
            write_body(&mut stream, body).await?;
            match read_frame::<_, Response>(&mut stream).await? {
                Response::Done => Ok(()),
                Response::Failed { message } => bail!("peer reported failure: {}", message),
                other => bail!("unexpected response: {:?}", other),
            }
        })
        .await
        .map_err(|_| anyhow!("push to {} timed out", addr))?
    }

    pub async fn delete(&self, addr: SocketAddr, key: &str) -> Result<()> {
        let request = Request::ForwardDelete {
            key: key.to_string(),
            from: self.from.clone(),
        };

        tokio::time::timeout(self.timeout, async {
            let mut stream = TcpStream::connect(addr).await?;
            write_frame(&mut stream, &request).await?;
            match read_frame::<_, Response>(&mut stream).await? {
                Response::Done => Ok(()),
                Response::Failed { message } => bail!("peer reported failure: {}", message),
                other => bail!("unexpected response: {:?}", other),
            }
        })
        .await
        .map_err(|_| anyhow!("delete on {} timed out", addr))?
    }
}
