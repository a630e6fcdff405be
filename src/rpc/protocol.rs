//! Cache Network Protocol
//!
//! Defines the operations and framing used for client-to-node and internode
//! communication. `Get`/`Put`/`Delete` are the client surface; the `Forward*`
//! variants are peer-only and carry a hop count so forwarding chains stay
//! bounded while membership views diverge, plus the sender's id so traffic
//! doubles as a liveness signal.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::membership::types::NodeId;
use crate::store::types::Spool;

/// Upper bound on a single body chunk; large blobs are split across many.
pub const CHUNK_SIZE: usize = 64 * 1024;
/// Upper bound on a header frame. Headers carry keys, not blobs.
pub const MAX_HEADER_FRAME: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Get {
        key: String,
    },
    /// Followed by a chunked body.
    Put {
        key: String,
    },
    Delete {
        key: String,
    },
    ForwardGet {
        key: String,
        hops: u32,
        from: NodeId,
    },
    /// Followed by a chunked body.
    ForwardPut {
        key: String,
        hops: u32,
        from: NodeId,
    },
    ForwardDelete {
        key: String,
        from: NodeId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Followed by a chunked body of exactly `size` bytes.
    Found {
        size: u64,
    },
    NotFound,
    Done,
    Failed {
        message: String,
    },
}

pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = bincode::serialize(msg)?;
    if encoded.len() > MAX_HEADER_FRAME {
        bail!("header frame too large: {} bytes", encoded.len());
    }
    writer.write_u32(encoded.len() as u32).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_HEADER_FRAME {
        bail!("oversized header frame: {} bytes", len);
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(bincode::deserialize(&buf)?)
}

/// Streams `reader` to `writer` as bounded chunks and terminates the body.
/// Returns the bytes sent.
pub async fn write_body<W, R>(writer: &mut W, reader: &mut R) -> Result<u64>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_u32(n as u32).await?;
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.write_u32(0).await?;
    writer.flush().await?;
    Ok(total)
}

/// Drains a chunked body into a spool. Returns the bytes received.
pub async fn read_body_into_spool<R>(reader: &mut R, spool: &mut Spool) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read_u32().await? as usize;
        if n == 0 {
            break;
        }
        if n > CHUNK_SIZE {
            bail!("oversized body chunk: {} bytes", n);
        }
        reader.read_exact(&mut buf[..n]).await?;
        spool.write_chunk(&buf[..n]).await?;
        total += n as u64;
    }
    Ok(total)
}
