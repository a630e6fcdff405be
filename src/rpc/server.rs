use anyhow::Result;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

use super::protocol::{Request, Response, read_body_into_spool, read_frame, write_body, write_frame};
use crate::router::service::CacheRouter;
use crate::store::types::Blob;

/// Accept loop for the binary protocol. One task per connection, one
/// operation per connection; every operation delegates to the shared router.
pub async fn serve(listener: TcpListener, router: Arc<CacheRouter>) -> Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let router = router.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, router).await {
                tracing::debug!("RPC connection from {} ended: {}", peer_addr, e);
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, router: Arc<CacheRouter>) -> Result<()> {
    let request: Request = read_frame(&mut stream).await?;

    match request {
        Request::Get { key } => match router.get(&key).await {
            Ok(Some(blob)) => send_blob(&mut stream, blob).await?,
            Ok(None) => write_frame(&mut stream, &Response::NotFound).await?,
            Err(e) => send_failure(&mut stream, e.to_string()).await?,
        },

        Request::Put { key } => {
            let outcome = receive_and_put(&mut stream, &router, &key).await;
            match outcome {
                Ok(()) => write_frame(&mut stream, &Response::Done).await?,
                Err(e) => send_failure(&mut stream, e.to_string()).await?,
            }
        }

        Request::Delete { key } => match router.delete(&key).await {
            Ok(()) => write_frame(&mut stream, &Response::Done).await?,
            Err(e) => send_failure(&mut stream, e.to_string()).await?,
        },

        Request::ForwardGet { key, hops, from } => {
            router.membership().note_peer_activity(&from);
            match router.forward_get(&key, hops).await {
                Ok(Some(blob)) => send_blob(&mut stream, blob).await?,
                Ok(None) => write_frame(&mut stream, &Response::NotFound).await?,
                Err(e) => send_failure(&mut stream, e.to_string()).await?,
            }
        }

        Request::ForwardPut { key, hops, from } => {
            router.membership().note_peer_activity(&from);
            let outcome = receive_and_forward_put(&mut stream, &router, &key, hops).await;
            match outcome {
                Ok(()) => write_frame(&mut stream, &Response::Done).await?,
                Err(e) => send_failure(&mut stream, e.to_string()).await?,
            }
        }

        Request::ForwardDelete { key, from } => {
            router.membership().note_peer_activity(&from);
            match router.forward_delete(&key).await {
                Ok(()) => write_frame(&mut stream, &Response::Done).await?,
                Err(e) => send_failure(&mut stream, e.to_string()).await?,
            }
        }
    }

    Ok(())
}

async fn receive_and_put(
    stream: &mut TcpStream,
    router: &Arc<CacheRouter>,
    key: &str,
) -> Result<()> {
    let mut spool = router.store().spool().await?;
    read_body_into_spool(stream, &mut spool).await?;
    router.put(key, spool).await?;
    Ok(())
}

async fn receive_and_forward_put(
    stream: &mut TcpStream,
    router: &Arc<CacheRouter>,
    key: &str,
    hops: u32,
) -> Result<()> {
    let mut spool = router.store().spool().await?;
    read_body_into_spool(stream, &mut spool).await?;
    router.forward_put(key, hops, spool).await?;
    Ok(())
}

async fn send_blob(stream: &mut TcpStream, blob: Blob) -> Result<()> {
    let (size, mut file, _hold) = blob.into_parts();
    write_frame(stream, &Response::Found { size }).await?;
    write_body(stream, &mut file).await?;
    Ok(())
}

async fn send_failure(stream: &mut TcpStream, message: String) -> Result<()> {
    tracing::warn!("RPC operation failed: {}", message);
    write_frame(stream, &Response::Failed { message }).await
}
