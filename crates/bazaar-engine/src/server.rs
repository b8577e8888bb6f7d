//! Framed RPC server.
//!
//! One task per connection, one task per in-flight request. Responses are
//! funneled through a per-connection channel so slow requests (a chain probe
//! can take seconds) never block faster ones on the same socket; the edge
//! matches replies to callers by envelope request id, so out-of-order writes
//! are fine.

use crate::service::NegotiationService;
use bazaar_types::{read_frame, write_frame, Envelope, FrameError, RpcRequest, RpcResponse};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const RESPONSE_QUEUE_DEPTH: usize = 64;

/// Accept loop. Runs until the listener errors or the task is dropped.
pub async fn serve(listener: TcpListener, service: Arc<NegotiationService>) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "engine rpc listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "edge connected");
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            handle_connection(stream, service).await;
            debug!(%peer, "edge disconnected");
        });
    }
}

async fn handle_connection(stream: TcpStream, service: Arc<NegotiationService>) {
    let (mut reader, mut writer) = stream.into_split();
    let (response_tx, mut response_rx) =
        mpsc::channel::<Envelope<RpcResponse>>(RESPONSE_QUEUE_DEPTH);

    let writer_task = tokio::spawn(async move {
        while let Some(envelope) = response_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &envelope).await {
                warn!(error = %e, "dropping connection on write failure");
                break;
            }
        }
    });

    loop {
        match read_frame::<_, RpcRequest>(&mut reader).await {
            Ok(envelope) => {
                let service = Arc::clone(&service);
                let response_tx = response_tx.clone();
                tokio::spawn(async move {
                    let response = service.dispatch(envelope).await;
                    // a closed channel means the writer died; nothing to do
                    let _ = response_tx.send(response).await;
                });
            }
            Err(FrameError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                warn!(error = %e, "dropping connection on bad frame");
                break;
            }
        }
    }
    drop(response_tx);
    let _ = writer_task.await;
}
