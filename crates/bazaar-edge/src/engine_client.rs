//! Multiplexed RPC client for the engine.
//!
//! One TCP connection carries many in-flight requests; replies are matched
//! back to callers through a pending map keyed by envelope request id. A
//! broken connection fails every pending call and is re-dialed lazily on the
//! next request. Every call carries a deadline derived from the inbound
//! request budget.

use bazaar_types::{read_frame, write_frame, Envelope, RequestId, RpcRequest, RpcResponse};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("engine unreachable: {0}")]
    Unreachable(String),
    #[error("engine connection lost mid-request")]
    Disconnected,
    #[error("engine call exceeded its deadline")]
    Deadline,
}

type PendingMap = DashMap<Uuid, oneshot::Sender<RpcResponse>>;

struct ClientInner {
    addr: SocketAddr,
    writer: Mutex<Option<OwnedWriteHalf>>,
    pending: PendingMap,
}

#[derive(Clone)]
pub struct EngineClient {
    inner: Arc<ClientInner>,
}

impl EngineClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                addr,
                writer: Mutex::new(None),
                pending: DashMap::new(),
            }),
        }
    }

    /// Issue one request and wait for its reply or the deadline.
    pub async fn call(
        &self,
        request: RpcRequest,
        request_id: RequestId,
        deadline: Duration,
    ) -> Result<RpcResponse, ClientError> {
        let key = *request_id.as_uuid();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner.pending.insert(key, reply_tx);

        if let Err(e) = self.send(Envelope::new(request_id, request)).await {
            self.inner.pending.remove(&key);
            return Err(e);
        }

        match tokio::time::timeout(deadline, reply_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => {
                self.inner.pending.remove(&key);
                Err(ClientError::Deadline)
            }
        }
    }

    async fn send(&self, envelope: Envelope<RpcRequest>) -> Result<(), ClientError> {
        let mut guard = self.inner.writer.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let writer = guard.as_mut().expect("connection just established");
        if let Err(e) = write_frame(writer, &envelope).await {
            // drop the broken connection; the next call re-dials
            *guard = None;
            return Err(ClientError::Unreachable(e.to_string()));
        }
        Ok(())
    }

    async fn connect(&self) -> Result<OwnedWriteHalf, ClientError> {
        let stream = TcpStream::connect(self.inner.addr)
            .await
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;
        debug!(addr = %self.inner.addr, "connected to engine");
        let (read_half, write_half) = stream.into_split();
        tokio::spawn(read_loop(read_half, Arc::clone(&self.inner)));
        Ok(write_half)
    }
}

/// Pump replies into the pending map until the connection dies, then fail
/// whatever is still waiting.
async fn read_loop(mut reader: OwnedReadHalf, inner: Arc<ClientInner>) {
    loop {
        match read_frame::<_, RpcResponse>(&mut reader).await {
            Ok(envelope) => {
                let key = *envelope.request_id.as_uuid();
                match inner.pending.remove(&key) {
                    Some((_, reply_tx)) => {
                        let _ = reply_tx.send(envelope.body);
                    }
                    None => {
                        // deadline already fired for this caller
                        debug!(request_id = %envelope.request_id, "late engine reply dropped");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "engine connection closed");
                break;
            }
        }
    }
    // connection is gone: wake every pending caller with a disconnect
    *inner.writer.lock().await = None;
    let keys: Vec<Uuid> = inner.pending.iter().map(|entry| *entry.key()).collect();
    for key in keys {
        if let Some((_, reply_tx)) = inner.pending.remove(&key) {
            drop(reply_tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal scripted engine: replies Pong to every request.
    async fn pong_server(listener: TcpListener) {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.into_split();
                while let Ok(envelope) = read_frame::<_, RpcRequest>(&mut reader).await {
                    let reply = Envelope::new(envelope.request_id, RpcResponse::Pong);
                    if write_frame(&mut writer, &reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(pong_server(listener));

        let client = EngineClient::new(addr);
        let reply = client
            .call(RpcRequest::Ping, RequestId::new(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reply, RpcResponse::Pong);
    }

    #[tokio::test]
    async fn test_concurrent_calls_multiplex() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(pong_server(listener));

        let client = EngineClient::new(addr);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client
                    .call(RpcRequest::Ping, RequestId::new(), Duration::from_secs(2))
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), RpcResponse::Pong);
        }
    }

    #[tokio::test]
    async fn test_unreachable_engine_errors_fast() {
        // bind-then-drop guarantees a dead port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = EngineClient::new(addr);
        let err = client
            .call(RpcRequest::Ping, RequestId::new(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_silent_server_hits_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accept but never reply
        tokio::spawn(async move {
            let _keep = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let client = EngineClient::new(addr);
        let err = client
            .call(RpcRequest::Ping, RequestId::new(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Deadline));
    }
}
