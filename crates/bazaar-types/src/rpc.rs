//! Internal RPC between the edge and the engine.
//!
//! Two operations (`Negotiate`, `CheckDealStatus`) plus a readiness `Ping`.
//! Messages ride in a versioned envelope carrying the request id as
//! transport metadata, serialized with bincode behind a big-endian `u32`
//! length prefix. Frames are capped at 1 MiB; a peer announcing a larger
//! frame is cut off before any allocation.

use crate::decision::Decision;
use crate::entities::{PaymentInstructions, PaymentProof};
use crate::fault::Fault;
use crate::identity::AgentDid;
use crate::request_id::RequestId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Protocol version stamped on every envelope.
pub const RPC_VERSION: u16 = 1;

/// Hard ceiling on a single frame.
pub const MAX_FRAME_BYTES: u32 = 1024 * 1024;

/// Versioned wrapper for every message in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u16,
    /// Correlation metadata; the engine binds this into its log span.
    pub request_id: RequestId,
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(request_id: RequestId, body: T) -> Self {
        Self {
            version: RPC_VERSION,
            request_id,
            body,
        }
    }
}

/// A negotiation turn as forwarded by the edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiateRequest {
    pub caller: AgentDid,
    pub reputation: Option<f64>,
    pub item_id: String,
    pub bid_amount: f64,
    /// Fiat currency of the bid, e.g. `USD`.
    pub currency_code: String,
}

/// Requests the edge may issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcRequest {
    Negotiate(NegotiateRequest),
    CheckDealStatus { deal_id: Uuid },
    Ping,
}

/// Engine reply to a negotiation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiateReply {
    pub session_token: String,
    /// Unix seconds until which the decision can be acted upon.
    pub valid_until: u64,
    pub decision: Decision,
    /// Present exactly when the decision locked a deal for payment.
    pub payment_instructions: Option<PaymentInstructions>,
}

/// Engine reply to a status poll. `NotFound` travels as a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DealStatusReply {
    Paid {
        reservation_code: String,
        proof: PaymentProof,
    },
    Pending {
        payment_instructions: PaymentInstructions,
    },
    Expired,
}

/// Responses the engine may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcResponse {
    Negotiate(NegotiateReply),
    DealStatus(DealStatusReply),
    Pong,
    Fault(Fault),
}

/// Framing failures.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte cap")]
    TooLarge(u32),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("unsupported protocol version {0}")]
    Version(u16),
}

/// Write one length-prefixed frame.
pub async fn write_frame<W, T>(writer: &mut W, envelope: &Envelope<T>) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = bincode::serialize(envelope)?;
    let len = u32::try_from(bytes.len()).map_err(|_| FrameError::TooLarge(u32::MAX))?;
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(len));
    }
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame, enforcing the size cap and the protocol
/// version before handing the body to the caller.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Envelope<T>, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(len));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    let envelope: Envelope<T> = bincode::deserialize(&buf)?;
    if envelope.version != RPC_VERSION {
        return Err(FrameError::Version(envelope.version));
    }
    Ok(envelope)
}
