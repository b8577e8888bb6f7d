//! # Bazaar Shared Types
//!
//! The wire contract shared by the edge and the engine: agent identities,
//! request ids, the decision/reveal sum types, payment views, fault codes,
//! and the framed RPC envelope the two tiers speak over TCP.
//!
//! Nothing in this crate carries a hidden floor price or a reservation-code
//! plaintext outside of an explicitly PAID status reply. The engine's private
//! entities (items, deal rows) live in `bazaar-engine`.

pub mod decision;
pub mod entities;
pub mod fault;
pub mod identity;
pub mod request_id;
pub mod rpc;

pub use decision::{Decision, Reveal};
pub use entities::{CryptoCurrency, PaymentInstructions, PaymentProof};
pub use fault::{Fault, FaultKind};
pub use identity::{AgentDid, DidError, VerifiedCaller};
pub use request_id::RequestId;
pub use rpc::{
    read_frame, write_frame, DealStatusReply, Envelope, FrameError, NegotiateReply,
    NegotiateRequest, RpcRequest, RpcResponse, RPC_VERSION,
};
