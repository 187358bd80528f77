//! RPC：JSON over HTTP 的 AdapterControl / Perception / Action / Engine 服务与客户端

pub mod client;
pub mod messages;
pub mod server;

pub use client::{ArgusClient, ClientError};
pub use server::{router, serve, RpcError, RpcState};
