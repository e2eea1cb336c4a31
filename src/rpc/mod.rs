//! Request/response RPC over AMQP (spec §4.3, §4.4).

pub mod client;
pub mod server;

pub use client::{ClientMiddleware, RpcClient, RpcClientConfig, RpcClientOptions, DIRECT_REPLY_TO};
pub use server::{AckMode, RpcServer, RpcServerConfig};
