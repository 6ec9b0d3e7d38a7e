//! Cluster fan-out and fan-in
//!
//! - [`Scatter`]: one upstream block shared by many named clients,
//!   broadcasting or distributing rows
//! - [`RemoteBlock`]: proxy that executes a block tree on another node
//! - [`wire`]: request/response contract between nodes
//! - [`network`]: engine registry, request handler, TCP server and
//!   transports

pub mod network;
pub mod remote;
pub mod scatter;
pub mod wire;

pub use network::{EngineRegistry, LoopbackTransport, RemoteRpcHandler, RemoteServer, TcpTransport};
pub use remote::{RemoteBlock, RemoteTransport};
pub use scatter::{route, Scatter, ScatterFetcher, ScatterMode};
pub use wire::{ExecuteRequest, ExecuteResponse, MessageType, ShutdownRequest};
