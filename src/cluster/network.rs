//! Remote execution server and transports

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use super::remote::RemoteTransport;
use super::wire::{
    decode_response, encode_request, encode_response, ExecuteRequest, ExecuteResponse,
    MessageType, ShutdownRequest,
};
use crate::config::EngineConfig;
use crate::engine::{ExecutionEngine, ExecutionState, SharedEngine};
use crate::executor::error::{ExecError, ExecResult};

type EngineKey = (u64, String);

/// Engines reachable from remote peers, keyed by query id and client id
#[derive(Default)]
pub struct EngineRegistry {
    engines: RwLock<HashMap<EngineKey, SharedEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `engine` reachable as `(query_id, client_id)`
    pub fn register(
        &self,
        query_id: u64,
        client_id: impl Into<String>,
        engine: ExecutionEngine,
    ) -> ExecResult<SharedEngine> {
        let client_id = client_id.into();
        let mut engines = self.engines.write();
        let key = (query_id, client_id);
        if engines.contains_key(&key) {
            return Err(ExecError::DuplicateClient(key.1));
        }
        let engine = Arc::new(Mutex::new(engine));
        engines.insert(key, Arc::clone(&engine));
        Ok(engine)
    }

    pub fn get(&self, query_id: u64, client_id: &str) -> Option<SharedEngine> {
        self.engines
            .read()
            .get(&(query_id, client_id.to_string()))
            .cloned()
    }

    pub fn remove(&self, query_id: u64, client_id: &str) -> Option<SharedEngine> {
        self.engines.write().remove(&(query_id, client_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.engines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.read().is_empty()
    }
}

/// Serves execute and shutdown requests against the registry
pub struct RemoteRpcHandler {
    registry: Arc<EngineRegistry>,
    timeout: Duration,
    max_frame_bytes: usize,
}

impl RemoteRpcHandler {
    /// Handler with the remote timeout and frame bound of `config`
    pub fn new(registry: Arc<EngineRegistry>, config: &EngineConfig) -> Self {
        Self {
            registry,
            timeout: config.remote_timeout(),
            max_frame_bytes: config.max_frame_bytes,
        }
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    /// Largest request body this handler reads
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Run the engine until it has an answer other than `Waiting`
    pub async fn execute(&self, request: ExecuteRequest) -> ExecResult<ExecuteResponse> {
        let engine = self
            .registry
            .get(request.query_id, &request.client_id)
            .ok_or_else(|| ExecError::UnknownClient(request.client_id.clone()))?;
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            let (result, wakeup) = {
                let mut engine = engine.lock();
                let wakeup = engine.context().wakeup();
                (engine.execute(request.stack.clone())?, wakeup)
            };
            if result.state != ExecutionState::Waiting {
                return Ok(result.into());
            }
            tokio::time::timeout_at(deadline, wakeup.notified())
                .await
                .map_err(|_| {
                    ExecError::Remote(format!(
                        "engine {}/{} did not answer within {:?}",
                        request.query_id, request.client_id, self.timeout
                    ))
                })?;
        }
    }

    /// Shut the engine down and forget it
    pub async fn shutdown(&self, request: ShutdownRequest) -> ExecResult<()> {
        let engine = self
            .registry
            .remove(request.query_id, &request.client_id)
            .ok_or_else(|| ExecError::UnknownClient(request.client_id.clone()))?;
        tracing::debug!(
            query_id = request.query_id,
            client = %request.client_id,
            code = request.code,
            "remote shutdown"
        );
        let result = engine.lock().shutdown(request.code);
        result
    }

    /// Handle an incoming request frame body
    pub async fn handle_request(&self, msg_type: u8, body: &[u8]) -> Result<Bytes, String> {
        let msg_type = MessageType::try_from(msg_type)
            .map_err(|_| format!("Unknown message type: {}", msg_type))?;

        match msg_type {
            MessageType::Execute => {
                let req: ExecuteRequest = bincode::deserialize(body).map_err(|e| e.to_string())?;
                let resp = self.execute(req).await.map_err(|e| e.to_string());
                encode_response(&resp)
            }
            MessageType::Shutdown => {
                let req: ShutdownRequest =
                    bincode::deserialize(body).map_err(|e| e.to_string())?;
                let resp = self.shutdown(req).await.map_err(|e| e.to_string());
                encode_response(&resp)
            }
        }
    }
}

/// TCP server for remote execution requests
pub struct RemoteServer {
    addr: SocketAddr,
    handler: Arc<RemoteRpcHandler>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl RemoteServer {
    pub fn new(addr: SocketAddr, handler: Arc<RemoteRpcHandler>) -> Self {
        Self {
            addr,
            handler,
            shutdown_tx: None,
        }
    }

    /// Bind and start accepting connections; returns the bound address
    pub async fn start(&mut self) -> ExecResult<SocketAddr> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        let handler = Arc::clone(&self.handler);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        tracing::info!(addr = %local_addr, "Remote execution server listening");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                let handler = handler.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, handler).await {
                                        tracing::warn!(%peer_addr, error = %e, "Remote connection error");
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Accept error");
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("Remote execution server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Stop accepting connections
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for RemoteServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    handler: Arc<RemoteRpcHandler>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Read: [msg_type: u8][len: u32][body]
    let msg_type = stream.read_u8().await?;
    let len = stream.read_u32().await? as usize;

    let response = if len > handler.max_frame_bytes() {
        tracing::warn!(len, max = handler.max_frame_bytes(), "Rejecting oversized request");
        // Discard the body unread so the peer still gets the answer
        tokio::io::copy(&mut (&mut stream).take(len as u64), &mut tokio::io::sink()).await?;
        encode_response::<()>(&Err(format!(
            "request frame of {} bytes exceeds limit of {} bytes",
            len,
            handler.max_frame_bytes()
        )))?
    } else {
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;
        match handler.handle_request(msg_type, &body).await {
            Ok(response) => response,
            Err(e) => encode_response::<()>(&Err(e))?,
        }
    };

    // Write response: [len: u32][body]
    stream.write_u32(response.len() as u32).await?;
    stream.write_all(&response).await?;
    stream.flush().await?;

    Ok(())
}

/// Transport opening one TCP connection per request
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: SocketAddr,
    timeout: Duration,
    max_frame_bytes: usize,
}

impl TcpTransport {
    /// Transport to `addr` with the remote timeout and frame bound of `config`
    pub fn new(addr: SocketAddr, config: &EngineConfig) -> Self {
        Self {
            addr,
            timeout: config.remote_timeout(),
            max_frame_bytes: config.max_frame_bytes,
        }
    }

    async fn send_request<Req, Resp>(&self, msg_type: MessageType, request: &Req) -> ExecResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        tokio::time::timeout(self.timeout, self.round_trip(msg_type, request))
            .await
            .map_err(|_| {
                ExecError::Remote(format!("request to {} timed out after {:?}", self.addr, self.timeout))
            })?
    }

    async fn round_trip<Req, Resp>(&self, msg_type: MessageType, request: &Req) -> ExecResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let frame = encode_request(msg_type, request)?;
        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(&frame).await?;
        stream.flush().await?;

        // Read response: [len: u32][body]
        let len = stream.read_u32().await? as usize;
        if len > self.max_frame_bytes {
            return Err(ExecError::Remote(format!(
                "response frame of {} bytes from {} exceeds limit of {} bytes",
                len, self.addr, self.max_frame_bytes
            )));
        }
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;

        decode_response::<Resp>(&body)?.map_err(ExecError::Remote)
    }
}

#[async_trait]
impl RemoteTransport for TcpTransport {
    async fn execute(&self, request: ExecuteRequest) -> ExecResult<ExecuteResponse> {
        self.send_request(MessageType::Execute, &request).await
    }

    async fn shutdown(&self, request: ShutdownRequest) -> ExecResult<()> {
        self.send_request(MessageType::Shutdown, &request).await
    }
}

/// Transport calling a handler in the same process
#[derive(Clone)]
pub struct LoopbackTransport {
    handler: Arc<RemoteRpcHandler>,
}

impl LoopbackTransport {
    pub fn new(handler: Arc<RemoteRpcHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl RemoteTransport for LoopbackTransport {
    async fn execute(&self, request: ExecuteRequest) -> ExecResult<ExecuteResponse> {
        self.handler.execute(request).await
    }

    async fn shutdown(&self, request: ShutdownRequest) -> ExecResult<()> {
        self.handler.shutdown(request).await
    }
}
