//! Cluster wire contract
//!
//! Requests are framed as `[msg_type: u8][len: u32][bincode body]`,
//! responses as `[len: u32][bincode Result<T, String>]`.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::block::{into_unique, RowBlock};
use crate::demand::{DemandStack, SkipLedger};
use crate::engine::{ExecuteResult, ExecutionState};
use crate::executor::error::ExecResult;

/// Message types of the remote execution protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Execute = 1,
    Shutdown = 2,
}

impl TryFrom<u8> for MessageType {
    type Error = ();
    fn try_from(v: u8) -> Result<Self, ()> {
        match v {
            1 => Ok(Self::Execute),
            2 => Ok(Self::Shutdown),
            _ => Err(()),
        }
    }
}

/// Execute the engine registered as `(query_id, client_id)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub query_id: u64,
    pub client_id: String,
    pub stack: DemandStack,
}

/// Answer to an [`ExecuteRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub state: ExecutionState,
    pub skipped: SkipLedger,
    pub block: Option<RowBlock>,
}

impl From<ExecuteResult> for ExecuteResponse {
    fn from(result: ExecuteResult) -> Self {
        ExecuteResponse {
            state: result.state,
            skipped: result.skipped,
            block: result.block.map(into_unique),
        }
    }
}

/// Release the engine registered as `(query_id, client_id)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownRequest {
    pub query_id: u64,
    pub client_id: String,
    pub code: i32,
}

/// Build a request frame
pub fn encode_request<T: Serialize>(msg_type: MessageType, request: &T) -> ExecResult<Bytes> {
    let body = bincode::serialize(request)?;
    let mut buf = BytesMut::with_capacity(5 + body.len());
    buf.put_u8(msg_type as u8);
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Response body carrying either the answer or the remote error text
pub fn encode_response<T: Serialize>(response: &Result<T, String>) -> Result<Bytes, String> {
    bincode::serialize(response)
        .map(Bytes::from)
        .map_err(|e| e.to_string())
}

/// Decode a response body
pub fn decode_response<T: DeserializeOwned>(body: &[u8]) -> ExecResult<Result<T, String>> {
    Ok(bincode::deserialize(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Value;
    use crate::demand::Call;

    #[test]
    fn test_message_type() {
        assert_eq!(MessageType::try_from(1), Ok(MessageType::Execute));
        assert_eq!(MessageType::try_from(2), Ok(MessageType::Shutdown));
        assert!(MessageType::try_from(9).is_err());
    }

    #[test]
    fn test_request_frame_layout() {
        let request = ExecuteRequest {
            query_id: 3,
            client_id: "c".to_string(),
            stack: DemandStack::new(Call::with_hard_limit(5)).with_outer(Call::new().offset(1)),
        };
        let frame = encode_request(MessageType::Execute, &request).unwrap();
        assert_eq!(frame[0], MessageType::Execute as u8);
        let len = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        assert_eq!(len, frame.len() - 5);

        let decoded: ExecuteRequest = bincode::deserialize(&frame[5..]).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_error_response_decodes_as_any_type() {
        let body = encode_response::<()>(&Err("boom".to_string())).unwrap();
        let decoded: Result<ExecuteResponse, String> = decode_response(&body).unwrap();
        assert_eq!(decoded, Err("boom".to_string()));

        let mut block = RowBlock::new(2, 1);
        block.push_row(vec![Value::from("x")]).unwrap();
        block.push_shadow_row(0).unwrap();
        let response = ExecuteResponse {
            state: ExecutionState::HasMore,
            skipped: SkipLedger::from_counts(vec![1, 0]),
            block: Some(block),
        };
        let body = encode_response(&Ok(response.clone())).unwrap();
        let decoded: Result<ExecuteResponse, String> = decode_response(&body).unwrap();
        assert_eq!(decoded, Ok(response));
    }
}
