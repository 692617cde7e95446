// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Line-delimited JSON framing shared by JRPC and YRPC: one JSON object per
//! line, no trailing whitespace.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Errors framing or parsing a single RPC line.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("connection closed before a frame was read")]
    Eof,
}

/// `{"method": <str>, "params": <arbitrary>}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub params: serde_json::Value,
}

/// `{"result": <arbitrary>}` or `{"error": <string>}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Ok { result: serde_json::Value },
    Err { error: String },
}

impl Reply {
    pub fn ok(result: serde_json::Value) -> Self {
        Reply::Ok { result }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Reply::Err {
            error: message.into(),
        }
    }
}

/// Serialize `value` as one JSON line and write it, followed by `\n`.
pub async fn write_frame<W, T>(w: &mut W, value: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    w.write_all(&line).await?;
    w.flush().await?;
    Ok(())
}

/// Read one line and parse it as `T`. Returns `Ok(None)` on clean EOF
/// (nothing read before the stream closed).
pub async fn read_frame<R, T>(r: &mut BufReader<R>) -> Result<Option<T>, FrameError>
where
    R: tokio::io::AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let n = r.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\n', '\r']);
    Ok(Some(serde_json::from_str(trimmed)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn request_round_trips_through_a_line() {
        let mut buf = Vec::new();
        let req = Request {
            method: "echo".to_string(),
            params: serde_json::json!({"msg": "hi"}),
        };
        write_frame(&mut buf, &req).await.unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));

        let mut reader = BufReader::new(&buf[..]);
        let parsed: Request = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(parsed.method, "echo");
    }

    #[tokio::test]
    async fn eof_before_any_bytes_is_none() {
        let mut reader = BufReader::new(&b""[..]);
        let parsed: Result<Option<Request>, FrameError> = read_frame(&mut reader).await;
        assert!(matches!(parsed, Ok(None)));
    }

    #[tokio::test]
    async fn reply_variants_serialize_distinctly() {
        let ok = Reply::ok(serde_json::json!(42));
        let err = Reply::err("boom");
        let ok_json = serde_json::to_string(&ok).unwrap();
        let err_json = serde_json::to_string(&err).unwrap();
        assert!(ok_json.contains("result"));
        assert!(err_json.contains("error"));
    }
}
