//! Client library for the BLP Monitor wire protocol.
//!
//! [`Client`] speaks line-delimited JSON over TCP; [`render`] turns a
//! [`Response`] into the text the `blp-client` binary prints.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

pub use blp_monitor::kernel::{Request, Response};

/// Client-side failures. Error envelopes from the server are not errors here.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The monitor could not be reached.
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        /// Address tried.
        addr: String,
        /// Underlying failure.
        source: std::io::Error,
    },
    /// Reading or writing the connection failed.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    /// The monitor sent something that is not a response envelope.
    #[error("unreadable response: {0}")]
    Decode(#[from] serde_json::Error),
    /// The monitor closed the connection before answering.
    #[error("connection closed by monitor")]
    Closed,
}

/// One open connection to a monitor.
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Connect to `addr` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if the connection is refused.
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: addr.to_owned(),
                source,
            })?;
        debug!(addr, "connected");
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
        })
    }

    /// Send one action and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails; an error envelope is `Ok`.
    pub async fn send(&mut self, action: &str, params: Value) -> Result<Response, ClientError> {
        self.request(&Request::new(action, params)).await
    }

    /// Send a prepared request and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails; an error envelope is `Ok`.
    pub async fn request(&mut self, request: &Request) -> Result<Response, ClientError> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply).await? == 0 {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(reply.trim_end())?)
    }
}

/// `{"id", "level", "categories"?}` parameters for label-setting actions.
pub fn label_params(id: &str, level: i64, categories: &[String]) -> Value {
    let mut params = Map::new();
    params.insert("id".to_owned(), Value::from(id));
    params.insert("level".to_owned(), Value::from(level));
    if !categories.is_empty() {
        params.insert("categories".to_owned(), Value::from(categories.to_vec()));
    }
    Value::Object(params)
}

/// Human-readable text for a response.
pub fn render(response: &Response) -> String {
    match response {
        Response::Ok { result } => render_result(result),
        Response::Error {
            error,
            kind: Some(kind),
        } => format!("error [{kind}]: {error}"),
        Response::Error { error, kind: None } => format!("error: {error}"),
    }
}

fn render_result(result: &Value) -> String {
    let map = match result {
        Value::Object(map) => map,
        other => return scalar(other),
    };

    let mut lines = Vec::new();
    if let Some(Value::String(notice)) = map.get("notice") {
        lines.push(format!("notice: {notice}"));
    }
    if let Some(Value::String(message)) = map.get("result") {
        lines.push(message.clone());
    } else if let (Some(Value::String(object)), Some(label)) = (map.get("object"), map.get("label")) {
        lines.push(format!("read {object}: {}", fields(label)));
    } else if map.is_empty() {
        lines.push("(none)".to_owned());
    } else {
        for (id, entry) in map {
            if entry.is_object() {
                lines.push(format!("{id}: {}", fields(entry)));
            }
        }
    }
    lines.join("\n")
}

fn fields(value: &Value) -> String {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, v)| format!("{key}={}", scalar(v)))
            .collect::<Vec<_>>()
            .join(", "),
        other => scalar(other),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(scalar).collect::<Vec<_>>().join(", ")
        ),
        other => other.to_string(),
    }
}
