//! Line-delimited JSON transport over TCP.
//!
//! Each connection is served by its own task. A request line is decoded into
//! a [`Request`], parsed into a [`Command`](crate::kernel::Command) by the
//! dispatcher, and executed. Commands that change a record run under one
//! async mutex together with their write-back, so the store sees mutations
//! in the order the registry applied them.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::kernel::{Dispatcher, Request, Response};
use crate::store::{write_back, LabelStore};

/// Error code for failed persistence of an applied change.
pub const STORAGE_ERROR: &str = "storage";

/// Error code for undecodable or oversized request lines.
pub const INVALID_REQUEST: &str = "invalid_request";

/// Request handler shared by every connection.
pub struct Server {
    dispatcher: Dispatcher,
    store: Arc<dyn LabelStore>,
    write_lock: Mutex<()>,
    max_line_bytes: usize,
}

impl Server {
    /// Server answering with `dispatcher` and persisting into `store`.
    pub fn new(dispatcher: Dispatcher, store: Arc<dyn LabelStore>, max_line_bytes: usize) -> Self {
        Self {
            dispatcher,
            store,
            write_lock: Mutex::new(()),
            max_line_bytes,
        }
    }

    /// The dispatcher behind this server.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Connections already open keep running on their own tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> std::io::Result<()> {
        let local = listener.local_addr()?;
        info!(addr = %local, "listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&self);
                        let span = info_span!("conn", id = %Uuid::new_v4(), peer = %peer);
                        tokio::spawn(async move { server.serve_connection(stream, peer).await }.instrument(span));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }
    }

    async fn serve_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        debug!("connection opened");
        let (read_half, mut write_half) = stream.split();
        let mut reader = BufReader::new(read_half);
        let limit = u64::try_from(self.max_line_bytes)
            .unwrap_or(u64::MAX)
            .saturating_add(1);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = (&mut reader).take(limit).read_until(b'\n', &mut buf).await;
            match read {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "read failed");
                    break;
                }
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            if buf.len() > self.max_line_bytes {
                warn!(%peer, limit = self.max_line_bytes, "request line too long, closing");
                if let Err(e) = discard_line(&mut reader).await {
                    debug!(error = %e, "read failed");
                }
                let response = Response::error(
                    INVALID_REQUEST,
                    format!("request exceeds {} bytes", self.max_line_bytes),
                );
                let _ = send(&mut write_half, &response).await;
                break;
            }
            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let response = self.handle_line(&buf).await;
            if let Err(e) = send(&mut write_half, &response).await {
                debug!(error = %e, "write failed");
                break;
            }
        }
        debug!("connection closed");
    }

    /// Answer one raw request line.
    pub async fn handle_line(&self, line: &[u8]) -> Response {
        match serde_json::from_slice::<Request>(line) {
            Ok(request) => self.handle(&request).await,
            Err(e) => {
                debug!(error = %e, "malformed request");
                Response::error(INVALID_REQUEST, format!("malformed request: {e}"))
            }
        }
    }

    /// Answer one decoded request, persisting any record it changed.
    pub async fn handle(&self, request: &Request) -> Response {
        let dispatcher = &self.dispatcher;
        let command = match dispatcher.parse(&request.action, &request.params) {
            Ok(command) => command,
            Err(e) => {
                debug!(action = %request.action, code = e.code(), error = %e, "request rejected");
                return e.into();
            }
        };

        let Some(touched) = dispatcher.touched(&command) else {
            return dispatcher.execute(&command).into();
        };

        let _guard = self.write_lock.lock().await;
        let value = match dispatcher.execute(&command) {
            Ok(value) => value,
            Err(e) => {
                debug!(action = command.action(), code = e.code(), error = %e, "request failed");
                return e.into();
            }
        };
        if let Err(e) = write_back(self.store.as_ref(), dispatcher.engine().registry(), &touched).await {
            error!(action = command.action(), error = %e, "failed to persist change");
            return Response::error(
                STORAGE_ERROR,
                format!("change applied but not persisted: {e}"),
            );
        }
        Response::ok(value)
    }
}

/// Skip input up to and including the next newline.
async fn discard_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (newline, len) = {
            let available = reader.fill_buf().await?;
            (available.iter().position(|b| *b == b'\n'), available.len())
        };
        match newline {
            _ if len == 0 => return Ok(()),
            Some(i) => {
                reader.consume(i.saturating_add(1));
                return Ok(());
            }
            None => reader.consume(len),
        }
    }
}

async fn send<W>(writer: &mut W, response: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(response).map_err(std::io::Error::other)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}
