//! http front end: `GET /<name>` fetches an archive, `PUT /<name>` stores one
//!
//! bodies stream in both directions. the store itself is blocking, so each
//! request runs its store work on the blocking pool and talks to the async
//! side through bounded channels.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::{Buf, Bytes};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::error::Error;
use crate::ops::{ingest, open_archive};
use crate::store::Store;

/// chunks in flight between the blocking side and the connection
const CHANNEL_DEPTH: usize = 16;

/// build the router over a shared store
pub fn router(store: Arc<Store>) -> Router {
    Router::new()
        .route("/*name", get(fetch).put(store_archive))
        .with_state(store)
}

/// bind `addr` and serve until the listener fails
pub async fn serve(store: Arc<Store>, addr: SocketAddr) -> io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        addr = %listener.local_addr()?,
        root = %store.path().display(),
        "listening"
    );
    axum::serve(listener, router(store)).await
}

async fn fetch(State(store): State<Arc<Store>>, Path(name): Path<String>) -> Response {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);

    tokio::task::spawn_blocking(move || {
        let retrieval = match open_archive(&store, &name) {
            Ok(retrieval) => retrieval,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        let _ = ready_tx.send(Ok(retrieval.compression()));

        if let Err(e) = retrieval.write_to(ChannelWriter { tx: tx.clone() }) {
            // terminates the response body so the client sees a broken transfer
            let _ = tx.blocking_send(Err(io::Error::other(e.to_string())));
        }
    });

    match ready_rx.await {
        Ok(Ok(compression)) => (
            [(header::CONTENT_TYPE, compression.content_type())],
            Body::from_stream(ReceiverStream::new(rx)),
        )
            .into_response(),
        Ok(Err(e)) => error_response(&e),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn store_archive(
    State(store): State<Arc<Store>>,
    Path(name): Path<String>,
    body: Body,
) -> Response {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);

    let task = tokio::task::spawn_blocking(move || {
        let reader = ChannelReader {
            rx,
            chunk: Bytes::new(),
        };
        let result = ingest(&store, &name, reader);
        (name, result)
    });

    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(io::Error::other);
        let failed = chunk.is_err();
        // a closed channel means ingestion already stopped
        if tx.send(chunk).await.is_err() || failed {
            break;
        }
    }
    drop(tx);

    match task.await {
        Ok((name, Ok(report))) => (
            StatusCode::CREATED,
            format!(
                "stored {}: {} entries, {} new blobs\n",
                name, report.entries, report.blobs_stored
            ),
        )
            .into_response(),
        Ok((_, Err(e))) => error_response(&e),
        Err(e) => {
            warn!(error = %e, "ingestion task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn error_response(e: &Error) -> Response {
    let status = if e.is_not_found() {
        StatusCode::NOT_FOUND
    } else if e.is_bad_input() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, format!("{}\n", e)).into_response()
}

/// blocking `Read` over body chunks sent from the async side
struct ChannelReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    chunk: Bytes,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.chunk.is_empty() {
            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => self.chunk = chunk,
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.chunk.len());
        buf[..n].copy_from_slice(&self.chunk[..n]);
        self.chunk.advance(n);
        Ok(n)
    }
}

/// blocking `Write` that forwards every write to the response body
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
