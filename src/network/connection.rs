//! AUNetSend connection stages
//!
//! A connection moves strictly forward through
//! `PreHandshake -> PreMetadata -> PreSync -> Ready -> PreSync -> ...`.
//! Each stage is a distinct type exposing only the operation valid in it,
//! and every operation consumes the connection, so a chunk can never be
//! read before the handshake or without a preceding sync scan.

use bytes::{Bytes, BytesMut};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::constants::STEP_TIMEOUT;
use crate::error::NetworkError;
use crate::protocol::{
    handshake_reply, is_valid_greeting, GREETING_LEN, MAX_CHUNK_LEN, METADATA_LEN, SYNC_MARKER,
};

/// Waiting for the sender's greeting
#[derive(Debug)]
pub struct PreHandshake;

/// Handshake done, metadata block pending
#[derive(Debug)]
pub struct PreMetadata;

/// Scanning for the next sync marker
#[derive(Debug)]
pub struct PreSync;

/// Sync marker seen, a chunk follows
#[derive(Debug)]
pub struct Ready;

/// Stage marker, used for logging
pub trait Stage {
    const NAME: &'static str;
}

impl Stage for PreHandshake {
    const NAME: &'static str = "pre-handshake";
}

impl Stage for PreMetadata {
    const NAME: &'static str = "pre-metadata";
}

impl Stage for PreSync {
    const NAME: &'static str = "pre-sync";
}

impl Stage for Ready {
    const NAME: &'static str = "ready";
}

/// Duplex stream tagged with its protocol stage
pub struct Connection<S, St> {
    stream: S,
    step_timeout: Duration,
    _stage: PhantomData<St>,
}

impl<S, St: Stage> Connection<S, St> {
    fn advance<Next: Stage>(self) -> Connection<S, Next> {
        tracing::trace!(from = St::NAME, to = Next::NAME, "connection stage");
        Connection {
            stream: self.stream,
            step_timeout: self.step_timeout,
            _stage: PhantomData,
        }
    }

    pub fn stage(&self) -> &'static str {
        St::NAME
    }

    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }
}

impl<S> Connection<S, PreHandshake>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a freshly connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            step_timeout: STEP_TIMEOUT,
            _stage: PhantomData,
        }
    }

    /// Override the per-step timeout (1 s by default).
    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    /// Read the 16-byte greeting and answer with the 40-byte reply.
    pub async fn handshake(mut self) -> Result<Connection<S, PreMetadata>, NetworkError> {
        let mut greeting = [0u8; GREETING_LEN];
        read_block(&mut self.stream, &mut greeting, self.step_timeout, "greeting").await?;

        if !is_valid_greeting(&greeting) {
            return Err(NetworkError::Protocol(format!(
                "unexpected greeting {:02x?}",
                greeting
            )));
        }

        let reply = handshake_reply();
        let stream = &mut self.stream;
        let write = async move {
            stream.write_all(&reply).await?;
            stream.flush().await
        };
        timeout(self.step_timeout, write)
            .await
            .map_err(|_| NetworkError::Timeout)??;

        tracing::debug!("handshake complete");
        Ok(self.advance())
    }
}

impl<S> Connection<S, PreMetadata>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read and ignore the 40-byte metadata block.
    pub async fn discard_metadata(mut self) -> Result<Connection<S, PreSync>, NetworkError> {
        let mut metadata = [0u8; METADATA_LEN];
        read_block(&mut self.stream, &mut metadata, self.step_timeout, "metadata").await?;
        Ok(self.advance())
    }
}

impl<S> Connection<S, PreSync>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Scan for the `"sync"` marker, all within one step timeout.
    ///
    /// Aligned streams match on the first window. Otherwise the window
    /// slides one byte at a time until the marker lines up again.
    pub async fn sync(mut self) -> Result<Connection<S, Ready>, NetworkError> {
        let stream = &mut self.stream;
        let scan = async move {
            let mut window = [0u8; SYNC_MARKER.len()];
            stream.read_exact(&mut window).await?;

            let mut skipped = 0usize;
            while window != SYNC_MARKER {
                window.copy_within(1.., 0);
                let last = window.len() - 1;
                stream.read_exact(&mut window[last..]).await?;
                skipped += 1;
            }
            Ok::<_, std::io::Error>(skipped)
        };

        let skipped = timeout(self.step_timeout, scan)
            .await
            .map_err(|_| NetworkError::SyncTimeout(self.step_timeout))?
            .map_err(eof_as_closed)?;

        if skipped > 0 {
            tracing::debug!(skipped, "resynchronized on sync marker");
        }
        Ok(self.advance())
    }
}

impl<S> Connection<S, Ready>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read one chunk of up to 1024 bytes. Short reads are returned as is.
    pub async fn get_chunk(mut self) -> Result<(Bytes, Connection<S, PreSync>), NetworkError> {
        let mut chunk = BytesMut::zeroed(MAX_CHUNK_LEN);
        let n = self.stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(NetworkError::Closed);
        }
        chunk.truncate(n);
        Ok((chunk.freeze(), self.advance()))
    }
}

/// Read exactly `buf.len()` bytes within `limit`; anything less is a
/// protocol violation.
async fn read_block<S>(
    stream: &mut S,
    buf: &mut [u8],
    limit: Duration,
    what: &str,
) -> Result<(), NetworkError>
where
    S: AsyncRead + Unpin,
{
    match timeout(limit, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => Err(NetworkError::Protocol(
            format!("{} truncated, expected {} bytes", what, buf.len()),
        )),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(NetworkError::Protocol(format!(
            "{} not received within {:?}",
            what, limit
        ))),
    }
}

fn eof_as_closed(e: std::io::Error) -> NetworkError {
    if e.kind() == ErrorKind::UnexpectedEof {
        NetworkError::Closed
    } else {
        e.into()
    }
}
