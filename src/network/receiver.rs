//! Receive loop
//!
//! Connects to the sender, runs the handshake once, then forever scans for
//! the sync marker, reads a chunk and pushes it into the hand-off queue.

use std::convert::Infallible;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::connection::Connection;
use crate::audio::buffer::{ChunkSender, Enqueued, OverrunPolicy};
use crate::config::NetworkConfig;
use crate::error::{NetworkError, Result};

/// Receive loop settings
#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub step_timeout: Duration,
    pub policy: OverrunPolicy,
}

impl ReceiverSettings {
    pub fn new(host: impl Into<String>, port: u16, config: &NetworkConfig) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: config.connect_timeout(),
            step_timeout: config.step_timeout(),
            policy: config.overrun_policy(),
        }
    }
}

/// Open a TCP connection within `limit`.
pub async fn connect(host: &str, port: u16, limit: Duration) -> std::result::Result<TcpStream, NetworkError> {
    let addr = format!("{}:{}", host, port);
    let stream = tokio::time::timeout(limit, TcpStream::connect((host, port)))
        .await
        .map_err(|_| NetworkError::ConnectTimeout {
            addr: addr.clone(),
            timeout: limit,
        })?
        .map_err(|source| NetworkError::ConnectFailed {
            addr: addr.clone(),
            source,
        })?;

    // Chunks are small and latency sensitive
    stream.set_nodelay(true)?;
    tracing::info!("connected to {}", addr);
    Ok(stream)
}

/// Connect to `settings.host:settings.port` and receive forever.
///
/// Only returns on a fatal error: connect failure, protocol violation,
/// sync timeout, closed stream, or an overrun the policy does not ignore.
pub async fn receive_forever(queue: ChunkSender, settings: ReceiverSettings) -> Result<Infallible> {
    let stream = connect(&settings.host, settings.port, settings.connect_timeout).await?;
    receive_from(stream, queue, settings.step_timeout, settings.policy).await
}

/// Run the protocol over an already connected stream.
pub async fn receive_from<S>(
    stream: S,
    queue: ChunkSender,
    step_timeout: Duration,
    policy: OverrunPolicy,
) -> Result<Infallible>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut pre_sync = Connection::new(stream)
        .with_step_timeout(step_timeout)
        .handshake()
        .await?
        .discard_metadata()
        .await?;

    tracing::info!("AUNetSend stream established");

    loop {
        let ready = pre_sync.sync().await?;
        let (chunk, next) = ready.get_chunk().await?;
        pre_sync = next;

        if queue.put(chunk, &policy).await? == Enqueued::Dropped {
            tracing::trace!("chunk dropped on overrun");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::chunk_queue;
    use crate::constants::STEP_TIMEOUT;
    use crate::error::{Error, QueueError};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;
    use tokio::net::TcpListener;

    /// Bytes a well-behaved sender puts on the wire for `n` chunks
    fn sender_script(n: u8) -> Vec<u8> {
        let mut script = Vec::new();
        script.extend_from_slice(b"ausend");
        script.extend_from_slice(&[0u8; 10]);
        script.extend_from_slice(&[0x55u8; 40]);
        for tag in 0..n {
            script.extend_from_slice(b"sync");
            script.extend_from_slice(&[tag; 1024]);
        }
        script
    }

    /// Serve `script` over an in-memory pipe, hanging up once the
    /// handshake reply has been read.
    fn spawn_sender(script: Vec<u8>) -> (DuplexStream, JoinHandle<Vec<u8>>) {
        let (mut server, client) = duplex(64 * 1024);
        let handle = tokio::spawn(async move {
            server.write_all(&script).await.unwrap();
            let mut reply = vec![0u8; 40];
            server.read_exact(&mut reply).await.unwrap();
            reply
        });
        (client, handle)
    }

    #[tokio::test]
    async fn test_ten_chunks_delivered_in_order() {
        let (client, sender) = spawn_sender(sender_script(10));
        let (tx, mut rx) = chunk_queue(Some(10));

        let result = receive_from(client, tx, STEP_TIMEOUT, OverrunPolicy::default()).await;
        assert!(matches!(result, Err(Error::Network(NetworkError::Closed))));

        for tag in 0..10u8 {
            let chunk = rx.try_recv().unwrap();
            assert_eq!(chunk.len(), 1024);
            assert!(chunk.iter().all(|&b| b == tag));
        }
        assert!(rx.try_recv().is_none());
        assert_eq!(rx.probe().stats().overruns, 0);
        assert_eq!(&sender.await.unwrap()[..6], b"aurecv");
    }

    #[tokio::test]
    async fn test_overrun_drops_one_chunk() {
        let (client, _sender) = spawn_sender(sender_script(2));
        let (tx, mut rx) = chunk_queue(Some(1));

        let policy = OverrunPolicy {
            put_timeout: None,
            ignore_overruns: true,
        };
        let result = receive_from(client, tx, STEP_TIMEOUT, policy).await;
        assert!(matches!(result, Err(Error::Network(NetworkError::Closed))));

        let stats = rx.probe().stats();
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.delivered, 1);

        assert!(rx.try_recv().unwrap().iter().all(|&b| b == 0));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_overrun_is_fatal_when_not_ignored() {
        let (mut server, client) = duplex(64 * 1024);
        let (tx, _rx) = chunk_queue(Some(1));

        server.write_all(&sender_script(2)).await.unwrap();

        let policy = OverrunPolicy {
            put_timeout: None,
            ignore_overruns: false,
        };
        let result = receive_from(client, tx, STEP_TIMEOUT, policy).await;
        assert!(matches!(
            result,
            Err(Error::Queue(QueueError::Overrun { depth: 1 }))
        ));
    }

    #[tokio::test]
    async fn test_bad_greeting_is_protocol_error() {
        let (mut server, client) = duplex(4096);
        let (tx, _rx) = chunk_queue(Some(1));

        server.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();

        let result = receive_from(client, tx, STEP_TIMEOUT, OverrunPolicy::default()).await;
        assert!(matches!(result, Err(Error::Network(NetworkError::Protocol(_)))));
    }

    #[tokio::test]
    async fn test_receive_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&sender_script(0)[..16]).await.unwrap();

            let mut reply = [0u8; 40];
            socket.read_exact(&mut reply).await.unwrap();

            socket.write_all(&[0u8; 40]).await.unwrap();
            for tag in 0..3u8 {
                socket.write_all(b"sync").await.unwrap();
                socket.write_all(&[tag; 1024]).await.unwrap();
            }
            reply
        });

        let (tx, mut rx) = chunk_queue(None);
        let settings = ReceiverSettings::new("127.0.0.1", port, &NetworkConfig::default());

        let receiver = tokio::spawn(receive_forever(tx, settings));

        // TCP may split a chunk; short reads are passed through
        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.extend_from_slice(&chunk);
            if received.len() >= 3 * 1024 {
                break;
            }
        }
        let reply = server.await.unwrap();
        receiver.abort();

        assert_eq!(&reply[..6], b"aurecv");
        assert!(reply[6..].iter().all(|&b| b == 0));
        assert!(!received.is_empty());
        assert_eq!(received[0], 0);
        assert!(received.iter().all(|&b| b < 3));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = connect("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(NetworkError::ConnectFailed { .. }) | Err(NetworkError::ConnectTimeout { .. })
        ));
    }
}
