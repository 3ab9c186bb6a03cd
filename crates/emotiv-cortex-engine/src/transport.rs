//! # WebSocket Transport
//!
//! Owns one socket to the Cortex service. The connection is split into
//! reader/writer halves, each driven by its own task:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Transport                        │
//! │                                                      │
//! │  outbound: UnboundedSender<String> ◄── Correlator    │
//! │      │                                               │
//! │      ▼                                               │
//! │  writer task ──► SplitSink                           │
//! │                                                      │
//! │  reader task ◄── SplitStream                         │
//! │      │                                               │
//! │      ▼                                               │
//! │  TransportEvent::{Message, Closed} ──► engine loop   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Outbound frames are queued, never awaited by callers, so a slow socket
//! can't stall the engine. Inbound documents are delivered in arrival order.
//!
//! ## TLS Note
//!
//! The Cortex service listens on `wss://localhost:6868` with a self-signed
//! certificate. Certificate checks are skipped for localhost (or when
//! `allow_insecure_tls` is set) and enforced everywhere else.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Message, http};

use crate::config::CortexConfig;
use crate::error::{CortexError, CortexResult};
use crate::lock;

/// How long `close` waits for the writer to flush the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// What the reader task reports to the engine.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// One inbound JSON document.
    Message(Value),
    /// The socket is gone. Always the last event.
    Closed { reason: String },
}

/// Shared, observable transport state.
pub(crate) type SharedTransportState = Arc<Mutex<TransportState>>;

/// A live connection. Dropping it aborts both tasks.
pub(crate) struct Transport {
    outbound: mpsc::UnboundedSender<String>,
    state: SharedTransportState,
    writer: Option<JoinHandle<()>>,
    reader: JoinHandle<()>,
}

impl Transport {
    /// Open the socket and start the reader/writer tasks.
    pub(crate) async fn connect(
        config: &CortexConfig,
        state: SharedTransportState,
    ) -> CortexResult<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        *lock(&state) = TransportState::Connecting;

        match open_socket(config).await {
            Ok(ws) => {
                *lock(&state) = TransportState::Connected;
                let (sink, source) = ws.split();
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, in_rx) = mpsc::unbounded_channel();

                let writer = tokio::spawn(writer_loop(sink, out_rx));
                let reader = tokio::spawn(reader_loop(source, in_tx, Arc::clone(&state)));

                Ok((
                    Self {
                        outbound: out_tx,
                        state,
                        writer: Some(writer),
                        reader,
                    },
                    in_rx,
                ))
            }
            Err(e) => {
                *lock(&state) = TransportState::Disconnected;
                Err(e)
            }
        }
    }

    /// Queue handle for outbound text frames.
    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<String> {
        self.outbound.clone()
    }

    /// Send a close frame and stop both tasks.
    ///
    /// Every other clone of [`sender`](Self::sender) must already be dropped,
    /// or the writer only stops after the grace period.
    pub(crate) async fn close(mut self) {
        *lock(&self.state) = TransportState::Closing;
        let (dead_tx, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.outbound, dead_tx));

        if let Some(writer) = self.writer.take() {
            let abort = writer.abort_handle();
            if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
                tracing::debug!("Writer did not finish within the close grace period");
                abort.abort();
            }
        }
        self.reader.abort();
        *lock(&self.state) = TransportState::Disconnected;
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        self.reader.abort();
    }
}

async fn writer_loop<S>(mut sink: S, mut outbound: mpsc::UnboundedReceiver<String>)
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(text) = outbound.recv().await {
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            tracing::warn!("WebSocket send failed: {e}");
            break;
        }
    }
    let _ = sink.close().await;
    tracing::debug!("Writer loop exiting");
}

async fn reader_loop<S, E>(
    mut source: S,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    state: SharedTransportState,
) where
    S: futures_util::Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let reason = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                tracing::trace!(raw = %text.as_str(), "Reader loop received message");
                match serde_json::from_str::<Value>(text.as_str()) {
                    Ok(value) => {
                        if inbound.send(TransportEvent::Message(value)).is_err() {
                            break "engine stopped listening".to_string();
                        }
                    }
                    Err(e) => tracing::warn!("Failed to parse WebSocket message as JSON: {e}"),
                }
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!("Cortex WebSocket closed by server");
                break frame.map_or_else(
                    || "closed by server".to_string(),
                    |f| format!("closed by server: {}", f.reason.as_str()),
                );
            }
            Some(Ok(_)) => {
                // Binary messages, pings, pongs
            }
            Some(Err(e)) => {
                tracing::warn!("WebSocket read error: {e}");
                break e.to_string();
            }
            None => break "stream ended".to_string(),
        }
    };

    *lock(&state) = TransportState::Disconnected;
    tracing::debug!(%reason, "Reader loop exiting");
    let _ = inbound.send(TransportEvent::Closed { reason });
}

// ─── Socket setup ───────────────────────────────────────────────────────

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn open_socket(config: &CortexConfig) -> CortexResult<Socket> {
    let url = &config.cortex_url;
    let uri: http::Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| CortexError::ConnectionFailed {
            url: url.clone(),
            reason: format!("Invalid URL: {e}"),
        })?;

    let timeout = Duration::from_secs(config.timeouts.connect_timeout_secs);
    let (ws, response) = tokio::time::timeout(timeout, handshake(config, uri))
        .await
        .map_err(|_| CortexError::ConnectionFailed {
            url: url.clone(),
            reason: format!("no handshake within {}s", timeout.as_secs()),
        })?
        .map_err(|e| CortexError::ConnectionFailed {
            url: url.clone(),
            reason: format!("WebSocket connection failed: {e}"),
        })?;

    tracing::info!(url, status = %response.status(), "Connected to Cortex API");
    Ok(ws)
}

type HandshakeResult = Result<
    (Socket, tokio_tungstenite::tungstenite::handshake::client::Response),
    tokio_tungstenite::tungstenite::Error,
>;

#[cfg(any(feature = "rustls-tls", feature = "native-tls"))]
async fn handshake(config: &CortexConfig, uri: http::Uri) -> HandshakeResult {
    let connector = if config.should_accept_invalid_certs() {
        match tls::insecure_connector() {
            Ok(connector) => Some(connector),
            Err(e) => return Err(tokio_tungstenite::tungstenite::Error::Io(std::io::Error::other(e))),
        }
    } else {
        None
    };
    tokio_tungstenite::connect_async_tls_with_config(uri, None, true, connector).await
}

#[cfg(not(any(feature = "rustls-tls", feature = "native-tls")))]
async fn handshake(_config: &CortexConfig, uri: http::Uri) -> HandshakeResult {
    tokio_tungstenite::connect_async_with_config(uri, None, true).await
}

#[cfg(feature = "rustls-tls")]
mod tls {
    use std::sync::Arc;

    use rustls::DigitallySignedStruct;
    use rustls::SignatureScheme;
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
    use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
    use tokio_tungstenite::Connector;

    /// Accepts any certificate chain, still checking handshake signatures.
    #[derive(Debug)]
    struct AcceptAnyCert(Arc<CryptoProvider>);

    impl ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }

    pub(super) fn insecure_connector() -> Result<Connector, rustls::Error> {
        let provider = CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

        let config = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth();

        Ok(Connector::Rustls(Arc::new(config)))
    }
}

#[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
mod tls {
    use tokio_tungstenite::Connector;

    pub(super) fn insecure_connector() -> Result<Connector, native_tls::Error> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Connector::NativeTls(connector))
    }
}
