#![allow(dead_code)]

//! In-process stand-in for the Cortex service. Each accepted WebSocket becomes a
//! [`MockConnection`] that the test drives request by request.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use emotiv_cortex_engine::protocol::constants::Methods;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

pub const STEP_TIMEOUT: Duration = Duration::from_secs(3);

pub const TEST_LICENSE_ID: &str = "lic-test";

/// What the test asks the socket task to do.
enum Outbound {
    Frame(Value),
    Hangup,
}

pub struct MockConnection {
    index: usize,
    requests: mpsc::Receiver<Value>,
    outbound: mpsc::Sender<Outbound>,
}

/// A `queryHeadsets` entry.
pub fn headset(id: &str, status: &str) -> Value {
    json!({
        "id": id,
        "status": status,
        "connectedBy": "dongle",
        "firmware": "925",
        "sensors": ["AF3", "T7", "Pz", "T8", "AF4"],
        "motionSensors": ["GYROX", "GYROY", "GYROZ"],
    })
}

/// `subscribe` success entry with the columns the service reports for `stream`.
pub fn stream_success(stream: &str) -> Value {
    let cols = match stream {
        "com" => json!(["act", "pow"]),
        "fac" => json!(["eyeAct", "uAct", "uPow", "lAct", "lPow"]),
        "sys" => json!(["data"]),
        "dev" => json!([
            "Battery",
            "Signal",
            ["AF3", "T7", "Pz", "T8", "AF4", "OVERALL"],
            "BatteryPercent"
        ]),
        _ => json!([]),
    };
    json!({"streamName": stream, "cols": cols, "sid": "ignored"})
}

fn request_id(request: &Value) -> u64 {
    request["id"]
        .as_u64()
        .unwrap_or_else(|| panic!("request without numeric id: {request}"))
}

impl MockConnection {
    /// Zero-based order in which the server accepted this connection.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Next request, which must call `method`.
    pub async fn recv_request_method(&mut self, method: &str) -> Value {
        let request = timeout(STEP_TIMEOUT, self.requests.recv())
            .await
            .unwrap_or_else(|_| panic!("no {method} request arrived"))
            .expect("engine closed the socket");
        assert_eq!(request["method"], method, "unexpected request: {request}");
        request
    }

    /// Next request, if one arrives within `wait`.
    pub async fn request_within(&mut self, wait: Duration) -> Option<Value> {
        timeout(wait, self.requests.recv()).await.ok().flatten()
    }

    /// Reply to the next `method` request with `result`.
    pub async fn answer(&mut self, method: &str, result: Value) -> Value {
        let request = self.recv_request_method(method).await;
        self.send(json!({"jsonrpc": "2.0", "id": request_id(&request), "result": result}))
            .await;
        request
    }

    /// Reply to the next `method` request with an error object.
    pub async fn refuse(&mut self, method: &str, code: i32, message: &str) -> Value {
        let request = self.recv_request_method(method).await;
        self.send(json!({
            "jsonrpc": "2.0",
            "id": request_id(&request),
            "error": {"code": code, "message": message},
        }))
        .await;
        request
    }

    /// Login, access check, `authorize`, license lookup, then the first headset query.
    pub async fn drive_handshake(&mut self, token: &str, headsets: Value) {
        self.answer(Methods::GET_USER_LOGIN, json!([{"username": "tester"}]))
            .await;
        self.answer(
            Methods::HAS_ACCESS_RIGHT,
            json!({"accessGranted": true, "message": "granted"}),
        )
        .await;

        let authorize = self
            .answer(Methods::AUTHORIZE, json!({"cortexToken": token}))
            .await;
        assert_eq!(authorize["params"]["clientId"], "test-client-id");

        let license = json!({
            "isOnline": true,
            "license": {
                "licenseId": TEST_LICENSE_ID,
                "scopes": ["eeg"],
                "validFrom": "2024-01-01T00:00:00.000+00:00",
                "validTo": "2099-01-01T00:00:00.000+00:00",
            }
        });
        let lookup = self.answer(Methods::GET_LICENSE_INFO, license).await;
        assert_eq!(lookup["params"]["cortexToken"], token);

        self.answer(Methods::QUERY_HEADSETS, headsets).await;
    }

    /// `createSession` followed by the default `subscribe`, accepting every stream asked for.
    pub async fn open_session(&mut self, session_id: &str, headset_id: &str) {
        let created = json!({"id": session_id, "status": "activated", "headset": {"id": headset_id}});
        let create = self.answer(Methods::CREATE_SESSION, created).await;
        assert_eq!(create["params"]["headset"], headset_id);

        let subscribe = self.recv_request_method(Methods::SUBSCRIBE).await;
        let success: Vec<Value> = subscribe["params"]["streams"]
            .as_array()
            .expect("subscribe without streams")
            .iter()
            .filter_map(Value::as_str)
            .map(stream_success)
            .collect();
        self.send(json!({
            "jsonrpc": "2.0",
            "id": request_id(&subscribe),
            "result": {"success": success, "failure": []},
        }))
        .await;
    }

    /// Reply to the `updateSession` close of `session_id`.
    pub async fn answer_close(&mut self, session_id: &str) -> Value {
        let request = self
            .answer(
                Methods::UPDATE_SESSION,
                json!({"id": session_id, "status": "closed"}),
            )
            .await;
        assert_eq!(request["params"]["status"], "close");
        assert_eq!(request["params"]["session"], session_id);
        request
    }

    /// Data row on `channel` for `session_id`.
    pub async fn push_row(&self, session_id: &str, channel: &str, time: f64, row: Value) {
        let mut frame = json!({"sid": session_id, "time": time});
        frame[channel] = row;
        self.send(frame).await;
    }

    pub async fn push_warning(&self, code: i32, message: Value) {
        self.send(json!({"warning": {"code": code, "message": message}}))
            .await;
    }

    /// Drop the socket without a close handshake.
    pub async fn force_close(&self) {
        let _ = self.outbound.send(Outbound::Hangup).await;
    }

    async fn send(&self, frame: Value) {
        self.outbound
            .send(Outbound::Frame(frame))
            .await
            .expect("mock socket task exited");
    }
}

pub struct MockCortexServer {
    addr: SocketAddr,
    connections: mpsc::Receiver<MockConnection>,
    acceptor: JoinHandle<()>,
}

impl MockCortexServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let (connection_tx, connections) = mpsc::channel(16);

        let acceptor = tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, index, connection_tx.clone()));
                index += 1;
            }
        });

        Ok(Self {
            addr,
            connections,
            acceptor,
        })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Next connection the engine opened.
    pub async fn accept_connection(&mut self) -> MockConnection {
        timeout(STEP_TIMEOUT, self.connections.recv())
            .await
            .expect("engine did not connect")
            .expect("mock acceptor stopped")
    }
}

impl Drop for MockCortexServer {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

/// Upgrade `stream`, hand the test its [`MockConnection`], then shuttle frames both ways.
async fn serve(stream: TcpStream, index: usize, connections: mpsc::Sender<MockConnection>) {
    let Ok(socket) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = socket.split();
    let (request_tx, requests) = mpsc::channel(64);
    let (outbound, mut outbound_rx) = mpsc::channel(64);

    let connection = MockConnection {
        index,
        requests,
        outbound,
    };
    if connections.send(connection).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            command = outbound_rx.recv() => {
                let Some(Outbound::Frame(frame)) = command else { break };
                if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(request) = serde_json::from_str::<Value>(&text) {
                        let _ = request_tx.send(request).await;
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
