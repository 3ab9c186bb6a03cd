//! Request/response correlation.
//!
//! Every outbound request gets a fresh id and a pending entry holding a
//! one-shot reply channel. The engine loop hands each inbound response to
//! [`Correlator::resolve`], which completes exactly the matching entry.
//! Entries leave the table exactly once: on response, on timeout, when the
//! caller gives up, or when the connection drops.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{CortexError, CortexResult};
use crate::lock;
use crate::protocol::rpc::{CortexRequest, CortexResponse};

/// A pending RPC response awaiting its matching JSON-RPC response by `id`.
struct PendingRequest {
    method: &'static str,
    sent_at: Instant,
    reply: oneshot::Sender<CortexResult<Value>>,
}

pub(crate) struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    timeout: Duration,
}

impl Correlator {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
            timeout,
        }
    }

    /// Route requests through a live transport.
    pub(crate) fn attach(&self, outbound: mpsc::UnboundedSender<String>) {
        *lock(&self.outbound) = Some(outbound);
    }

    /// Forget the transport. New calls fail with `NotConnected`.
    pub(crate) fn detach(&self) {
        *lock(&self.outbound) = None;
    }

    pub(crate) fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Send a JSON-RPC request and wait for the matching response.
    pub(crate) async fn call(&self, method: &'static str, params: Value) -> CortexResult<Value> {
        let outbound = lock(&self.outbound)
            .clone()
            .ok_or(CortexError::NotConnected)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let json = serde_json::to_string(&CortexRequest::new(id, method, params))?;

        // Register the pending response before sending
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(
            id,
            PendingRequest {
                method,
                sent_at: Instant::now(),
                reply: tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        tracing::debug!(method, id, json = %json, "Sending Cortex request");
        outbound
            .send(json)
            .map_err(|_| CortexError::ConnectionLost {
                reason: "transport writer closed".into(),
            })?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CortexError::ConnectionLost {
                reason: format!("{method} abandoned without a response"),
            }),
            Err(_) => {
                tracing::warn!(method, id, "Cortex request timed out");
                Err(CortexError::Timeout {
                    method: method.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }

    /// [`call`](Self::call), then deserialize the result.
    pub(crate) async fn call_as<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> CortexResult<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| CortexError::Protocol {
            reason: format!("Failed to parse {method} response: {e}"),
        })
    }

    /// Complete the pending request matching `response.id`.
    pub(crate) fn resolve(&self, response: CortexResponse) {
        let Some(pending) = lock(&self.pending).remove(&response.id) else {
            tracing::warn!(id = response.id, "Dropping response for unknown request id");
            return;
        };

        let result = match (response.error, response.result) {
            (Some(error), _) => {
                tracing::debug!(
                    method = pending.method,
                    id = response.id,
                    code = error.code,
                    message = %error.message,
                    "Cortex API error in RPC response",
                );
                Err(CortexError::rpc(pending.method, error.code, error.message))
            }
            (None, Some(value)) => Ok(value),
            (None, None) => Ok(Value::Null),
        };

        tracing::debug!(
            method = pending.method,
            id = response.id,
            elapsed_ms = u64::try_from(pending.sent_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Cortex request completed"
        );
        let _ = pending.reply.send(result);
    }

    /// Fail every request older than the timeout. Returns how many expired.
    pub(crate) fn sweep_expired(&self) -> usize {
        let expired: Vec<(u64, PendingRequest)> = {
            let mut pending = lock(&self.pending);
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, p)| p.sent_at.elapsed() >= self.timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
                .collect()
        };

        for (id, request) in &expired {
            tracing::warn!(method = request.method, id, "Expiring Cortex request");
        }
        let count = expired.len();
        for (_, request) in expired {
            let _ = request.reply.send(Err(CortexError::Timeout {
                method: request.method.to_string(),
                seconds: self.timeout.as_secs(),
            }));
        }
        count
    }

    /// Fail every pending request with `ConnectionLost`.
    pub(crate) fn fail_all(&self, reason: &str) {
        let drained: Vec<PendingRequest> = lock(&self.pending).drain().map(|(_, p)| p).collect();
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), %reason, "Failing pending Cortex requests");
        }
        for request in drained {
            let _ = request.reply.send(Err(CortexError::ConnectionLost {
                reason: reason.to_string(),
            }));
        }
    }
}

/// Removes the pending entry when the caller stops waiting, however it stops.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<u64, PendingRequest>>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::protocol::rpc::RpcError;

    fn attached(timeout: Duration) -> (Arc<Correlator>, mpsc::UnboundedReceiver<String>) {
        let correlator = Arc::new(Correlator::new(timeout));
        let (tx, rx) = mpsc::unbounded_channel();
        correlator.attach(tx);
        (correlator, rx)
    }

    fn request_id(raw: &str) -> u64 {
        serde_json::from_str::<Value>(raw).unwrap()["id"]
            .as_u64()
            .unwrap()
    }

    fn ok(id: u64, result: Value) -> CortexResponse {
        CortexResponse {
            id,
            result: Some(result),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_call_without_transport_is_not_connected() {
        let correlator = Correlator::new(Duration::from_secs(1));
        let err = correlator.call("queryHeadsets", json!({})).await.unwrap_err();
        assert!(matches!(err, CortexError::NotConnected));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_response_resolves_matching_request() {
        let (correlator, mut wire) = attached(Duration::from_secs(5));
        let caller = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move { correlator.call("queryHeadsets", json!({})).await })
        };

        let sent = wire.recv().await.unwrap();
        assert!(sent.contains("\"method\":\"queryHeadsets\""));
        correlator.resolve(ok(request_id(&sent), json!([{"id": "INSIGHT-1"}])));

        let result = caller.await.unwrap().unwrap();
        assert_eq!(result[0]["id"], "INSIGHT-1");
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses_reach_their_callers() {
        let (correlator, mut wire) = attached(Duration::from_secs(5));
        let first = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move { correlator.call("getUserLogin", json!({})).await })
        };
        let first_id = request_id(&wire.recv().await.unwrap());
        let second = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move { correlator.call("queryHeadsets", json!({})).await })
        };
        let second_id = request_id(&wire.recv().await.unwrap());
        assert_ne!(first_id, second_id);

        correlator.resolve(ok(second_id, json!("second")));
        correlator.resolve(ok(first_id, json!("first")));

        assert_eq!(first.await.unwrap().unwrap(), json!("first"));
        assert_eq!(second.await.unwrap().unwrap(), json!("second"));
    }

    #[tokio::test]
    async fn test_error_response_names_method() {
        let (correlator, mut wire) = attached(Duration::from_secs(5));
        let caller = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move { correlator.call("createSession", json!({"headset": "X"})).await })
        };
        let id = request_id(&wire.recv().await.unwrap());
        correlator.resolve(CortexResponse {
            id,
            result: None,
            error: Some(RpcError {
                code: -32004,
                message: "Headset unavailable".into(),
            }),
        });

        match caller.await.unwrap().unwrap_err() {
            CortexError::Rpc { method, code, .. } => {
                assert_eq!(method, "createSession");
                assert_eq!(code, -32004);
            }
            other => panic!("expected Rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let (correlator, mut wire) = attached(Duration::from_millis(50));
        let err = correlator.call("queryHeadsets", json!({})).await.unwrap_err();
        assert!(matches!(err, CortexError::Timeout { ref method, .. } if method == "queryHeadsets"));
        assert_eq!(correlator.pending_count(), 0);

        // A late response is ignored.
        let id = request_id(&wire.recv().await.unwrap());
        correlator.resolve(ok(id, json!({})));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_all_completes_every_caller() {
        let (correlator, mut wire) = attached(Duration::from_secs(5));
        let callers: Vec<_> = (0..3)
            .map(|_| {
                let correlator = Arc::clone(&correlator);
                tokio::spawn(async move { correlator.call("queryHeadsets", json!({})).await })
            })
            .collect();
        for _ in 0..3 {
            wire.recv().await.unwrap();
        }

        correlator.fail_all("socket closed");
        for caller in callers {
            let err = caller.await.unwrap().unwrap_err();
            assert!(matches!(err, CortexError::ConnectionLost { .. }));
        }
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_expires_stale_requests() {
        let (correlator, mut wire) = attached(Duration::from_millis(30));
        let caller = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move { correlator.call("getLicenseInfo", json!({})).await })
        };
        wire.recv().await.unwrap();
        assert_eq!(correlator.sweep_expired(), 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        correlator.sweep_expired();
        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, CortexError::Timeout { .. }));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_detach_fails_new_calls() {
        let (correlator, _wire) = attached(Duration::from_secs(1));
        correlator.detach();
        let err = correlator.call("queryHeadsets", json!({})).await.unwrap_err();
        assert!(matches!(err, CortexError::NotConnected));
    }

    #[tokio::test]
    async fn test_call_as_reports_shape_mismatch() {
        let (correlator, mut wire) = attached(Duration::from_secs(5));
        let caller = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                correlator
                    .call_as::<Vec<String>>("queryProfile", json!({}))
                    .await
            })
        };
        let id = request_id(&wire.recv().await.unwrap());
        correlator.resolve(ok(id, json!({"not": "a list"})));
        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, CortexError::Protocol { .. }));
    }
}
