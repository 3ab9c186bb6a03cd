//! `createSession`, `updateSession`, `subscribe` and `unsubscribe` payloads.

use serde::Deserialize;
use serde_json::Value;

/// Result of `createSession` and `updateSession`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    /// `opened`, `activated` or `closed`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub app_id: String,
    /// ISO 8601 creation time.
    #[serde(default)]
    pub started: String,
    #[serde(default)]
    pub streams: Vec<String>,
}

/// Result of `subscribe` or `unsubscribe`. Either list may be empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscribeResult {
    #[serde(default)]
    pub success: Vec<StreamSuccess>,
    #[serde(default)]
    pub failure: Vec<StreamFailure>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSuccess {
    pub stream_name: String,
    /// Column names. An entry may itself be an array of names.
    #[serde(default)]
    pub cols: Vec<Value>,
}

impl StreamSuccess {
    /// Names inside the array column at `index`; `None` if that column is a plain name.
    #[must_use]
    pub fn nested_cols(&self, index: usize) -> Option<Vec<String>> {
        let group = self.cols.get(index)?.as_array()?;
        Some(
            group
                .iter()
                .filter_map(|col| col.as_str().map(String::from))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFailure {
    pub stream_name: String,
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_activated_session() {
        let session: SessionInfo = serde_json::from_value(json!({
            "id": "7f3c9b2e-sess",
            "status": "activated",
            "appId": "com.lab.bci",
            "headset": {"id": "INSIGHT-5A1B2C3D"},
            "recording": false
        }))
        .unwrap();
        assert_eq!(session.app_id, "com.lab.bci");
        assert_eq!(session.status, "activated");
        assert!(session.streams.is_empty());
        assert_eq!(session.owner, "");
    }

    #[test]
    fn test_subscribe_with_refused_stream() {
        let result: SubscribeResult = serde_json::from_value(json!({
            "success": [{
                "streamName": "dev",
                "cols": ["Battery", "Signal", ["AF3", "T7", "Pz", "T8", "AF4", "OVERALL"], "BatteryPercent"],
                "sid": "7f3c9b2e-sess"
            }],
            "failure": [{"streamName": "met", "code": -32016, "message": "no license"}]
        }))
        .unwrap();
        let dev = &result.success[0];
        assert_eq!(dev.nested_cols(2).as_ref().map(Vec::len), Some(6));
        assert_eq!(dev.nested_cols(1), None);
        assert_eq!(dev.nested_cols(9), None);
        assert_eq!(result.failure[0].stream_name, "met");
        assert_eq!(result.failure[0].code, -32016);
    }

    #[test]
    fn test_empty_unsubscribe() {
        let result: SubscribeResult = serde_json::from_value(json!({})).unwrap();
        assert!(result.success.is_empty() && result.failure.is_empty());
    }
}
