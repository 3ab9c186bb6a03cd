//! `queryProfile`, `getCurrentProfile` and `setupProfile` payloads.

use serde::{Deserialize, Serialize};

/// One entry of `queryProfile`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInfo {
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub read_only: bool,
    /// Sensors the profile was trained with.
    #[serde(default)]
    pub eeg_channels: Vec<String>,
}

/// Result of `getCurrentProfile`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentProfileInfo {
    /// `None` when the headset has no profile loaded.
    #[serde(default)]
    pub name: Option<String>,
    /// `false` when another application loaded the profile.
    #[serde(default)]
    pub loaded_by_this_app: bool,
}

/// `status` of a `setupProfile` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileAction {
    Create,
    Load,
    Unload,
    Save,
    Rename,
    Delete,
}

impl ProfileAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProfileAction::Create => "create",
            ProfileAction::Load => "load",
            ProfileAction::Unload => "unload",
            ProfileAction::Save => "save",
            ProfileAction::Rename => "rename",
            ProfileAction::Delete => "delete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_list_entry() {
        let profiles: Vec<ProfileInfo> = serde_json::from_value(json!([
            {"name": "alice", "uuid": "u-1", "readOnly": true, "eegChannels": ["AF3", "AF4"]},
            {"name": "guest"}
        ]))
        .unwrap();
        assert!(profiles[0].read_only);
        assert_eq!(profiles[0].eeg_channels.len(), 2);
        assert_eq!(profiles[1].uuid, "");
        assert!(!profiles[1].read_only);
    }

    #[test]
    fn test_current_profile_defaults() {
        let loaded: CurrentProfileInfo =
            serde_json::from_value(json!({"name": "alice", "loadedByThisApp": true})).unwrap();
        assert_eq!(loaded.name.as_deref(), Some("alice"));
        assert!(loaded.loaded_by_this_app);

        let none: CurrentProfileInfo =
            serde_json::from_value(json!({"name": null, "headset": "INSIGHT-1"})).unwrap();
        assert_eq!(none.name, None);
        assert!(!none.loaded_by_this_app);
    }

    #[test]
    fn test_action_string_matches_serde() {
        for action in [
            ProfileAction::Create,
            ProfileAction::Load,
            ProfileAction::Unload,
            ProfileAction::Save,
            ProfileAction::Rename,
            ProfileAction::Delete,
        ] {
            assert_eq!(serde_json::to_value(action).unwrap(), json!(action.as_str()));
        }
    }
}
