//! Method names, error codes and `warning` codes of the Cortex API.

/// JSON-RPC method names.
pub struct Methods;

impl Methods {
    // auth
    pub const GET_USER_LOGIN: &'static str = "getUserLogin";
    pub const REQUEST_ACCESS: &'static str = "requestAccess";
    pub const HAS_ACCESS_RIGHT: &'static str = "hasAccessRight";
    pub const AUTHORIZE: &'static str = "authorize";
    pub const GET_LICENSE_INFO: &'static str = "getLicenseInfo";

    // headsets
    pub const CONTROL_DEVICE: &'static str = "controlDevice";
    pub const QUERY_HEADSETS: &'static str = "queryHeadsets";

    // sessions and streams
    pub const CREATE_SESSION: &'static str = "createSession";
    pub const UPDATE_SESSION: &'static str = "updateSession";
    pub const SUBSCRIBE: &'static str = "subscribe";
    pub const UNSUBSCRIBE: &'static str = "unsubscribe";

    // profiles
    pub const QUERY_PROFILE: &'static str = "queryProfile";
    pub const GET_CURRENT_PROFILE: &'static str = "getCurrentProfile";
    pub const SETUP_PROFILE: &'static str = "setupProfile";
    /// Loads an empty, unsaved profile.
    pub const LOAD_GUEST_PROFILE: &'static str = "loadGuestProfile";

    // training
    pub const TRAINING: &'static str = "training";
    pub const GET_DETECTION_INFO: &'static str = "getDetectionInfo";
    pub const GET_TRAINED_SIGNATURE_ACTIONS: &'static str = "getTrainedSignatureActions";
    pub const GET_TRAINING_TIME: &'static str = "getTrainingTime";
    /// `get` or `set` the actions the detection may emit.
    pub const MENTAL_COMMAND_ACTIVE_ACTION: &'static str = "mentalCommandActiveAction";
    pub const MENTAL_COMMAND_TRAINING_THRESHOLD: &'static str = "mentalCommandTrainingThreshold";
    pub const MENTAL_COMMAND_ACTION_SENSITIVITY: &'static str = "mentalCommandActionSensitivity";
}

/// JSON-RPC error codes the engine inspects.
pub struct ErrorCodes;

impl ErrorCodes {
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const NO_HEADSET_CONNECTED: i32 = -32001;
    pub const SESSION_ALREADY_EXISTS: i32 = -32005;
    pub const INVALID_CORTEX_TOKEN: i32 = -32014;
    /// Per-stream failure inside a `subscribe` result.
    pub const INVALID_STREAM: i32 = -32016;
}

/// Codes carried by server-initiated `warning` notifications.
pub struct WarningCodes;

impl WarningCodes {
    /// All streams of a session were stopped by the service.
    pub const STREAM_STOP: i32 = 0;
    /// The service closed a session on its own.
    pub const SESSION_AUTO_CLOSED: i32 = 1;
    /// A user logged in to the Launcher.
    pub const USER_LOGIN: i32 = 2;
    /// The user logged out of the Launcher.
    pub const USER_LOGOUT: i32 = 3;
    /// The user has not accepted the license agreement.
    pub const USER_NOT_ACCEPT_LICENSE: i32 = 6;
    /// The user has not granted access to this app.
    pub const USER_NOT_HAVE_ACCESS_RIGHT: i32 = 7;
    /// An access request is pending in the Launcher.
    pub const USER_REQUEST_ACCESS_RIGHT: i32 = 8;
    /// The user approved this app in the Launcher.
    pub const ACCESS_RIGHT_GRANTED: i32 = 9;
    /// The user rejected this app in the Launcher.
    pub const ACCESS_RIGHT_REJECTED: i32 = 10;
    /// A profile was loaded for a headset.
    pub const PROFILE_LOADED: i32 = 13;
    /// A profile was unloaded from a headset.
    pub const PROFILE_UNLOADED: i32 = 14;
    /// The headset failed to connect.
    pub const HEADSET_CANNOT_CONNECT: i32 = 101;
    /// The headset connection attempt timed out.
    pub const HEADSET_CONNECTING_TIMEOUT: i32 = 102;
    /// The headset stopped sending data.
    pub const HEADSET_DATA_TIMEOUT: i32 = 103;
    /// A headset finished connecting.
    pub const HEADSET_CONNECTED: i32 = 104;
    /// A headset scan pass finished.
    pub const HEADSET_SCAN_FINISHED: i32 = 142;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names() {
        assert_eq!(Methods::CREATE_SESSION, "createSession");
        assert_eq!(Methods::UPDATE_SESSION, "updateSession");
        assert_eq!(Methods::LOAD_GUEST_PROFILE, "loadGuestProfile");
        assert_eq!(
            Methods::MENTAL_COMMAND_TRAINING_THRESHOLD,
            "mentalCommandTrainingThreshold"
        );
    }

    #[test]
    fn test_warning_codes_are_distinct() {
        let codes = [
            WarningCodes::STREAM_STOP,
            WarningCodes::SESSION_AUTO_CLOSED,
            WarningCodes::USER_LOGIN,
            WarningCodes::USER_LOGOUT,
            WarningCodes::ACCESS_RIGHT_GRANTED,
            WarningCodes::ACCESS_RIGHT_REJECTED,
            WarningCodes::HEADSET_CONNECTED,
            WarningCodes::HEADSET_SCAN_FINISHED,
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }
}
