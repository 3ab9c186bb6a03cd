//! # Profiles
//!
//! Training profiles stored by the Launcher. Every operation needs an
//! authorized engine; load, unload and save also need the headset connected.
//!
//! Results are returned and mirrored on the profiles topic as
//! [`ProfileEvent`]s; failures go to the error topic.

use serde_json::{Value, json};

use crate::engine::EngineContext;
use crate::error::CortexResult;
use crate::events::EngineEvent;
use crate::protocol::constants::Methods;
use crate::protocol::profiles::{CurrentProfileInfo, ProfileAction, ProfileInfo};

/// Outcome of a profile operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
    /// `queryProfile` returned these profile names.
    Listed { names: Vec<String> },
    /// Profile currently loaded on a headset.
    Current {
        headset_id: String,
        name: Option<String>,
        loaded_by_this_app: bool,
    },
    /// `setupProfile` succeeded for `action`.
    Changed {
        headset_id: String,
        profile: String,
        action: ProfileAction,
    },
    Renamed {
        headset_id: String,
        from: String,
        to: String,
    },
    GuestLoaded { headset_id: String },
}

/// Profile operations.
///
/// Obtained from [`CortexEngine::profiles`](crate::CortexEngine::profiles).
pub struct ProfileManager<'a> {
    ctx: &'a EngineContext,
}

impl<'a> ProfileManager<'a> {
    pub(crate) fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// All profiles of the logged-in user.
    pub async fn query(&self) -> CortexResult<Vec<ProfileInfo>> {
        let result: CortexResult<Vec<ProfileInfo>> = async {
            let token = self.ctx.auth.token("query profiles")?;
            self.ctx
                .rpc
                .call_as(Methods::QUERY_PROFILE, json!({ "cortexToken": token }))
                .await
        }
        .await;
        let profiles = self.surface(Methods::QUERY_PROFILE, result)?;
        self.publish(ProfileEvent::Listed {
            names: profiles.iter().map(|p| p.name.clone()).collect(),
        });
        Ok(profiles)
    }

    /// Profile loaded on `headset_id`, if any.
    pub async fn current(&self, headset_id: &str) -> CortexResult<CurrentProfileInfo> {
        let result: CortexResult<CurrentProfileInfo> = async {
            let token = self.ctx.auth.token("get the current profile")?;
            self.ctx
                .rpc
                .call_as(
                    Methods::GET_CURRENT_PROFILE,
                    json!({ "cortexToken": token, "headset": headset_id }),
                )
                .await
        }
        .await;
        let current = self.surface(Methods::GET_CURRENT_PROFILE, result)?;

        if let (Some(name), false) = (&current.name, current.loaded_by_this_app) {
            tracing::warn!(
                headset_id,
                profile = %name,
                "Profile is loaded by another application"
            );
        }
        self.publish(ProfileEvent::Current {
            headset_id: headset_id.to_string(),
            name: current.name.clone(),
            loaded_by_this_app: current.loaded_by_this_app,
        });
        Ok(current)
    }

    pub async fn create(&self, headset_id: &str, profile: &str) -> CortexResult<()> {
        self.setup(headset_id, profile, ProfileAction::Create).await
    }

    pub async fn load(&self, headset_id: &str, profile: &str) -> CortexResult<()> {
        self.setup(headset_id, profile, ProfileAction::Load).await
    }

    pub async fn unload(&self, headset_id: &str, profile: &str) -> CortexResult<()> {
        self.setup(headset_id, profile, ProfileAction::Unload).await
    }

    /// Persist the training data of the loaded profile.
    pub async fn save(&self, headset_id: &str, profile: &str) -> CortexResult<()> {
        self.setup(headset_id, profile, ProfileAction::Save).await
    }

    pub async fn delete(&self, headset_id: &str, profile: &str) -> CortexResult<()> {
        self.setup(headset_id, profile, ProfileAction::Delete).await
    }

    pub async fn rename(&self, headset_id: &str, profile: &str, new_name: &str) -> CortexResult<()> {
        let result = self
            .setup_rpc(
                headset_id,
                profile,
                ProfileAction::Rename,
                Some(new_name),
            )
            .await;
        self.surface(Methods::SETUP_PROFILE, result)?;
        self.publish(ProfileEvent::Renamed {
            headset_id: headset_id.to_string(),
            from: profile.to_string(),
            to: new_name.to_string(),
        });
        Ok(())
    }

    /// Load the built-in guest profile, which needs no training data.
    pub async fn load_guest(&self, headset_id: &str) -> CortexResult<()> {
        let result: CortexResult<Value> = async {
            let token = self.ctx.auth.token("load the guest profile")?;
            self.ctx
                .rpc
                .call(
                    Methods::LOAD_GUEST_PROFILE,
                    json!({ "cortexToken": token, "headset": headset_id }),
                )
                .await
        }
        .await;
        self.surface(Methods::LOAD_GUEST_PROFILE, result)?;
        tracing::info!(headset = headset_id, "Guest profile loaded");
        self.publish(ProfileEvent::GuestLoaded {
            headset_id: headset_id.to_string(),
        });
        Ok(())
    }

    async fn setup(&self, headset_id: &str, profile: &str, action: ProfileAction) -> CortexResult<()> {
        let result = self.setup_rpc(headset_id, profile, action, None).await;
        self.surface(Methods::SETUP_PROFILE, result)?;
        self.publish(ProfileEvent::Changed {
            headset_id: headset_id.to_string(),
            profile: profile.to_string(),
            action,
        });
        Ok(())
    }

    async fn setup_rpc(
        &self,
        headset_id: &str,
        profile: &str,
        action: ProfileAction,
        new_name: Option<&str>,
    ) -> CortexResult<()> {
        let token = self.ctx.auth.token("set up a profile")?;
        let mut params = json!({
            "cortexToken": token,
            "headset": headset_id,
            "profile": profile,
            "status": action.as_str(),
        });
        if let Some(new_name) = new_name {
            params["newProfileName"] = Value::from(new_name);
        }
        self.ctx.rpc.call(Methods::SETUP_PROFILE, params).await?;
        tracing::info!(profile, action = action.as_str(), "Profile action completed");
        Ok(())
    }

    fn publish(&self, event: ProfileEvent) {
        self.ctx.hub.emit(EngineEvent::Profile(event));
    }

    fn surface<T>(&self, method: &str, result: CortexResult<T>) -> CortexResult<T> {
        if let Err(e) = &result {
            self.ctx.hub.report(method, e);
        }
        result
    }
}
