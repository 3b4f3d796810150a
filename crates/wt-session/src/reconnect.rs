//! Reconnection coordinator
//!
//! A reconnect never revives a session. It reads the terminal session's
//! profile reference, re-resolves credentials (the stored password or key
//! may have changed since the original connect), and opens a brand-new
//! session under a fresh id. The subscriber of the old id is moved to the
//! new id before the new driver starts, so the existing view keeps
//! receiving events without a gap.

use wt_core::error::{NotFound, WtError, WtResult};
use wt_core::types::SessionId;

use crate::client::{profile_open_config, ShellClient};

impl ShellClient {
    /// Open a replacement session for a terminal one. Returns the new id.
    ///
    /// Only profile-backed sessions can reconnect; an ad-hoc session's
    /// credential was consumed by its original connect and is not retained.
    pub fn reconnect(&self, old_id: &SessionId) -> WtResult<SessionId> {
        let old = self.get(old_id)?;

        if !old.state().is_terminal() {
            return Err(WtError::Validation(
                "session is still active; close it before reconnecting".to_string(),
            ));
        }

        let profile_id = old.profile_id.clone().ok_or_else(|| {
            WtError::Validation(
                "session has no profile; open a new connection instead".to_string(),
            )
        })?;
        let profile = self
            .profiles()
            .get(&profile_id)
            .ok_or_else(|| NotFound::Profile(profile_id.clone()))?;

        let attempts = old.bump_reconnect_attempts();
        let credential = match self.resolve_credential(&profile.auth_method) {
            Ok(credential) => credential,
            Err(err) => {
                old.note_reconnect_failure(&err.to_string());
                return Err(err);
            }
        };

        let new_id = self.start_session(
            profile_open_config(&profile),
            credential,
            profile.options.host_key_policy,
            Some(profile_id),
            attempts,
            Some(old_id),
        );
        tracing::info!(old = %old_id, new = %new_id, attempt = attempts, "reconnecting");
        Ok(new_id)
    }
}
