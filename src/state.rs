use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{PlaybackState, ScreenInfo};
use crate::LoungeError;

/// Version written into serialized auth records.
pub const CURRENT_AUTH_VERSION: u32 = 0;

/// Pairing credentials for one screen. Survives reconnects; only pairing,
/// refresh or a server-reported expiry change it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub version: u32,
    #[serde(default)]
    pub screen_id: Option<String>,
    #[serde(default)]
    pub lounge_id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expiry: Option<i64>,
}

#[derive(Deserialize)]
struct VersionTag {
    version: u32,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            version: CURRENT_AUTH_VERSION,
            screen_id: None,
            lounge_id_token: None,
            refresh_token: None,
            expiry: None,
        }
    }
}

impl AuthState {
    pub fn to_value(&self) -> Result<serde_json::Value, LoungeError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json(&self) -> Result<String, LoungeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Load a serialized record. Records of any other version are rejected.
    pub fn from_value(value: serde_json::Value) -> Result<Self, LoungeError> {
        let tag: VersionTag = serde_json::from_value(value.clone())?;
        if tag.version != CURRENT_AUTH_VERSION {
            return Err(LoungeError::UnsupportedAuthVersion(tag.version));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_json(json: &str) -> Result<Self, LoungeError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    pub(crate) fn has_token(&self) -> bool {
        self.lounge_id_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// The `c` / `S` identifiers of a bound session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIds {
    pub sid: String,
    pub gsession: String,
}

/// Identity of the current bind. Either fully bound or empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    ids: Option<SessionIds>,
    last_event_id: Option<u64>,
    command_sequence: u32,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            ids: None,
            last_event_id: None,
            command_sequence: 1,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.ids.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn sid(&self) -> Option<&str> {
        self.ids.as_ref().map(|ids| ids.sid.as_str())
    }

    pub fn gsession(&self) -> Option<&str> {
        self.ids.as_ref().map(|ids| ids.gsession.as_str())
    }

    pub fn last_event_id(&self) -> Option<u64> {
        self.last_event_id
    }

    pub fn command_sequence(&self) -> u32 {
        self.command_sequence
    }

    /// Apply ids seen in a batch. Returns the ids that could not be applied
    /// yet: a lone id is only accepted when a session is already bound.
    pub(crate) fn apply_ids(
        &mut self,
        sid: Option<String>,
        gsession: Option<String>,
    ) -> (Option<String>, Option<String>) {
        match (sid, gsession) {
            (Some(sid), Some(gsession)) => {
                self.ids = Some(SessionIds { sid, gsession });
                (None, None)
            }
            (sid, gsession) => match self.ids.as_mut() {
                Some(ids) => {
                    if let Some(sid) = sid {
                        ids.sid = sid;
                    }
                    if let Some(gsession) = gsession {
                        ids.gsession = gsession;
                    }
                    (None, None)
                }
                None => (sid, gsession),
            },
        }
    }

    pub(crate) fn set_last_event_id(&mut self, id: u64) {
        self.last_event_id = Some(id);
    }

    /// Hand out the current sequence number and advance it.
    pub(crate) fn next_command_sequence(&mut self) -> u32 {
        let seq = self.command_sequence;
        self.command_sequence += 1;
        seq
    }

    pub(crate) fn reset_command_sequence(&mut self) {
        self.command_sequence = 1;
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Lifecycle stage derived from auth and session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkStage {
    /// No screen id.
    Unpaired,
    /// Screen id known, no lounge token.
    Paired,
    /// Lounge token known, no session.
    Linked,
    /// Session ids known.
    Bound,
}

/// Server answers that mean the session (and maybe the token) is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLoss {
    UnknownSid,
    Gone,
    TokenExpired,
}

impl SessionLoss {
    /// Classify a non-success response by status and reason text.
    pub fn classify(status: u16, reason: &str) -> Option<Self> {
        match status {
            400 if reason.contains("Unknown SID") => Some(SessionLoss::UnknownSid),
            410 if reason.contains("Gone") => Some(SessionLoss::Gone),
            401 if reason.contains("Expired") => Some(SessionLoss::TokenExpired),
            _ => None,
        }
    }
}

/// Everything the client mutates, kept behind one lock.
#[derive(Debug, Default)]
pub(crate) struct LoungeState {
    pub(crate) auth: AuthState,
    pub(crate) session: SessionState,
    pub(crate) playback: PlaybackState,
    pub(crate) screen: ScreenInfo,
}

impl LoungeState {
    pub(crate) fn stage(&self) -> LinkStage {
        if self.auth.screen_id.is_none() {
            LinkStage::Unpaired
        } else if !self.auth.has_token() {
            LinkStage::Paired
        } else if !self.session.is_bound() {
            LinkStage::Linked
        } else {
            LinkStage::Bound
        }
    }

    pub(crate) fn connection_lost(&mut self) {
        if self.session.is_bound() {
            debug!("Clearing session state");
        }
        self.session.clear();
    }

    pub(crate) fn token_expired(&mut self) {
        debug!("Clearing lounge id token");
        self.auth.lounge_id_token = None;
    }

    pub(crate) fn apply_loss(&mut self, loss: SessionLoss) {
        self.connection_lost();
        if loss == SessionLoss::TokenExpired {
            self.token_expired();
        }
    }
}
