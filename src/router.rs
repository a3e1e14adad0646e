use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::codec::EventBatch;
use crate::events::{DisconnectedEvent, LoungeEvent};
use crate::models::{LoungeStatus, PlaybackState};
use crate::state::LoungeState;
use crate::LoungeError;

/// Receiver clients that cannot be controlled through the lounge.
const BLACKLISTED_CLIENTS: &[&str] = &["TVHTML5_FOR_KIDS"];

const SESSION_ID: &str = "c";
const GSESSION_ID: &str = "S";
const NOOP: &str = "noop";
const LOUNGE_STATUS: &str = "loungeStatus";

/// One `[id, [type, ...args]]` entry of a batch.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BatchEntry {
    pub(crate) id: u64,
    pub(crate) event_type: String,
    pub(crate) args: Vec<Value>,
}

impl BatchEntry {
    pub(crate) fn parse_batch(batch: EventBatch) -> Result<Vec<BatchEntry>, LoungeError> {
        if batch.is_empty() {
            return Err(LoungeError::framing("empty event batch"));
        }
        batch.into_iter().map(Self::parse).collect()
    }

    fn parse(entry: Value) -> Result<BatchEntry, LoungeError> {
        let malformed = || LoungeError::framing(format!("malformed batch entry: {}", entry));
        let Value::Array(parts) = &entry else {
            return Err(malformed());
        };
        let [id, body] = parts.as_slice() else {
            return Err(malformed());
        };
        let id = id.as_u64().ok_or_else(malformed)?;
        let mut body = match body {
            Value::Array(body) if !body.is_empty() => body.clone(),
            _ => return Err(malformed()),
        };
        let event_type = match body.remove(0) {
            Value::String(s) => s,
            _ => return Err(malformed()),
        };
        Ok(BatchEntry {
            id,
            event_type,
            args: body,
        })
    }
}

/// What the client should do with a routed entry.
#[derive(Debug, PartialEq)]
pub(crate) enum Routed {
    /// Session id bookkeeping, nothing to dispatch.
    Control,
    /// Consumed or unknown, nothing to dispatch.
    Ignored,
    Dispatch(LoungeEvent),
}

/// Applies one batch to the client state, entry by entry.
///
/// Session ids seen in the batch are held until both halves are known,
/// unless a session is already bound.
#[derive(Debug, Default)]
pub(crate) struct EventRouter {
    pending_sid: Option<String>,
    pending_gsession: Option<String>,
}

impl EventRouter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn route(
        &mut self,
        state: &mut LoungeState,
        entry: BatchEntry,
    ) -> Result<Routed, LoungeError> {
        trace!(id = entry.id, event_type = %entry.event_type, "Routing event");
        match entry.event_type.as_str() {
            SESSION_ID => {
                self.pending_sid = Some(string_arg(&entry)?);
                self.apply_ids(state);
                Ok(Routed::Control)
            }
            GSESSION_ID => {
                self.pending_gsession = Some(string_arg(&entry)?);
                self.apply_ids(state);
                Ok(Routed::Control)
            }
            NOOP => Ok(Routed::Ignored),
            LOUNGE_STATUS => {
                apply_lounge_status(state, &entry.args)?;
                Ok(Routed::Ignored)
            }
            LoungeEvent::SCREEN_DISCONNECTED => {
                let event = match LoungeEvent::decode(&entry.event_type, &entry.args) {
                    Ok(Some(LoungeEvent::Disconnected(event))) => event,
                    _ => DisconnectedEvent::default(),
                };
                debug!(reason = ?event.reason, "Screen disconnected");
                state.playback = PlaybackState::default();
                state.connection_lost();
                state.token_expired();
                Ok(Routed::Dispatch(LoungeEvent::Disconnected(event)))
            }
            event_type => match LoungeEvent::decode(event_type, &entry.args) {
                Ok(Some(event)) => {
                    match &event {
                        LoungeEvent::PlaybackStateChanged(e) => state.playback.apply_state(e),
                        LoungeEvent::NowPlaying(e) => {
                            state.playback = PlaybackState::from_now_playing(e)
                        }
                        _ => {}
                    }
                    Ok(Routed::Dispatch(event))
                }
                Ok(None) => {
                    debug!(event_type, args = ?entry.args, "Unprocessed event");
                    Ok(Routed::Ignored)
                }
                Err(e) => {
                    warn!(event_type, error = %e, args = ?entry.args, "Could not decode event payload");
                    Ok(Routed::Ignored)
                }
            },
        }
    }

    /// Close out a batch whose final entry carried `last_id`.
    pub(crate) fn finish(&mut self, state: &mut LoungeState, first_id: u64, last_id: u64) {
        if self.pending_sid.is_some() || self.pending_gsession.is_some() {
            warn!(
                sid = ?self.pending_sid,
                gsession = ?self.pending_gsession,
                "Batch carried an incomplete session id pair without a bound session"
            );
            self.pending_sid = None;
            self.pending_gsession = None;
        }
        if !state.session.is_bound() {
            return;
        }
        if let Some(previous) = state.session.last_event_id() {
            if last_id <= previous {
                warn!(previous, last_id, "Event ids went backwards");
            } else if first_id > previous + 1 {
                debug!(previous, first_id, "Gap in event ids");
            }
        }
        state.session.set_last_event_id(last_id);
    }

    fn apply_ids(&mut self, state: &mut LoungeState) {
        let (sid, gsession) = state
            .session
            .apply_ids(self.pending_sid.take(), self.pending_gsession.take());
        self.pending_sid = sid;
        self.pending_gsession = gsession;
    }
}

fn string_arg(entry: &BatchEntry) -> Result<String, LoungeError> {
    match entry.args.first() {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(LoungeError::framing(format!(
            "event {} expects a string argument, got {:?}",
            entry.event_type, entry.args
        ))),
    }
}

fn apply_lounge_status(state: &mut LoungeState, args: &[Value]) -> Result<(), LoungeError> {
    let status: LoungeStatus = match args.first().cloned().map(serde_json::from_value) {
        Some(Ok(status)) => status,
        other => {
            warn!(payload = ?other, "Malformed loungeStatus payload");
            return Ok(());
        }
    };
    let devices = match status.parse_devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!(error = %e, "Could not decode loungeStatus devices");
            return Ok(());
        }
    };
    let Some(screen) = devices.iter().find(|d| d.is_screen()) else {
        debug!(count = devices.len(), "loungeStatus lists no screen device");
        return Ok(());
    };

    let info = screen.device_info().unwrap_or_else(|e| {
        warn!(error = %e, "Could not decode screen deviceInfo");
        None
    });
    if let Some(client) = info.as_ref().and_then(|i| i.client_name.as_deref()) {
        if BLACKLISTED_CLIENTS.contains(&client) {
            warn!(client, "Screen runs an unsupported client");
            return Err(LoungeError::NotSupported(format!(
                "{} ({}) cannot be controlled",
                screen.name, client
            )));
        }
    }

    debug!(name = %screen.name, "Screen reported by loungeStatus");
    state.screen.screen_name = Some(screen.name.clone());
    state.screen.device_brand = info.as_ref().and_then(|i| i.brand.clone());
    state.screen.device_model = info.as_ref().and_then(|i| i.model.clone());
    state.screen.device_os = info.and_then(|i| i.os);
    Ok(())
}
