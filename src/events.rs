use serde::Deserialize;
use serde_json::Value;

use crate::models::PlaybackStatus;
use crate::utils::wire;
use crate::LoungeError;

/// Position and state update (`onStateChange`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaybackStateEvent {
    #[serde(rename = "currentTime", deserialize_with = "wire::f64_from_str")]
    pub current_time: f64,
    #[serde(deserialize_with = "wire::f64_from_str")]
    pub duration: f64,
    pub state: PlaybackStatus,
    #[serde(rename = "loadedTime", default, deserialize_with = "wire::opt_f64_from_str")]
    pub loaded_time: Option<f64>,
    #[serde(default)]
    pub cpn: Option<String>,
}

/// Active video changed (`nowPlaying`). Every field may be missing when
/// nothing is loaded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NowPlayingEvent {
    #[serde(rename = "videoId", default)]
    pub video_id: Option<String>,
    #[serde(rename = "currentTime", default, deserialize_with = "wire::opt_f64_from_str")]
    pub current_time: Option<f64>,
    #[serde(default, deserialize_with = "wire::opt_f64_from_str")]
    pub duration: Option<f64>,
    #[serde(default)]
    pub state: PlaybackStatus,
    #[serde(rename = "listId", default)]
    pub list_id: Option<String>,
}

impl NowPlayingEvent {
    pub fn has_video(&self) -> bool {
        self.video_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

// Volume changed event
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VolumeChangedEvent {
    #[serde(deserialize_with = "wire::i64_from_str")]
    pub volume: i64,
    #[serde(default, deserialize_with = "wire::bool_from_str")]
    pub muted: bool,
}

/// Wire values of `autoplayMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoplayMode {
    Enabled,
    Disabled,
    Unsupported,
}

impl AutoplayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AutoplayMode::Enabled => "ENABLED",
            AutoplayMode::Disabled => "DISABLED",
            AutoplayMode::Unsupported => "UNSUPPORTED",
        }
    }
}

// Autoplay mode changed event
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AutoplayModeChangedEvent {
    #[serde(rename = "autoplayMode")]
    pub autoplay_mode: AutoplayMode,
}

impl AutoplayModeChangedEvent {
    pub fn enabled(&self) -> bool {
        self.autoplay_mode == AutoplayMode::Enabled
    }

    pub fn supported(&self) -> bool {
        self.autoplay_mode != AutoplayMode::Unsupported
    }
}

// Ad state change event
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdStateEvent {
    #[serde(rename = "adState")]
    pub ad_state: PlaybackStatus,
    #[serde(rename = "currentTime", deserialize_with = "wire::f64_from_str")]
    pub current_time: f64,
    #[serde(rename = "isSkipEnabled", default, deserialize_with = "wire::bool_from_str")]
    pub is_skip_enabled: bool,
}

/// An ad started playing (`adPlaying`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdPlayingEvent {
    #[serde(rename = "adVideoId", default)]
    pub ad_video_id: Option<String>,
    #[serde(rename = "adVideoUri", default)]
    pub ad_video_uri: Option<String>,
    #[serde(rename = "adTitle", default)]
    pub ad_title: String,
    #[serde(rename = "isBumper", default, deserialize_with = "wire::bool_from_str")]
    pub is_bumper: bool,
    #[serde(rename = "isSkippable", default, deserialize_with = "wire::bool_from_str")]
    pub is_skippable: bool,
    #[serde(rename = "isSkipEnabled", default, deserialize_with = "wire::bool_from_str")]
    pub is_skip_enabled: bool,
    #[serde(rename = "clickThroughUrl", default)]
    pub click_through_url: String,
    #[serde(rename = "adSystem", default)]
    pub ad_system: String,
    #[serde(rename = "adNextParams", default)]
    pub ad_next_params: String,
    #[serde(rename = "remoteSlotsData", default)]
    pub remote_slots_data: Option<String>,
    #[serde(rename = "adState")]
    pub ad_state: PlaybackStatus,
    #[serde(rename = "contentVideoId", default)]
    pub content_video_id: String,
    #[serde(deserialize_with = "wire::f64_from_str")]
    pub duration: f64,
    #[serde(rename = "currentTime", deserialize_with = "wire::f64_from_str")]
    pub current_time: f64,
}

// Subtitles track changed event
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubtitlesTrackEvent {
    #[serde(rename = "videoId")]
    pub video_id: String,
    #[serde(rename = "trackName", default)]
    pub track_name: Option<String>,
    #[serde(rename = "languageCode", default)]
    pub language_code: Option<String>,
    #[serde(rename = "sourceLanguageCode", default)]
    pub source_language_code: Option<String>,
    #[serde(rename = "languageName", default)]
    pub language_name: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub vss_id: Option<String>,
    #[serde(rename = "captionId", default)]
    pub caption_id: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
}

// Autoplay up next event; no video id when nothing is queued
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AutoplayUpNextEvent {
    #[serde(rename = "videoId", default)]
    pub video_id: Option<String>,
}

// Playback speed changed event
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaybackSpeedEvent {
    #[serde(rename = "playbackSpeed", deserialize_with = "wire::f64_from_str")]
    pub playback_speed: f64,
}

/// The screen ended the session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct DisconnectedEvent {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Typed events dispatched to listeners, one variant per wire tag.
#[derive(Debug, Clone, PartialEq)]
pub enum LoungeEvent {
    PlaybackStateChanged(PlaybackStateEvent),
    NowPlaying(NowPlayingEvent),
    VolumeChanged(VolumeChangedEvent),
    AutoplayModeChanged(AutoplayModeChangedEvent),
    AdStateChanged(AdStateEvent),
    AdPlaying(AdPlayingEvent),
    SubtitlesTrackChanged(SubtitlesTrackEvent),
    AutoplayUpNext(AutoplayUpNextEvent),
    PlaybackSpeedChanged(PlaybackSpeedEvent),
    Disconnected(DisconnectedEvent),
}

impl LoungeEvent {
    pub const STATE_CHANGE: &'static str = "onStateChange";
    pub const NOW_PLAYING: &'static str = "nowPlaying";
    pub const VOLUME_CHANGED: &'static str = "onVolumeChanged";
    pub const AUTOPLAY_MODE_CHANGED: &'static str = "onAutoplayModeChanged";
    pub const AD_STATE_CHANGE: &'static str = "onAdStateChange";
    pub const AD_PLAYING: &'static str = "adPlaying";
    pub const SUBTITLES_TRACK_CHANGED: &'static str = "onSubtitlesTrackChanged";
    pub const AUTOPLAY_UP_NEXT: &'static str = "autoplayUpNext";
    pub const PLAYBACK_SPEED_CHANGED: &'static str = "onPlaybackSpeedChanged";
    pub const SCREEN_DISCONNECTED: &'static str = "loungeScreenDisconnected";

    /// Decode the payload (`args[0]`) of a wire event.
    ///
    /// Returns `Ok(None)` for tags without a typed record. Tags that carry
    /// state effects (`loungeStatus`, `noop`, session ids) are handled by the
    /// router before they get here.
    pub fn decode(event_type: &str, args: &[Value]) -> Result<Option<Self>, LoungeError> {
        let payload = args.first().cloned().unwrap_or(Value::Null);
        let event = match event_type {
            Self::STATE_CHANGE => LoungeEvent::PlaybackStateChanged(from_payload(payload)?),
            Self::NOW_PLAYING => LoungeEvent::NowPlaying(from_payload(payload)?),
            Self::VOLUME_CHANGED => LoungeEvent::VolumeChanged(from_payload(payload)?),
            Self::AUTOPLAY_MODE_CHANGED => {
                LoungeEvent::AutoplayModeChanged(from_payload(payload)?)
            }
            Self::AD_STATE_CHANGE => LoungeEvent::AdStateChanged(from_payload(payload)?),
            Self::AD_PLAYING => LoungeEvent::AdPlaying(from_payload(payload)?),
            Self::SUBTITLES_TRACK_CHANGED => {
                LoungeEvent::SubtitlesTrackChanged(from_payload(payload)?)
            }
            Self::AUTOPLAY_UP_NEXT => LoungeEvent::AutoplayUpNext(from_payload(payload)?),
            Self::PLAYBACK_SPEED_CHANGED => {
                LoungeEvent::PlaybackSpeedChanged(from_payload(payload)?)
            }
            Self::SCREEN_DISCONNECTED => LoungeEvent::Disconnected(from_payload(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    // Get the wire name of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            LoungeEvent::PlaybackStateChanged(_) => Self::STATE_CHANGE,
            LoungeEvent::NowPlaying(_) => Self::NOW_PLAYING,
            LoungeEvent::VolumeChanged(_) => Self::VOLUME_CHANGED,
            LoungeEvent::AutoplayModeChanged(_) => Self::AUTOPLAY_MODE_CHANGED,
            LoungeEvent::AdStateChanged(_) => Self::AD_STATE_CHANGE,
            LoungeEvent::AdPlaying(_) => Self::AD_PLAYING,
            LoungeEvent::SubtitlesTrackChanged(_) => Self::SUBTITLES_TRACK_CHANGED,
            LoungeEvent::AutoplayUpNext(_) => Self::AUTOPLAY_UP_NEXT,
            LoungeEvent::PlaybackSpeedChanged(_) => Self::PLAYBACK_SPEED_CHANGED,
            LoungeEvent::Disconnected(_) => Self::SCREEN_DISCONNECTED,
        }
    }
}

// Missing payloads decode like an empty object so all-optional records still build
fn from_payload<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, LoungeError> {
    let payload = match payload {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    Ok(serde_json::from_value(payload)?)
}
