use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use crate::events::{NowPlayingEvent, PlaybackStateEvent};
use crate::utils::wire;

/// Playback state as reported by the screen. Discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackStatus {
    /// Video is stopped (-1)
    #[default]
    Stopped = -1,
    /// Buffering, seen between videos (0)
    Buffering = 0,
    /// Video is currently playing (1)
    Playing = 1,
    /// Video is paused (2)
    Paused = 2,
    /// Video is starting (3)
    Starting = 3,
    /// Advertisement is playing (1081)
    Advertisement = 1081,
}

impl PlaybackStatus {
    pub fn from_i64(state: i64) -> Option<Self> {
        match state {
            -1 => Some(PlaybackStatus::Stopped),
            0 => Some(PlaybackStatus::Buffering),
            1 => Some(PlaybackStatus::Playing),
            2 => Some(PlaybackStatus::Paused),
            3 => Some(PlaybackStatus::Starting),
            1081 => Some(PlaybackStatus::Advertisement),
            _ => None,
        }
    }

    /// Map a wire value, treating unknown states as stopped.
    pub fn from_wire(state: i64) -> Self {
        Self::from_i64(state).unwrap_or_else(|| {
            warn!(state, "Unknown playback state, assuming stopped");
            PlaybackStatus::Stopped
        })
    }

    pub fn to_i32(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackStatus::Stopped => "STOPPED",
            PlaybackStatus::Buffering => "BUFFERING",
            PlaybackStatus::Playing => "PLAYING",
            PlaybackStatus::Paused => "PAUSED",
            PlaybackStatus::Starting => "STARTING",
            PlaybackStatus::Advertisement => "ADVERTISEMENT",
        }
    }
}

impl<'de> Deserialize<'de> for PlaybackStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match wire::i64_from_str(&value) {
            Ok(state) => PlaybackStatus::from_wire(state),
            Err(e) => {
                warn!(error = %e, "Unparsable playback state, assuming stopped");
                PlaybackStatus::Stopped
            }
        })
    }
}

/// Last known playback state of the screen.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlaybackState {
    pub current_time: f64,
    pub duration: f64,
    /// Empty when nothing is loaded.
    pub video_id: String,
    pub state: PlaybackStatus,
}

impl PlaybackState {
    /// Apply a state change on top of the current video.
    pub fn apply_state(&mut self, event: &PlaybackStateEvent) {
        self.current_time = event.current_time;
        self.duration = event.duration;
        self.state = event.state;
    }

    pub fn from_now_playing(event: &NowPlayingEvent) -> Self {
        Self {
            current_time: event.current_time.unwrap_or(0.0),
            duration: event.duration.unwrap_or(0.0),
            video_id: event.video_id.clone().unwrap_or_default(),
            state: event.state,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackStatus::Playing
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.duration > 0.0 {
            (self.current_time / self.duration) * 100.0
        } else {
            0.0
        }
    }
}

/// Screen identity learned from pairing and `loungeStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScreenInfo {
    pub screen_name: Option<String>,
    pub device_brand: Option<String>,
    pub device_model: Option<String>,
    pub device_os: Option<String>,
}

impl ScreenInfo {
    /// "brand model" when the screen reported device info.
    pub fn device_name(&self) -> Option<String> {
        match (&self.device_brand, &self.device_model) {
            (Some(brand), Some(model)) => Some(format!("{} {}", brand, model)),
            (Some(brand), None) => Some(brand.clone()),
            (None, Some(model)) => Some(model.clone()),
            (None, None) => None,
        }
    }
}

// Response types for API calls
#[derive(Debug, Clone, Deserialize)]
pub struct Screen {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "screenId")]
    pub screen_id: String,
    #[serde(rename = "loungeToken")]
    pub lounge_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ScreenResponse {
    pub screen: Screen,
}

#[derive(Debug, Deserialize)]
pub struct ScreensResponse {
    #[serde(default)]
    pub screens: Vec<Screen>,
}

#[derive(Debug, Deserialize)]
pub struct ScreenAvailability {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ScreenAvailabilityResponse {
    #[serde(default)]
    pub screens: Vec<ScreenAvailability>,
}

// Device info, sent as a JSON string inside a device descriptor
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(rename = "clientName", default)]
    pub client_name: Option<String>,
}

// Device entry of a loungeStatus event
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(rename = "deviceInfo", default)]
    pub device_info_raw: Value,
}

impl Device {
    pub const LOUNGE_SCREEN: &'static str = "LOUNGE_SCREEN";

    pub fn is_screen(&self) -> bool {
        self.device_type == Self::LOUNGE_SCREEN
    }

    /// Decode `deviceInfo`, which may be an object or a JSON-encoded string.
    pub fn device_info(&self) -> Result<Option<DeviceInfo>, serde_json::Error> {
        match &self.device_info_raw {
            Value::Null => Ok(None),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => serde_json::from_str::<Option<DeviceInfo>>(s),
            other => serde_json::from_value(other.clone()).map(Some),
        }
    }
}

// Lounge status event payload
#[derive(Debug, Clone, Deserialize)]
pub struct LoungeStatus {
    /// JSON-encoded list of [`Device`]
    #[serde(default)]
    pub devices: String,
    #[serde(rename = "queueId", default)]
    pub queue_id: Option<String>,
}

impl LoungeStatus {
    pub fn parse_devices(&self) -> Result<Vec<Device>, serde_json::Error> {
        if self.devices.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&self.devices)
    }
}
