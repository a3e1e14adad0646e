use crate::LoungeError;

pub const MIN_PLAYBACK_SPEED: f64 = 0.25;
pub const MAX_PLAYBACK_SPEED: f64 = 2.0;
pub const MAX_VOLUME: u8 = 100;

/// Reason sent with the terminate request on disconnect.
pub(crate) const DISCONNECT_REASON: &str = "MDX_SESSION_DISCONNECT_REASON_DISCONNECTED_BY_USER";

/// Remote control keys for `dpadCommand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpadKey {
    Up,
    Down,
    Left,
    Right,
    Enter,
    Back,
}

impl DpadKey {
    pub fn as_str(self) -> &'static str {
        match self {
            DpadKey::Up => "UP",
            DpadKey::Down => "DOWN",
            DpadKey::Left => "LEFT",
            DpadKey::Right => "RIGHT",
            DpadKey::Enter => "ENTER",
            DpadKey::Back => "BACK",
        }
    }
}

// Playback commands
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    Play,
    Pause,
    Next,
    Previous,
    SkipAd,
    GetNowPlaying,
    SeekTo { new_time: f64 },
    SetVolume { volume: u8 },
    SetPlaylist { video_id: String },
    SetAutoplayMode { enabled: bool },
    SetPlaybackSpeed { speed: f64 },
    Dpad { key: DpadKey },
    SetSubtitlesTrack { language_code: String, video_id: String },
}

impl PlaybackCommand {
    /// Wire name sent as `req0__sc`.
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackCommand::Play => "play",
            PlaybackCommand::Pause => "pause",
            PlaybackCommand::Next => "next",
            PlaybackCommand::Previous => "previous",
            PlaybackCommand::SkipAd => "skipAd",
            PlaybackCommand::GetNowPlaying => "getNowPlaying",
            PlaybackCommand::SeekTo { .. } => "seekTo",
            PlaybackCommand::SetVolume { .. } => "setVolume",
            PlaybackCommand::SetPlaylist { .. } => "setPlaylist",
            PlaybackCommand::SetAutoplayMode { .. } => "setAutoplayMode",
            PlaybackCommand::SetPlaybackSpeed { .. } => "setPlaybackSpeed",
            PlaybackCommand::Dpad { .. } => "dpadCommand",
            PlaybackCommand::SetSubtitlesTrack { .. } => "setSubtitlesTrack",
        }
    }

    /// Command parameters; each is sent as `req0_<name>=<value>`.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            PlaybackCommand::SeekTo { new_time } => vec![("newTime", new_time.to_string())],
            PlaybackCommand::SetVolume { volume } => vec![("volume", volume.to_string())],
            PlaybackCommand::SetPlaylist { video_id } => vec![("videoId", video_id.clone())],
            PlaybackCommand::SetAutoplayMode { enabled } => {
                let mode = if *enabled { "ENABLED" } else { "DISABLED" };
                vec![("autoplayMode", mode.to_string())]
            }
            PlaybackCommand::SetPlaybackSpeed { speed } => {
                vec![("playbackSpeed", speed.to_string())]
            }
            PlaybackCommand::Dpad { key } => vec![("key", key.as_str().to_string())],
            PlaybackCommand::SetSubtitlesTrack {
                language_code,
                video_id,
            } => vec![
                ("languageCode", language_code.clone()),
                ("videoId", video_id.clone()),
            ],
            _ => Vec::new(),
        }
    }

    /// Reject values the screen would not accept.
    pub fn validate(&self) -> Result<(), LoungeError> {
        match self {
            PlaybackCommand::SetVolume { volume } if *volume > MAX_VOLUME => Err(
                LoungeError::InvalidCommand(format!("volume {} is above {}", volume, MAX_VOLUME)),
            ),
            PlaybackCommand::SetPlaybackSpeed { speed }
                if !(MIN_PLAYBACK_SPEED..=MAX_PLAYBACK_SPEED).contains(speed) =>
            {
                Err(LoungeError::InvalidCommand(format!(
                    "playback speed {} is outside {}..={}",
                    speed, MIN_PLAYBACK_SPEED, MAX_PLAYBACK_SPEED
                )))
            }
            PlaybackCommand::SeekTo { new_time } if !new_time.is_finite() || *new_time < 0.0 => {
                Err(LoungeError::InvalidCommand(format!(
                    "cannot seek to {}",
                    new_time
                )))
            }
            PlaybackCommand::SetPlaylist { video_id } if video_id.is_empty() => Err(
                LoungeError::InvalidCommand("setPlaylist needs a video id".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Form fields of the command request body for the given offset.
    pub(crate) fn form_fields(&self, offset: u32) -> Vec<(String, String)> {
        let mut fields = vec![
            ("count".to_string(), "1".to_string()),
            ("ofs".to_string(), offset.to_string()),
            ("req0__sc".to_string(), self.name().to_string()),
        ];
        fields.extend(
            self.params()
                .into_iter()
                .map(|(name, value)| (format!("req0_{}", name), value)),
        );
        fields
    }
}
