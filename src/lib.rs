//! Client for the YouTube Lounge protocol: pair with a TV screen, bind a
//! session, stream its playback events and send it commands.

mod client;
pub use client::LoungeClient;
pub mod codec;
pub use codec::{ChunkDecoder, EventBatch, LoungeCodec};
mod commands;
pub use commands::{DpadKey, PlaybackCommand, MAX_PLAYBACK_SPEED, MAX_VOLUME, MIN_PLAYBACK_SPEED};
mod error;
pub use error::LoungeError;
pub mod events;
pub use events::LoungeEvent;
mod listener;
pub use listener::{EventListener, NoopListener};
pub mod models;
pub use models::{PlaybackState, PlaybackStatus, ScreenInfo};
mod router;
mod settings;
pub use settings::{LoungeConfig, DEFAULT_API_BASE, SETTINGS};
mod state;
pub use state::{
    AuthState, LinkStage, SessionIds, SessionLoss, SessionState, CURRENT_AUTH_VERSION,
};
mod utils;
pub use utils::youtube_parse;
