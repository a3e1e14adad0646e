use async_trait::async_trait;

use crate::events::{
    AdPlayingEvent, AdStateEvent, AutoplayModeChangedEvent, AutoplayUpNextEvent,
    DisconnectedEvent, LoungeEvent, NowPlayingEvent, PlaybackSpeedEvent, PlaybackStateEvent,
    SubtitlesTrackEvent, VolumeChangedEvent,
};

/// Observer for screen events. Override the methods you care about; the
/// rest do nothing.
///
/// Handlers are awaited one at a time in wire order, so a slow handler
/// delays the rest of the stream. Handlers may issue commands on the client.
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Playback position or play/pause state changed.
    async fn playback_state_changed(&self, _event: &PlaybackStateEvent) {}

    /// Active video changed.
    async fn now_playing_changed(&self, _event: &NowPlayingEvent) {}

    async fn volume_changed(&self, _event: &VolumeChangedEvent) {}

    async fn autoplay_changed(&self, _event: &AutoplayModeChangedEvent) {}

    async fn ad_state_changed(&self, _event: &AdStateEvent) {}

    async fn ad_playing_changed(&self, _event: &AdPlayingEvent) {}

    async fn subtitles_track_changed(&self, _event: &SubtitlesTrackEvent) {}

    async fn autoplay_up_next_changed(&self, _event: &AutoplayUpNextEvent) {}

    async fn playback_speed_changed(&self, _event: &PlaybackSpeedEvent) {}

    /// The screen is no longer connected.
    async fn disconnected(&self, _event: &DisconnectedEvent) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl EventListener for NoopListener {}

pub(crate) async fn dispatch(listener: &dyn EventListener, event: &LoungeEvent) {
    match event {
        LoungeEvent::PlaybackStateChanged(e) => listener.playback_state_changed(e).await,
        LoungeEvent::NowPlaying(e) => listener.now_playing_changed(e).await,
        LoungeEvent::VolumeChanged(e) => listener.volume_changed(e).await,
        LoungeEvent::AutoplayModeChanged(e) => listener.autoplay_changed(e).await,
        LoungeEvent::AdStateChanged(e) => listener.ad_state_changed(e).await,
        LoungeEvent::AdPlaying(e) => listener.ad_playing_changed(e).await,
        LoungeEvent::SubtitlesTrackChanged(e) => listener.subtitles_track_changed(e).await,
        LoungeEvent::AutoplayUpNext(e) => listener.autoplay_up_next_changed(e).await,
        LoungeEvent::PlaybackSpeedChanged(e) => listener.playback_speed_changed(e).await,
        LoungeEvent::Disconnected(e) => listener.disconnected(e).await,
    }
}
