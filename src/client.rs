use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio_util::codec::Decoder;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::codec::{ChunkDecoder, EventBatch, LoungeCodec};
use crate::commands::{DpadKey, PlaybackCommand, DISCONNECT_REASON};
use crate::events::LoungeEvent;
use crate::listener::{EventListener, NoopListener};
use crate::models::{
    PlaybackState, ScreenAvailabilityResponse, ScreenInfo, ScreenResponse, ScreensResponse,
};
use crate::router::{BatchEntry, EventRouter, Routed};
use crate::settings::{LoungeConfig, SETTINGS};
use crate::state::{
    AuthState, LinkStage, LoungeState, SessionLoss, SessionState, CURRENT_AUTH_VERSION,
};
use crate::LoungeError;

const BUFFER_CAPACITY: usize = 16 * 1024; // 16KB initial buffer capacity

const PAIRING_PATH: &str = "/pairing/get_screen";
const REFRESH_PATH: &str = "/pairing/get_lounge_token_batch";
const AVAILABILITY_PATH: &str = "/pairing/get_screen_availability";
const BIND_PATH: &str = "/bc/bind";

const DEVICE_CONTEXT: &str =
    "user_agent=dunno&window_width_points=&window_height_points=&os_name=android&ms=";

fn log_failure(operation: &'static str) -> impl FnOnce(reqwest::Error) -> LoungeError {
    move |e| {
        error!(operation, error = %e, "Request failed");
        LoungeError::RequestFailed(e)
    }
}

/// Client for the YouTube Lounge API: pairing, session bind, the event
/// stream and playback commands for one screen.
///
/// All protocol state sits behind a single lock that is never held across a
/// network call or a listener callback, so commands can be issued while
/// [`subscribe`](Self::subscribe) is running on the same (shared) client.
///
/// # Logging
///
/// This library uses the `tracing` crate for logging. To enable logs, you'll need to
/// initialize a tracing subscriber in your application.
///
/// Example using `tracing_subscriber`:
/// ```no_run
/// use tracing::Level;
/// use tracing_subscriber::FmtSubscriber;
///
/// let subscriber = FmtSubscriber::builder()
///     .with_max_level(Level::DEBUG)
///     .finish();
///
/// tracing::subscriber::set_global_default(subscriber)
///     .expect("Failed to set tracing subscriber");
/// ```
///
/// The log levels control what information is displayed:
/// - `TRACE`: raw chunks and every routed entry
/// - `DEBUG`: requests, routing decisions and state resets
/// - `INFO`: pairing, refresh, connect and subscribe lifecycle
/// - `WARN`: session loss, undecodable payloads and truncated streams
/// - `ERROR`: failed one-shot requests
pub struct LoungeClient {
    http: Client,
    config: LoungeConfig,
    device_name: String,
    device_id: String,
    state: Mutex<LoungeState>,
    event_sender: broadcast::Sender<LoungeEvent>,
    // Set by close(); cleared by connect()
    closed: AtomicBool,
    shutdown: Notify,
}

impl LoungeClient {
    /// Create a client using the process-wide [`SETTINGS`].
    pub fn new(device_name: &str) -> Result<Self, LoungeError> {
        Self::with_config(device_name, SETTINGS.clone())
    }

    pub fn with_config(device_name: &str, config: LoungeConfig) -> Result<Self, LoungeError> {
        // No total timeout here: the subscribe request lives as long as the session
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Some(config.pool_idle_timeout))
            .build()?;
        let (event_sender, _) = broadcast::channel(config.event_buffer_capacity.max(1));
        let device_id = Uuid::new_v4().to_string();
        debug!(device_name, device_id = %device_id, api_base = %config.api_base, "Created lounge client");

        Ok(Self {
            http,
            config,
            device_name: device_name.to_string(),
            device_id,
            state: Mutex::new(LoungeState::default()),
            event_sender,
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Every dispatched event is also published here.
    pub fn event_receiver(&self) -> broadcast::Receiver<LoungeEvent> {
        self.event_sender.subscribe()
    }

    pub async fn stage(&self) -> LinkStage {
        self.state.lock().await.stage()
    }

    pub async fn paired(&self) -> bool {
        self.stage().await >= LinkStage::Paired
    }

    pub async fn linked(&self) -> bool {
        self.stage().await >= LinkStage::Linked
    }

    pub async fn connected(&self) -> bool {
        self.stage().await == LinkStage::Bound
    }

    pub async fn auth_state(&self) -> AuthState {
        self.state.lock().await.auth.clone()
    }

    /// Replace the pairing credentials, e.g. with a record saved by an
    /// earlier run. Any bound session is discarded.
    pub async fn load_auth_state(&self, auth: AuthState) -> Result<(), LoungeError> {
        if auth.version != CURRENT_AUTH_VERSION {
            return Err(LoungeError::UnsupportedAuthVersion(auth.version));
        }
        let mut state = self.state.lock().await;
        state.connection_lost();
        state.auth = auth;
        debug!(stage = ?state.stage(), "Loaded auth state");
        Ok(())
    }

    pub async fn session_state(&self) -> SessionState {
        self.state.lock().await.session.clone()
    }

    pub async fn playback_state(&self) -> PlaybackState {
        self.state.lock().await.playback.clone()
    }

    pub async fn screen_info(&self) -> ScreenInfo {
        self.state.lock().await.screen.clone()
    }

    /// Screen name as reported by pairing or `loungeStatus`.
    pub async fn screen_name(&self) -> Result<Option<String>, LoungeError> {
        let state = self.state.lock().await;
        if state.stage() < LinkStage::Linked {
            return Err(LoungeError::NotLinked);
        }
        Ok(state.screen.screen_name.clone())
    }

    /// "brand model" of the screen, once it has reported device info.
    pub async fn screen_device_name(&self) -> Result<Option<String>, LoungeError> {
        let state = self.state.lock().await;
        if state.stage() != LinkStage::Bound {
            return Err(LoungeError::NotConnected);
        }
        Ok(state.screen.device_name())
    }

    /// Stop a running [`subscribe`](Self::subscribe) loop. Session state is
    /// left untouched; the next `connect` re-arms the client.
    pub fn close(&self) {
        debug!("Closing lounge client");
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Pair with a screen using the code shown on the TV.
    pub async fn pair(&self, pairing_code: &str) -> Result<bool, LoungeError> {
        info!("Pairing with screen using code: {}", pairing_code);
        let response = self
            .http
            .post(self.config.url(PAIRING_PATH))
            .form(&[("pairing_code", pairing_code)])
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(log_failure("pair"))?;
        let response = Self::require_success("pair", response).await?;
        let screen = response.json::<ScreenResponse>().await?.screen;

        let mut state = self.state.lock().await;
        if state.auth.screen_id.as_deref() != Some(screen.screen_id.as_str()) {
            state.connection_lost();
        }
        state.auth.screen_id = Some(screen.screen_id);
        state.auth.lounge_id_token = Some(screen.lounge_token);
        state.screen.screen_name = screen.name;
        info!(
            "Successfully paired with screen: {}",
            state.screen.screen_name.as_deref().unwrap_or("<unnamed>")
        );
        Ok(state.stage() >= LinkStage::Linked)
    }

    /// Pair with a screen whose id is already known, fetching a fresh token.
    pub async fn pair_with_screen_id(
        &self,
        screen_id: &str,
        screen_name: Option<&str>,
    ) -> Result<bool, LoungeError> {
        {
            let mut state = self.state.lock().await;
            state.connection_lost();
            state.auth.screen_id = Some(screen_id.to_string());
            state.screen.screen_name = screen_name.map(str::to_string);
        }
        self.refresh_auth().await
    }

    /// Exchange the screen id for a fresh lounge token.
    pub async fn refresh_auth(&self) -> Result<bool, LoungeError> {
        let screen_id = {
            let state = self.state.lock().await;
            state.auth.screen_id.clone().ok_or(LoungeError::NotPaired)?
        };
        info!("Refreshing lounge token for screen_id: {}", screen_id);

        let response = self
            .http
            .post(self.config.url(REFRESH_PATH))
            .form(&[("screen_ids", screen_id.as_str())])
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(log_failure("refresh_auth"))?;
        let response = Self::require_success("refresh_auth", response).await?;
        let screen = response
            .json::<ScreensResponse>()
            .await?
            .screens
            .into_iter()
            .next()
            .ok_or_else(|| LoungeError::InvalidResponse("No screens returned".to_string()))?;

        let mut state = self.state.lock().await;
        state.auth.screen_id = Some(screen.screen_id);
        state.auth.lounge_id_token = Some(screen.lounge_token);
        info!("Refreshed lounge token");
        Ok(state.stage() >= LinkStage::Linked)
    }

    /// Ask the API whether the linked screen is online.
    pub async fn is_available(&self) -> Result<bool, LoungeError> {
        let token = {
            let state = self.state.lock().await;
            if state.stage() < LinkStage::Linked {
                return Err(LoungeError::NotLinked);
            }
            state.auth.lounge_id_token.clone().unwrap_or_default()
        };

        let response = self
            .http
            .post(self.config.url(AVAILABILITY_PATH))
            .form(&[("lounge_token", token.as_str())])
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(log_failure("is_available"))?;
        let response = Self::require_success("is_available", response).await?;
        let availability = response.json::<ScreenAvailabilityResponse>().await?;
        let available = availability
            .screens
            .first()
            .is_some_and(|screen| screen.status == "online");
        debug!("Screen availability: {}", available);
        Ok(available)
    }

    /// Bind a new session. Returns whether the client ended up connected.
    ///
    /// Events carried by the bind response are routed before returning and
    /// published on [`event_receiver`](Self::event_receiver).
    pub async fn connect(&self) -> Result<bool, LoungeError> {
        let token = {
            let state = self.state.lock().await;
            if state.stage() < LinkStage::Linked {
                return Err(LoungeError::NotLinked);
            }
            state.auth.lounge_id_token.clone().unwrap_or_default()
        };
        self.closed.store(false, Ordering::SeqCst);

        let fields = [
            ("app", "web"),
            ("mdx-version", "3"),
            ("name", self.device_name.as_str()),
            ("id", self.device_id.as_str()),
            ("device", "REMOTE_CONTROL"),
            ("capabilities", "que,dsdtr,atp"),
            ("method", "setPlaylist"),
            ("magnaKey", "cloudPairedDevice"),
            ("ui", "false"),
            ("deviceContext", DEVICE_CONTEXT),
            ("theme", "cl"),
            ("loungeIdToken", token.as_str()),
        ];
        let params = [
            ("RID", "1"),
            ("VER", "8"),
            ("CVER", "1"),
            ("auth_failure_option", "send_error"),
        ];
        let form_data = serde_urlencoded::to_string(fields)?;
        debug!(?params, "Sending bind request");

        let response = self
            .http
            .post(self.config.url(BIND_PATH))
            .query(&params)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form_data)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(log_failure("connect"))?;
        let status = response.status();
        let body = response.text().await.map_err(log_failure("connect"))?;

        if status == StatusCode::UNAUTHORIZED {
            warn!(body = %body, "Bind rejected with 401, lounge token expired");
            self.state.lock().await.apply_loss(SessionLoss::TokenExpired);
            return Ok(false);
        }
        if status != StatusCode::OK {
            match SessionLoss::classify(status.as_u16(), &reason_text(status, &body)) {
                Some(loss) => {
                    warn!(%status, ?loss, "Bind reported session loss");
                    self.state.lock().await.apply_loss(loss);
                }
                None => warn!(%status, body = %body, "Unknown reply to connect"),
            }
            return Ok(false);
        }

        // Fresh bind: new ids arrive in the body and commands restart at 1
        self.state.lock().await.session.clear();
        let lines = body.strip_suffix('\n').unwrap_or(&body).split('\n');
        for batch in ChunkDecoder::batches(lines) {
            self.process_batch(batch?, &NoopListener).await?;
        }

        let connected = self.connected().await;
        if connected {
            info!("Connected to screen");
        } else {
            warn!("Bind response carried no complete session");
        }
        Ok(connected)
    }

    /// Stream events from the screen until the stream ends, the session is
    /// lost or [`close`](Self::close) is called.
    ///
    /// Events are handed to `listener` in wire order, one at a time, and
    /// published on [`event_receiver`](Self::event_receiver). Returns whether
    /// the session is still bound afterwards. Dropping the future cancels the
    /// loop without touching session state.
    pub async fn subscribe(&self, listener: &dyn EventListener) -> Result<bool, LoungeError> {
        let mut params = {
            let state = self.state.lock().await;
            self.session_params(&state)?
        };
        params.extend([
            ("RID", "rpc".to_string()),
            ("CI", "0".to_string()),
            ("TYPE", "xmlhttp".to_string()),
        ]);

        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();
        if self.closed.load(Ordering::SeqCst) {
            debug!("Client closed, not subscribing");
            return Ok(self.connected().await);
        }

        info!("Subscribing to screen events");
        let response = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Subscribe cancelled by close() before the stream opened");
                return Ok(self.connected().await);
            }
            res = self.http.get(self.config.url(BIND_PATH)).query(&params).send() => {
                res.map_err(log_failure("subscribe"))?
            }
        };
        let Some(response) = self.check_session_result(response).await? else {
            return Ok(false);
        };

        let mut stream = response.bytes_stream();
        let mut codec = LoungeCodec::new();
        let mut buffer = BytesMut::with_capacity(BUFFER_CAPACITY);

        'stream: loop {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Subscribe loop closed by client");
                    break 'stream;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    trace!("Received chunk of size {}", chunk.len());
                    buffer.extend_from_slice(&chunk);
                    while let Some(batch) = codec.decode(&mut buffer)? {
                        self.process_batch(batch, listener).await?;
                        if !self.connected().await {
                            debug!("Session ended while streaming");
                            break 'stream;
                        }
                    }
                }
                Some(Err(e)) if is_truncated_body(&e) => {
                    warn!(error = %e, "Event stream payload ended early, treating as closed");
                    break 'stream;
                }
                Some(Err(e)) => {
                    error!(error = %e, "Event stream failed");
                    return Err(LoungeError::RequestFailed(e));
                }
                None => {
                    while let Some(batch) = codec.decode_eof(&mut buffer)? {
                        self.process_batch(batch, listener).await?;
                    }
                    break 'stream;
                }
            }
        }

        let connected = self.connected().await;
        info!(connected, "Subscribe completed");
        Ok(connected)
    }

    /// Send a playback command. Returns `Ok(false)` when the server reports
    /// the session (or token) as gone.
    pub async fn send_command(&self, command: PlaybackCommand) -> Result<bool, LoungeError> {
        let (params, fields) = {
            let mut state = self.state.lock().await;
            let mut params = self.session_params(&state)?;
            command.validate()?;
            let offset = state.session.next_command_sequence();
            params.push(("RID", (offset + 1).to_string()));
            (params, command.form_fields(offset))
        };
        debug!(command = command.name(), ?fields, "Sending command");

        let response = self
            .http
            .post(self.config.url(BIND_PATH))
            .query(&params)
            .form(&fields)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(log_failure("command"))?;
        Ok(self.check_session_result(response).await?.is_some())
    }

    /// Terminate the session. The local session is discarded afterwards.
    pub async fn disconnect(&self) -> Result<bool, LoungeError> {
        let params = {
            let state = self.state.lock().await;
            let mut params = self.session_params(&state)?;
            params.extend([
                ("CVER", "1".to_string()),
                ("RID", state.session.command_sequence().to_string()),
                ("auth_failure_option", "send_error".to_string()),
            ]);
            params
        };
        let fields = [
            ("ui", ""),
            ("TYPE", "terminate"),
            ("clientDisconnectReason", DISCONNECT_REASON),
        ];
        info!("Disconnecting from screen");

        let response = self
            .http
            .post(self.config.url(BIND_PATH))
            .query(&params)
            .form(&fields)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(log_failure("disconnect"))?;
        if self.check_session_result(response).await?.is_none() {
            return Ok(false);
        }
        self.state.lock().await.connection_lost();
        Ok(true)
    }

    pub async fn play(&self) -> Result<bool, LoungeError> {
        self.send_command(PlaybackCommand::Play).await
    }

    pub async fn pause(&self) -> Result<bool, LoungeError> {
        self.send_command(PlaybackCommand::Pause).await
    }

    pub async fn previous(&self) -> Result<bool, LoungeError> {
        self.send_command(PlaybackCommand::Previous).await
    }

    pub async fn next(&self) -> Result<bool, LoungeError> {
        self.send_command(PlaybackCommand::Next).await
    }

    /// Seek to `new_time` seconds.
    pub async fn seek_to(&self, new_time: f64) -> Result<bool, LoungeError> {
        self.send_command(PlaybackCommand::SeekTo { new_time }).await
    }

    pub async fn skip_ad(&self) -> Result<bool, LoungeError> {
        self.send_command(PlaybackCommand::SkipAd).await
    }

    /// Volume between 0 and 100.
    pub async fn set_volume(&self, volume: u8) -> Result<bool, LoungeError> {
        self.send_command(PlaybackCommand::SetVolume { volume }).await
    }

    pub async fn play_video(&self, video_id: &str) -> Result<bool, LoungeError> {
        self.send_command(PlaybackCommand::SetPlaylist {
            video_id: video_id.to_string(),
        })
        .await
    }

    pub async fn set_autoplay_mode(&self, enabled: bool) -> Result<bool, LoungeError> {
        self.send_command(PlaybackCommand::SetAutoplayMode { enabled })
            .await
    }

    /// Speed between 0.25 and 2.0.
    pub async fn set_playback_speed(&self, speed: f64) -> Result<bool, LoungeError> {
        self.send_command(PlaybackCommand::SetPlaybackSpeed { speed })
            .await
    }

    pub async fn send_dpad_command(&self, key: DpadKey) -> Result<bool, LoungeError> {
        self.send_command(PlaybackCommand::Dpad { key }).await
    }

    pub async fn set_subtitles_track(
        &self,
        language_code: &str,
        video_id: &str,
    ) -> Result<bool, LoungeError> {
        self.send_command(PlaybackCommand::SetSubtitlesTrack {
            language_code: language_code.to_string(),
            video_id: video_id.to_string(),
        })
        .await
    }

    /// Ask the screen to report its current video with a `nowPlaying` event.
    pub async fn get_now_playing(&self) -> Result<bool, LoungeError> {
        self.send_command(PlaybackCommand::GetNowPlaying).await
    }

    /// Parameters shared by subscribe, command and disconnect requests.
    fn session_params(
        &self,
        state: &LoungeState,
    ) -> Result<Vec<(&'static str, String)>, LoungeError> {
        let (Some(token), Some(sid), Some(gsession)) = (
            state.auth.lounge_id_token.as_deref(),
            state.session.sid(),
            state.session.gsession(),
        ) else {
            return Err(LoungeError::NotConnected);
        };
        if state.stage() != LinkStage::Bound {
            return Err(LoungeError::NotConnected);
        }
        Ok(vec![
            ("name", self.device_name.clone()),
            ("loungeIdToken", token.to_string()),
            ("SID", sid.to_string()),
            ("AID", state.session.last_event_id().unwrap_or(0).to_string()),
            ("gsessionid", gsession.to_string()),
            ("device", "REMOTE_CONTROL".to_string()),
            ("app", "youtube-desktop".to_string()),
            ("VER", "8".to_string()),
            ("v", "2".to_string()),
        ])
    }

    /// Route one batch, dispatching each event before the next entry.
    async fn process_batch(
        &self,
        batch: EventBatch,
        listener: &dyn EventListener,
    ) -> Result<(), LoungeError> {
        let entries = BatchEntry::parse_batch(batch)?;
        let (first_id, last_id) = match (entries.first(), entries.last()) {
            (Some(first), Some(last)) => (first.id, last.id),
            _ => return Ok(()),
        };
        trace!(first_id, last_id, count = entries.len(), "Processing batch");

        let mut router = EventRouter::new();
        for entry in entries {
            let routed = {
                let mut state = self.state.lock().await;
                match router.route(&mut state, entry) {
                    Ok(routed) => routed,
                    Err(e @ LoungeError::NotSupported(_)) => {
                        // Ids from earlier in the batch must not outlive the rejection
                        state.connection_lost();
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                }
            };
            if let Routed::Dispatch(event) = routed {
                self.dispatch(listener, event).await;
            }
        }

        let mut state = self.state.lock().await;
        router.finish(&mut state, first_id, last_id);
        Ok(())
    }

    async fn dispatch(&self, listener: &dyn EventListener, event: LoungeEvent) {
        crate::listener::dispatch(listener, &event).await;
        let speed_changed = matches!(event, LoungeEvent::PlaybackSpeedChanged(_));
        // No receivers is not an error
        let _ = self.event_sender.send(event);

        if speed_changed {
            // The speed event carries no position; nowPlaying brings it back in sync
            if let Err(e) = self.get_now_playing().await {
                warn!(error = %e, "getNowPlaying after speed change failed");
            }
        }
    }

    /// Apply the session-loss table to a response. `Ok(None)` means the
    /// session (and maybe the token) was cleared.
    async fn check_session_result(
        &self,
        response: Response,
    ) -> Result<Option<Response>, LoungeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(Some(response));
        }
        let body = response.text().await.unwrap_or_default();
        match SessionLoss::classify(status.as_u16(), &reason_text(status, &body)) {
            Some(loss) => {
                warn!(%status, ?loss, "Session lost");
                self.state.lock().await.apply_loss(loss);
                Ok(None)
            }
            None => {
                error!(%status, body = %body, "Request rejected");
                Err(LoungeError::RequestRejected {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn require_success(
        operation: &'static str,
        response: Response,
    ) -> Result<Response, LoungeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!(operation, %status, body = %body, "Request rejected");
        Err(LoungeError::RequestRejected {
            status: status.as_u16(),
            body,
        })
    }
}

// Reason phrase plus body, since the server puts the details in either
fn reason_text(status: StatusCode, body: &str) -> String {
    format!("{} {}", status.canonical_reason().unwrap_or_default(), body)
}

// A body cut short (server closed before Content-Length or the last chunk)
// surfaces as a decode error whose source chain ends in UnexpectedEof.
// Resets and other transport failures carry different kinds.
fn is_truncated_body(e: &reqwest::Error) -> bool {
    use std::error::Error as StdError;
    if !(e.is_body() || e.is_decode()) {
        return false;
    }
    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return io_err.kind() == std::io::ErrorKind::UnexpectedEof;
        }
        source = err.source();
    }
    false
}
