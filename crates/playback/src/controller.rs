//! Playback session controller.
//!
//! A single actor task owns the element, the queue navigator and the load
//! state. Callers talk to it through a cloneable [`PlaybackHandle`]; state is
//! published on a `watch` channel and discrete events on a `broadcast` channel.
//!
//! Every selection bumps a generation counter and gets its own cancellation
//! token. Resolution runs in a spawned task and reports back tagged with its
//! generation, so a result that arrives after a newer selection is dropped
//! instead of overwriting the current track. The task only resolves the
//! remote URL and credentials; the proxy session is opened by the actor
//! after the generation check, so a stale load can never supersede the
//! session of a newer one.

use std::ops::ControlFlow;
use std::sync::Arc;

use media_proxy::CredentialHeaders;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::api::{CatalogApi, CredentialProvider, MediaProxy};
use crate::config::PlaybackConfig;
use crate::element::{ElementEvent, PlaybackElement};
use crate::error::PlaybackError;
use crate::image::ImageResolver;
use crate::media::{CatalogItem, MediaReference};
use crate::queue::{FlatPage, QueueContext, QueueNavigator, lookup_context};
use crate::retry::{self, RetryPolicy};
use crate::state::{PlaybackEvent, PlaybackState, PlayerPhase};

const EVENT_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, PlaybackError>>;

/// External collaborators injected into the controller.
#[derive(Clone)]
pub struct PlaybackServices {
    pub api: Arc<dyn CatalogApi>,
    pub proxy: Arc<dyn MediaProxy>,
    pub credentials: Arc<dyn CredentialProvider>,
}

enum Command {
    Select {
        item: CatalogItem,
        origin: Option<FlatPage>,
    },
    SetFavorites(FlatPage),
    TogglePlay(Reply<bool>),
    ToggleMute(Reply<bool>),
    SetVolume(f32, Reply<()>),
    Seek(f64, Reply<()>),
    Next(Reply<Option<CatalogItem>>),
    Previous(Reply<Option<CatalogItem>>),
    Stop(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

enum Internal {
    /// Remote URL and credentials for a load. The actor opens the proxy
    /// itself, so only the current generation ever reaches the proxy.
    Resolved {
        generation: u64,
        result: Result<(MediaReference, CredentialHeaders), PlaybackError>,
    },
    Context {
        generation: u64,
        item: CatalogItem,
        found: Option<QueueContext>,
    },
    Cover {
        generation: u64,
        data_url: String,
    },
}

struct Readiness {
    local_url: Url,
    warn_at: Instant,
    deadline: Instant,
    warned: bool,
}

/// An in-flight load. Dropped once the element becomes playable.
struct LoadTicket {
    generation: u64,
    token: CancellationToken,
    /// Set once the source is attached to the element.
    readiness: Option<Readiness>,
}

/// Cloneable front end to a running [`PlaybackController`].
#[derive(Clone)]
pub struct PlaybackHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<PlaybackState>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl PlaybackHandle {
    async fn send(&self, command: Command) -> Result<(), PlaybackError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PlaybackError::Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, PlaybackError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| PlaybackError::Closed)?
    }

    /// Start loading `item`, superseding whatever is current.
    pub async fn select(&self, item: CatalogItem) -> Result<(), PlaybackError> {
        self.send(Command::Select { item, origin: None }).await
    }

    /// Select the item at `index` of a favorites page and remember the page
    /// for queue navigation.
    pub async fn select_from_page(&self, page: FlatPage, index: usize) -> Result<(), PlaybackError> {
        let item = page.items.get(index).cloned().ok_or_else(|| {
            PlaybackError::InvalidArgument(format!(
                "index {index} out of range for page of {}",
                page.items.len()
            ))
        })?;
        self.send(Command::Select {
            item,
            origin: Some(page),
        })
        .await
    }

    pub async fn set_favorites(&self, page: FlatPage) -> Result<(), PlaybackError> {
        self.send(Command::SetFavorites(page)).await
    }

    /// Returns whether the track is playing afterwards.
    pub async fn toggle_play(&self) -> Result<bool, PlaybackError> {
        self.request(Command::TogglePlay).await
    }

    /// Returns whether the track is muted afterwards.
    pub async fn toggle_mute(&self) -> Result<bool, PlaybackError> {
        self.request(Command::ToggleMute).await
    }

    pub async fn set_volume(&self, volume: f32) -> Result<(), PlaybackError> {
        self.request(|reply| Command::SetVolume(volume, reply)).await
    }

    pub async fn seek(&self, position_secs: f64) -> Result<(), PlaybackError> {
        self.request(|reply| Command::Seek(position_secs, reply)).await
    }

    /// Skip to the next item in the current queue context, if any.
    pub async fn next(&self) -> Result<Option<CatalogItem>, PlaybackError> {
        self.request(Command::Next).await
    }

    pub async fn previous(&self) -> Result<Option<CatalogItem>, PlaybackError> {
        self.request(Command::Previous).await
    }

    pub async fn stop(&self) -> Result<(), PlaybackError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stop(tx)).await?;
        rx.await.map_err(|_| PlaybackError::Closed)
    }

    /// Stop playback, close every proxy session and end the actor.
    pub async fn shutdown(&self) -> Result<(), PlaybackError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await?;
        rx.await.map_err(|_| PlaybackError::Closed)
    }

    pub fn state(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&PlaybackState) -> bool,
    ) -> Result<PlaybackState, PlaybackError> {
        let mut state = self.state.clone();
        state
            .wait_for(predicate)
            .await
            .map(|s| s.clone())
            .map_err(|_| PlaybackError::Closed)
    }
}

pub struct PlaybackController<E: PlaybackElement> {
    element: E,
    element_events: mpsc::UnboundedReceiver<ElementEvent>,
    services: PlaybackServices,
    images: ImageResolver,
    config: PlaybackConfig,
    navigator: QueueNavigator,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    state_tx: watch::Sender<PlaybackState>,
    events_tx: broadcast::Sender<PlaybackEvent>,
    generation: u64,
    load: Option<LoadTicket>,
    /// Cancels context and cover lookups of the current selection.
    selection: CancellationToken,
    shutdown: CancellationToken,
}

impl<E: PlaybackElement> PlaybackController<E> {
    pub fn new(
        element: E,
        element_events: mpsc::UnboundedReceiver<ElementEvent>,
        services: PlaybackServices,
        config: PlaybackConfig,
    ) -> (Self, PlaybackHandle) {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PlaybackState {
            volume: config.initial_volume.clamp(0.0, 1.0),
            ..PlaybackState::default()
        });
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let shutdown = CancellationToken::new();

        let handle = PlaybackHandle {
            commands: command_tx,
            state: state_rx,
            events: events_tx.clone(),
        };

        let controller = Self {
            element,
            element_events,
            images: ImageResolver::new(services.api.clone(), config.image_retry.clone()),
            navigator: QueueNavigator::new(config.page_retry.clone()),
            services,
            config,
            commands: command_rx,
            internal_tx,
            internal_rx,
            state_tx,
            events_tx,
            generation: 0,
            load: None,
            selection: shutdown.child_token(),
            shutdown,
        };

        (controller, handle)
    }

    /// Create the controller and run it on a new task.
    pub fn spawn(
        element: E,
        element_events: mpsc::UnboundedReceiver<ElementEvent>,
        services: PlaybackServices,
        config: PlaybackConfig,
    ) -> (PlaybackHandle, JoinHandle<()>) {
        let (controller, handle) = Self::new(element, element_events, services, config);
        (handle, tokio::spawn(controller.run()))
    }

    pub async fn run(mut self) {
        let volume = self.state_tx.borrow().volume;
        self.element.set_volume(volume).await;
        info!("Playback controller started");

        loop {
            let timer = self.readiness_deadline();
            // Internal results go first so a queue context resolved alongside
            // a track is installed before that track's element events.
            tokio::select! {
                biased;
                Some(message) = self.internal_rx.recv() => self.handle_internal(message).await,
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("All playback handles dropped");
                        self.teardown().await;
                        break;
                    };
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
                Some(event) = self.element_events.recv() => self.handle_element_event(event).await,
                () = sleep_until(timer) => self.on_readiness_timer().await,
            }
        }

        info!("Playback controller stopped");
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Select { item, origin } => {
                if let Some(page) = origin {
                    self.navigator.set_favorites(page);
                }
                self.begin_load(item).await;
            }
            Command::SetFavorites(page) => self.navigator.set_favorites(page),
            Command::TogglePlay(reply) => {
                let _ = reply.send(self.toggle_play().await);
            }
            Command::ToggleMute(reply) => {
                let _ = reply.send(self.toggle_mute().await);
            }
            Command::SetVolume(volume, reply) => {
                let _ = reply.send(self.set_volume(volume).await);
            }
            Command::Seek(position, reply) => {
                let _ = reply.send(self.seek(position).await);
            }
            Command::Next(reply) => {
                let _ = reply.send(self.step(true).await);
            }
            Command::Previous(reply) => {
                let _ = reply.send(self.step(false).await);
            }
            Command::Stop(reply) => {
                self.stop().await;
                let _ = reply.send(());
            }
            Command::Shutdown(reply) => {
                self.teardown().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Resolved { generation, result } => {
                if !self.is_resolving(generation) {
                    debug!(generation, current = self.generation, "Discarding stale resolution");
                    return;
                }
                match result {
                    Ok((media, credentials)) => self.open_and_attach(media, credentials).await,
                    Err(PlaybackError::Cancelled) => {}
                    Err(e) => self.fail(e).await,
                }
            }
            Internal::Context {
                generation,
                item,
                found,
            } => {
                if generation == self.generation {
                    self.navigator.apply_lookup(&item, found);
                }
            }
            Internal::Cover {
                generation,
                data_url,
            } => {
                if generation == self.generation {
                    self.state_tx.send_modify(|s| s.cover = Some(data_url));
                }
            }
        }
    }

    async fn handle_element_event(&mut self, event: ElementEvent) {
        match event {
            ElementEvent::CanPlay => self.on_can_play().await,
            ElementEvent::Error { message } => {
                if self.awaiting_ready() || self.phase().is_ready() {
                    self.fail(PlaybackError::AudioLoadError { message }).await;
                } else {
                    debug!(%message, "Ignoring element error with no active source");
                }
            }
            ElementEvent::Ended => {
                if self.phase().is_ready() {
                    self.on_natural_end().await;
                }
            }
            ElementEvent::TimeUpdate { position_secs } => {
                if self.phase().is_ready() {
                    self.state_tx
                        .send_modify(|s| s.current_time_secs = position_secs.max(0.0));
                }
            }
            ElementEvent::DurationChange { duration_secs } => {
                let live = self.awaiting_ready() || self.phase().is_ready();
                if live && duration_secs.is_finite() && duration_secs > 0.0 {
                    self.state_tx.send_modify(|s| s.duration_secs = duration_secs);
                }
            }
        }
    }

    fn phase(&self) -> PlayerPhase {
        self.state_tx.borrow().phase
    }

    fn current_item(&self) -> Option<CatalogItem> {
        self.state_tx.borrow().current_item.clone()
    }

    fn emit(&self, event: PlaybackEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    fn is_resolving(&self, generation: u64) -> bool {
        self.load
            .as_ref()
            .is_some_and(|l| l.generation == generation && l.readiness.is_none())
    }

    fn awaiting_ready(&self) -> bool {
        self.load.as_ref().is_some_and(|l| l.readiness.is_some())
    }

    fn readiness_deadline(&self) -> Option<Instant> {
        let readiness = self.load.as_ref()?.readiness.as_ref()?;
        Some(if readiness.warned {
            readiness.deadline
        } else {
            readiness.warn_at
        })
    }

    fn cancel_load(&mut self) {
        if let Some(load) = self.load.take() {
            load.token.cancel();
            debug!(generation = load.generation, "Cancelled in-flight load");
        }
    }

    async fn reset_element(&mut self) {
        self.element.pause().await;
        self.element.clear_source().await;
        self.element.load().await;
        // Anything still queued belongs to the source just removed.
        while self.element_events.try_recv().is_ok() {}
    }

    async fn begin_load(&mut self, item: CatalogItem) {
        self.cancel_load();
        self.selection.cancel();
        self.reset_element().await;

        self.generation += 1;
        let generation = self.generation;
        // Until the lookup for this item reports back, only a context that
        // already contains it may drive next/previous.
        self.navigator.retarget(&item);
        let token = self.shutdown.child_token();
        self.selection = self.shutdown.child_token();
        self.load = Some(LoadTicket {
            generation,
            token: token.clone(),
            readiness: None,
        });

        info!(
            generation,
            catalog_id = %item.catalog_id,
            part = ?item.part_index,
            title = %item.title,
            "Loading track"
        );
        let duration = item.duration_secs as f64;
        let selected = item.clone();
        self.state_tx.send_modify(|s| {
            s.phase = PlayerPhase::Loading;
            s.is_loading = true;
            s.is_playing = false;
            s.current_time_secs = 0.0;
            s.duration_secs = duration;
            s.current_item = Some(selected);
            s.active_media = None;
            s.cover = None;
            s.last_error = None;
        });

        self.spawn_resolution(generation, item.clone(), token);
        self.spawn_context_lookup(generation, item.clone());
        if self.config.resolve_covers
            && let Some(cover_url) = item.cover_url
        {
            self.spawn_cover(generation, cover_url);
        }
    }

    fn spawn_resolution(&self, generation: u64, item: CatalogItem, token: CancellationToken) {
        let services = self.services.clone();
        let policy = self.config.media_retry.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = resolve_track(&services, &policy, &item, &token).await;
            if token.is_cancelled() {
                return;
            }
            let _ = tx.send(Internal::Resolved { generation, result });
        });
    }

    fn spawn_context_lookup(&self, generation: u64, item: CatalogItem) {
        let api = self.services.api.clone();
        let token = self.selection.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let found = tokio::select! {
                _ = token.cancelled() => return,
                found = lookup_context(api.as_ref(), &item) => found,
            };
            let _ = tx.send(Internal::Context {
                generation,
                item,
                found,
            });
        });
    }

    fn spawn_cover(&self, generation: u64, cover_url: String) {
        let images = self.images.clone();
        let token = self.selection.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            match images.resolve(&cover_url, &token).await {
                Ok(data_url) => {
                    let _ = tx.send(Internal::Cover {
                        generation,
                        data_url,
                    });
                }
                Err(PlaybackError::Cancelled) => {}
                Err(e) => debug!(generation, error = %e, "Cover image unavailable"),
            }
        });
    }

    async fn open_and_attach(&mut self, media: MediaReference, credentials: CredentialHeaders) {
        let opened = self
            .services
            .proxy
            .open_proxy(&media.remote_url, credentials)
            .await;
        match opened {
            Ok(local_url) => self.attach(media, local_url).await,
            Err(e) => {
                self.fail(PlaybackError::ProxyFailed {
                    message: e.to_string(),
                })
                .await
            }
        }
    }

    async fn attach(&mut self, media: MediaReference, local_url: Url) {
        if let Err(e) = self.element.set_source(&local_url).await {
            self.fail(PlaybackError::AudioLoadError {
                message: e.to_string(),
            })
            .await;
            return;
        }
        self.element.load().await;

        let now = Instant::now();
        let (warn_after, timeout) = (self.config.ready_warn_after, self.config.ready_timeout);
        if let Some(load) = self.load.as_mut() {
            debug!(generation = load.generation, %local_url, "Source attached, waiting for element");
            load.readiness = Some(Readiness {
                local_url,
                warn_at: now + warn_after,
                deadline: now + timeout,
                warned: false,
            });
        }
        self.state_tx.send_modify(|s| s.active_media = Some(media));
    }

    async fn on_readiness_timer(&mut self) {
        let warn_after = self.config.ready_warn_after;
        let Some(load) = self.load.as_mut() else {
            return;
        };
        let generation = load.generation;
        let Some(readiness) = load.readiness.as_mut() else {
            return;
        };

        if !readiness.warned {
            readiness.warned = true;
            warn!(generation, waited = ?warn_after, "Audio is slow to become playable");
            return;
        }

        let timeout = self.config.ready_timeout;
        self.fail(PlaybackError::AudioLoadTimeout { timeout }).await;
    }

    async fn on_can_play(&mut self) {
        let Some(load) = self.load.take_if(|l| l.readiness.is_some()) else {
            return;
        };
        let Some(readiness) = load.readiness else {
            return;
        };
        let Some(item) = self.current_item() else {
            return;
        };

        match self.element.play().await {
            Ok(()) => {
                info!(generation = load.generation, catalog_id = %item.catalog_id, "Track started");
                self.state_tx.send_modify(|s| {
                    s.phase = PlayerPhase::Playing;
                    s.is_playing = true;
                    s.is_loading = false;
                });
                self.emit(PlaybackEvent::TrackStarted {
                    item,
                    local_url: readiness.local_url.to_string(),
                });
            }
            Err(e) => {
                let message = e.to_string();
                warn!(generation = load.generation, error = %message, "Play rejected, track left paused");
                self.state_tx.send_modify(|s| {
                    s.phase = PlayerPhase::Paused;
                    s.is_playing = false;
                    s.is_loading = false;
                });
                self.emit(PlaybackEvent::PlayRejected { item, message });
            }
        }
    }

    async fn fail(&mut self, err: PlaybackError) {
        self.cancel_load();
        self.element.pause().await;
        self.element.clear_source().await;
        while self.element_events.try_recv().is_ok() {}

        let message = err.to_string();
        let item = self.current_item();
        error!(
            generation = self.generation,
            catalog_id = ?item.as_ref().map(|i| i.catalog_id.as_str()),
            error = %message,
            "Track failed"
        );
        let last_error = message.clone();
        self.state_tx.send_modify(|s| {
            s.phase = PlayerPhase::Failed;
            s.is_playing = false;
            s.is_loading = false;
            s.active_media = None;
            s.last_error = Some(last_error);
        });
        if let Some(item) = item {
            self.emit(PlaybackEvent::LoadFailed { item, message });
        }
    }

    async fn on_natural_end(&mut self) {
        let Some(item) = self.current_item() else {
            return;
        };
        info!(catalog_id = %item.catalog_id, "Track ended");

        self.element.pause().await;
        if let Err(e) = self.element.seek(0.0).await {
            debug!(error = %e, "Could not rewind finished track");
        }
        self.state_tx.send_modify(|s| {
            s.phase = PlayerPhase::Idle;
            s.is_playing = false;
            s.current_time_secs = 0.0;
        });
        self.emit(PlaybackEvent::TrackEnded { item: item.clone() });

        let next = self
            .navigator
            .next(self.services.api.as_ref(), &item, &self.shutdown)
            .await;
        match next {
            Ok(Some(next)) => self.begin_load(next).await,
            Ok(None) => {
                info!("Queue exhausted");
                self.emit(PlaybackEvent::QueueExhausted);
            }
            Err(e) => warn!(error = %e, "Could not advance queue"),
        }
    }

    fn require_ready(&self) -> Result<(), PlaybackError> {
        if self.phase().is_ready() {
            Ok(())
        } else {
            Err(PlaybackError::NotReady)
        }
    }

    async fn toggle_play(&mut self) -> Result<bool, PlaybackError> {
        match self.phase() {
            PlayerPhase::Playing => {
                self.element.pause().await;
                self.state_tx.send_modify(|s| {
                    s.phase = PlayerPhase::Paused;
                    s.is_playing = false;
                });
                Ok(false)
            }
            PlayerPhase::Paused => match self.element.play().await {
                Ok(()) => {
                    self.state_tx.send_modify(|s| {
                        s.phase = PlayerPhase::Playing;
                        s.is_playing = true;
                    });
                    Ok(true)
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(error = %message, "Play rejected");
                    if let Some(item) = self.current_item() {
                        self.emit(PlaybackEvent::PlayRejected {
                            item,
                            message: message.clone(),
                        });
                    }
                    Err(PlaybackError::PlayRejected { message })
                }
            },
            _ => Err(PlaybackError::NotReady),
        }
    }

    async fn toggle_mute(&mut self) -> Result<bool, PlaybackError> {
        self.require_ready()?;
        let muted = !self.state_tx.borrow().is_muted;
        self.element.set_muted(muted).await;
        self.state_tx.send_modify(|s| s.is_muted = muted);
        Ok(muted)
    }

    async fn set_volume(&mut self, volume: f32) -> Result<(), PlaybackError> {
        self.require_ready()?;
        if !volume.is_finite() {
            return Err(PlaybackError::InvalidArgument(format!(
                "volume must be finite, got {volume}"
            )));
        }
        let volume = volume.clamp(0.0, 1.0);
        self.element.set_volume(volume).await;
        self.state_tx.send_modify(|s| s.volume = volume);
        Ok(())
    }

    async fn seek(&mut self, position_secs: f64) -> Result<(), PlaybackError> {
        self.require_ready()?;
        if !position_secs.is_finite() {
            return Err(PlaybackError::InvalidArgument(format!(
                "seek position must be finite, got {position_secs}"
            )));
        }
        let duration = self.state_tx.borrow().duration_secs;
        let mut position = position_secs.max(0.0);
        if duration > 0.0 {
            position = position.min(duration);
        }
        self.element.seek(position).await?;
        self.state_tx.send_modify(|s| s.current_time_secs = position);
        Ok(())
    }

    async fn step(&mut self, forward: bool) -> Result<Option<CatalogItem>, PlaybackError> {
        let Some(current) = self.current_item() else {
            return Ok(None);
        };
        let target = if forward {
            self.navigator
                .next(self.services.api.as_ref(), &current, &self.shutdown)
                .await?
        } else {
            self.navigator.previous(&current)
        };
        if let Some(item) = &target {
            self.begin_load(item.clone()).await;
        }
        Ok(target)
    }

    async fn stop(&mut self) {
        self.cancel_load();
        self.selection.cancel();
        self.reset_element().await;
        self.state_tx.send_modify(|s| {
            s.phase = PlayerPhase::Idle;
            s.is_playing = false;
            s.is_loading = false;
            s.current_time_secs = 0.0;
            s.active_media = None;
        });
        info!("Playback stopped");
    }

    async fn teardown(&mut self) {
        self.stop().await;
        self.shutdown.cancel();
        self.services.proxy.close_all();
    }
}

async fn resolve_track(
    services: &PlaybackServices,
    policy: &RetryPolicy,
    item: &CatalogItem,
    token: &CancellationToken,
) -> Result<(MediaReference, CredentialHeaders), PlaybackError> {
    let api = &services.api;
    let remote_url = retry::execute(policy, token, move |_| {
        api.resolve_media_url(&item.catalog_id, item.part_index)
    })
    .await?;

    let credentials = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(PlaybackError::Cancelled),
        credentials = services.credentials.credential_headers() => credentials,
    };

    let media = MediaReference {
        catalog_id: item.catalog_id.clone(),
        part_index: item.part_index,
        remote_url,
    };
    Ok((media, credentials))
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
