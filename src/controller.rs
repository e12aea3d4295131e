//! Playback session state machine.
//!
//! `Idle -> Listed -> Playing(mode, target) -> Listed/Idle`. The controller is
//! the only writer of the [`Session`]; views read [`SessionSnapshot`]s and
//! receive [`SessionEvent`]s through registered observers.
//!
//! Backend calls are awaited without holding the session lock. Every call
//! records the session generation it was issued under and its response is
//! dropped if the session was replaced or closed in the meantime.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, BackendError};
use crate::observer::{Notice, ObserverRegistry, SessionEvent, SessionObserver};
use crate::player::{PlayerAdapter, PlayerError, PlayerEvent, PlayerFactory};
use crate::session::{PlaybackTarget, Session, SessionSnapshot, Sources};
use crate::teardown::{TeardownCoordinator, TeardownPolicy};

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("torrent has not been added to the backend yet")]
    NotAdded,
    #[error("file '{0}' is not in the current file list")]
    UnknownFile(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Player(#[from] PlayerError),
}

/// What happened to a response once it arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// The session moved on while the call was in flight.
    Discarded,
}

struct Inner<F> {
    session: Session,
    player: PlayerAdapter<F>,
    generations: u64,
}

impl<F: PlayerFactory> Inner<F> {
    fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot(self.player.is_bound())
    }

    /// Replace the session with a fresh one, invalidating in-flight calls.
    fn renew(&mut self, magnet_id: String) {
        self.generations += 1;
        self.session = Session::new(magnet_id, self.generations);
    }
}

pub struct PlaybackController<B, F> {
    backend: B,
    policy: TeardownPolicy,
    inner: Mutex<Inner<F>>,
    observers: Arc<ObserverRegistry>,
}

fn short(magnet_id: &str) -> &str {
    let end = magnet_id
        .char_indices()
        .nth(60)
        .map_or(magnet_id.len(), |(i, _)| i);
    &magnet_id[..end]
}

impl<B: Backend, F: PlayerFactory> PlaybackController<B, F> {
    pub fn new(backend: B, factory: F, magnet_id: impl Into<String>) -> Self {
        Self::with_policy(backend, factory, magnet_id, TeardownPolicy::default())
    }

    pub fn with_policy(
        backend: B,
        factory: F,
        magnet_id: impl Into<String>,
        policy: TeardownPolicy,
    ) -> Self {
        let observers = Arc::new(ObserverRegistry::new());

        let mut player = PlayerAdapter::new(factory);
        let sink = Arc::clone(&observers);
        player.set_event_sink(Arc::new(move |event: PlayerEvent| {
            sink.broadcast(&SessionEvent::Player(event));
        }));

        Self {
            backend,
            policy,
            inner: Mutex::new(Inner {
                session: Session::new(magnet_id, 1),
                player,
                generations: 1,
            }),
            observers,
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) {
        self.observers.register(observer);
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<F>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> (u64, String) {
        let inner = self.lock();
        (
            inner.session.generation(),
            inner.session.magnet_id().to_string(),
        )
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.lock().session.generation() != generation
    }

    /// Run `f` against the session if it is still `generation`, then publish
    /// the new state. `None` means the change was discarded.
    fn apply<R>(&self, generation: u64, f: impl FnOnce(&mut Inner<F>) -> R) -> Option<R> {
        let (value, snapshot) = {
            let mut inner = self.lock();
            if inner.session.generation() != generation {
                return None;
            }
            let value = f(&mut inner);
            (value, inner.snapshot())
        };

        self.observers.broadcast(&SessionEvent::StateChanged(snapshot));
        Some(value)
    }

    fn notify(&self, notice: Notice) {
        self.observers.broadcast(&SessionEvent::Notice(notice));
    }

    fn backend_failed(&self, e: BackendError, title: &str, description: &str) -> ControllerError {
        error!(op = %e.operation(), error = %e, "backend call failed");
        self.notify(Notice::error(title, description));
        e.into()
    }

    fn player_failed(&self, e: PlayerError) -> ControllerError {
        error!(error = %e, "embedded player failed to start");
        self.notify(Notice::error("Couldn't start the player", e.to_string()));
        e.into()
    }

    fn rejected(&self, e: ControllerError) -> ControllerError {
        warn!(error = %e, "playback request rejected");
        let notice = match &e {
            ControllerError::NotAdded => Notice::error(
                "Torrent not added yet",
                "Start streaming the torrent first so the backend knows about it.",
            ),
            ControllerError::UnknownFile(key) => Notice::error(
                "File not found",
                format!("'{}' is not in the current file list, refresh the files and try again.", key),
            ),
            other => Notice::error("Playback request rejected", other.to_string()),
        };
        self.notify(notice);
        e
    }

    /// File-scoped streams need a successful add and a key from the
    /// current file list.
    fn check_playable(session: &Session, file_key: &str) -> Result<(), ControllerError> {
        if !session.is_added() {
            return Err(ControllerError::NotAdded);
        }
        if session.find_file(file_key).is_none() {
            return Err(ControllerError::UnknownFile(file_key.to_string()));
        }
        Ok(())
    }

    /// Start a new session for `magnet_id`, disposing the player. Responses
    /// for the previous session are discarded when they arrive.
    pub fn open_session(&self, magnet_id: impl Into<String>) {
        let magnet_id = magnet_id.into();
        let snapshot = {
            let mut inner = self.lock();
            inner.player.dispose();
            inner.renew(magnet_id);
            info!(
                magnet = short(inner.session.magnet_id()),
                generation = inner.session.generation(),
                "session opened"
            );
            inner.snapshot()
        };
        self.observers.broadcast(&SessionEvent::StateChanged(snapshot));
    }

    /// Leave the session without touching the backend: the player is
    /// disposed and in-flight responses are discarded.
    pub fn close(&self) {
        let snapshot = {
            let mut inner = self.lock();
            inner.player.dispose();
            let magnet_id = inner.session.magnet_id().to_string();
            inner.renew(magnet_id);
            debug!("session closed");
            inner.snapshot()
        };
        self.observers.broadcast(&SessionEvent::StateChanged(snapshot));
    }

    /// Add the torrent, then play it whole in the embedded player with
    /// subtitles. On failure nothing changes.
    pub async fn submit_magnet(&self) -> Result<Outcome, ControllerError> {
        let (generation, magnet_id) = self.current();
        info!(magnet = short(&magnet_id), generation, "adding torrent");

        let result = self.backend.add_torrent(&magnet_id).await;
        if self.is_stale(generation) {
            debug!(generation, "discarding stale add response");
            return Ok(Outcome::Discarded);
        }
        if let Err(e) = result {
            return Err(self.backend_failed(
                e,
                "Error streaming video",
                "Couldn't stream the video, make sure the torrent is valid and the backend server is running.",
            ));
        }

        let sources = Sources {
            video: self.backend.stream_url(&magnet_id),
            subtitle: Some(self.backend.subtitle_url(&magnet_id)),
        };

        let bound = self.apply(generation, |inner| {
            inner.session.mark_added();
            inner
                .session
                .play_embedded(PlaybackTarget::WholeTorrent, sources.clone());
            inner.player.bind(&sources)
        });

        match bound {
            None => Ok(Outcome::Discarded),
            Some(Ok(())) => {
                info!("streaming whole torrent in embedded player");
                Ok(Outcome::Applied)
            }
            Some(Err(e)) => Err(self.player_failed(e)),
        }
    }

    /// Fetch the file list. A failure leaves the previous list in place.
    pub async fn request_file_list(&self) -> Result<Outcome, ControllerError> {
        let (generation, magnet_id, request) = {
            let mut inner = self.lock();
            let request = inner.session.next_metadata_request();
            (
                inner.session.generation(),
                inner.session.magnet_id().to_string(),
                request,
            )
        };
        debug!(generation, request, "fetching metadata");

        let result = self.backend.fetch_metadata(&magnet_id).await;

        let files = {
            let inner = self.lock();
            let current = inner.session.generation() == generation
                && inner.session.is_latest_metadata_request(request);
            if !current {
                debug!(generation, request, "discarding stale metadata response");
                return Ok(Outcome::Discarded);
            }
            result
        };

        let files = match files {
            Ok(files) => files,
            Err(e) => {
                return Err(self.backend_failed(
                    e,
                    "Backend is not running on your local machine",
                    "The backend is not running or no files were found in the torrent.",
                ));
            }
        };

        info!(files = files.len(), "file list received");
        let applied = self.apply(generation, |inner| {
            if inner.session.is_latest_metadata_request(request) {
                inner.session.replace_files(files);
                true
            } else {
                false
            }
        });

        match applied {
            Some(true) => Ok(Outcome::Applied),
            _ => Ok(Outcome::Discarded),
        }
    }

    /// Play one file in the embedded player. The torrent is already added,
    /// so no backend call is made; the previous player is disposed first.
    pub fn play_file_in_browser(&self, file_key: &str) -> Result<(), ControllerError> {
        let (bound, snapshot) = {
            let mut inner = self.lock();
            let checked = Self::check_playable(&inner.session, file_key);
            if let Err(e) = checked {
                drop(inner);
                return Err(self.rejected(e));
            }

            let magnet_id = inner.session.magnet_id().to_string();
            let sources = Sources {
                video: self.backend.file_stream_url(&magnet_id, file_key),
                subtitle: inner.session.sources().and_then(|s| s.subtitle.clone()),
            };

            inner
                .session
                .play_embedded(PlaybackTarget::File(file_key.to_string()), sources.clone());
            let bound = inner.player.bind(&sources);
            (bound, inner.snapshot())
        };

        self.observers.broadcast(&SessionEvent::StateChanged(snapshot));
        info!(file = file_key, "streaming file in embedded player");
        bound.map_err(|e| self.player_failed(e))
    }

    /// Hand one file to the backend's external player. Embedded playback
    /// is left as it is.
    pub async fn play_file_externally(&self, file_key: &str) -> Result<Outcome, ControllerError> {
        let (generation, magnet_id) = {
            let inner = self.lock();
            let checked = Self::check_playable(&inner.session, file_key);
            if let Err(e) = checked {
                drop(inner);
                return Err(self.rejected(e));
            }
            (
                inner.session.generation(),
                inner.session.magnet_id().to_string(),
            )
        };

        let stream_url = self.backend.file_stream_url(&magnet_id, file_key);
        self.dispatch_external(generation, PlaybackTarget::File(file_key.to_string()), stream_url)
            .await
    }

    /// Add the torrent and hand the whole-torrent stream to the backend's
    /// external player.
    pub async fn play_torrent_externally(&self) -> Result<Outcome, ControllerError> {
        let (generation, magnet_id) = self.current();
        info!(magnet = short(&magnet_id), generation, "adding torrent for external player");

        let result = self.backend.add_torrent(&magnet_id).await;
        if self.is_stale(generation) {
            debug!(generation, "discarding stale add response");
            return Ok(Outcome::Discarded);
        }
        if let Err(e) = result {
            return Err(self.backend_failed(
                e,
                "Error streaming to external player",
                "Make sure the external player is installed and configured on the backend, and the backend server is running.",
            ));
        }

        if self
            .apply(generation, |inner| inner.session.mark_added())
            .is_none()
        {
            return Ok(Outcome::Discarded);
        }

        let stream_url = self.backend.stream_url(&magnet_id);
        self.dispatch_external(generation, PlaybackTarget::WholeTorrent, stream_url)
            .await
    }

    async fn dispatch_external(
        &self,
        generation: u64,
        target: PlaybackTarget,
        stream_url: String,
    ) -> Result<Outcome, ControllerError> {
        info!(%target, "dispatching to external player");
        let result = self.backend.dispatch_to_external_player(&stream_url).await;

        if self.is_stale(generation) {
            debug!(generation, "discarding stale external player response");
            return Ok(Outcome::Discarded);
        }
        if let Err(e) = result {
            return Err(self.backend_failed(
                e,
                "Error streaming to external player",
                "Make sure the external player is installed and configured on the backend, and the backend server is running.",
            ));
        }

        match self.apply(generation, |inner| {
            inner.session.play_external(target, stream_url)
        }) {
            Some(()) => Ok(Outcome::Applied),
            None => Ok(Outcome::Discarded),
        }
    }

    /// Deselect a file on the backend, then clear playback locally. Local
    /// state is cleared even when the backend calls fail, unless a newer
    /// play or session started while the deselects were in flight. Backend
    /// failures are reported either way.
    pub async fn stop_file(&self, file_key: &str) -> Result<Outcome, ControllerError> {
        let (generation, magnet_id, playback) = {
            let inner = self.lock();
            (
                inner.session.generation(),
                inner.session.magnet_id().to_string(),
                inner.session.playback(),
            )
        };
        info!(file = file_key, "stopping file");

        let result = TeardownCoordinator::new(&self.backend, self.policy)
            .deselect(&magnet_id, file_key)
            .await;

        let cleared = self.apply(generation, |inner| {
            if inner.session.playback() != playback {
                return false;
            }
            inner.player.dispose();
            inner.session.clear_playback();
            true
        }) == Some(true);
        if !cleared {
            debug!(generation, playback, "playback changed during deselect, leaving it alone");
        }

        match result {
            Ok(()) if cleared => {
                self.notify(Notice::success(
                    "File download stopped",
                    "The backend is no longer downloading this file.",
                ));
                Ok(Outcome::Applied)
            }
            Ok(()) => Ok(Outcome::Discarded),
            Err(e) => Err(self.backend_failed(
                e,
                "Couldn't stop file download",
                "You can stop it by restarting the backend server or by removing the torrent completely.",
            )),
        }
    }

    /// Remove the torrent from the backend and reset the session. The reset
    /// happens even when the backend call fails, unless the session was
    /// replaced in the meantime. Backend failures are reported either way.
    pub async fn remove_torrent(&self) -> Result<Outcome, ControllerError> {
        let (generation, magnet_id, files) = {
            let inner = self.lock();
            (
                inner.session.generation(),
                inner.session.magnet_id().to_string(),
                inner.session.files().to_vec(),
            )
        };
        info!(magnet = short(&magnet_id), policy = ?self.policy.remove, "removing torrent");

        let result = TeardownCoordinator::new(&self.backend, self.policy)
            .remove(&magnet_id, &files)
            .await;

        let reset = self
            .apply(generation, |inner| {
                inner.player.dispose();
                inner.renew(magnet_id);
            })
            .is_some();
        if !reset {
            debug!(generation, "session changed during remove, nothing to reset");
        }

        match result {
            Ok(()) if reset => {
                self.notify(Notice::success(
                    "Torrent removed successfully",
                    "The torrent has been removed from the backend.",
                ));
                Ok(Outcome::Applied)
            }
            Ok(()) => Ok(Outcome::Discarded),
            Err(e) => Err(self.backend_failed(
                e,
                "Error removing the torrent",
                "Couldn't remove the torrent, you can remove it by restarting the backend server.",
            )),
        }
    }

    /// Ping the backend. Does not touch the session.
    pub async fn check_health(&self) -> Result<(), ControllerError> {
        match self.backend.ping().await {
            Ok(()) => {
                info!("backend is running");
                self.notify(Notice::success(
                    "Backend is running",
                    "The backend server is reachable.",
                ));
                Ok(())
            }
            Err(e) => Err(self.backend_failed(
                e,
                "Backend is not running",
                "The backend server could not be reached.",
            )),
        }
    }
}
