//! Embedded player lifecycle.
//!
//! The controller never touches a player resource directly. It tells the
//! [`PlayerAdapter`] which sources to play and the adapter disposes the old
//! resource before creating a new one, so at most one is ever alive.

pub mod process;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session::Sources;

pub use process::ProcessPlayerFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Playback stalled waiting for data.
    Waiting,
    /// The resource released its media resources.
    Disposed,
    /// Playback ended outside the app, e.g. the user closed the player.
    Exited,
}

pub type PlayerEventHandler = Arc<dyn Fn(PlayerEvent) + Send + Sync>;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("failed to launch player '{0}': {1}. Is the player installed and in your PATH?")]
    Launch(String, String),
    #[error("failed to dispose player: {0}")]
    Dispose(String),
}

/// A live player bound to one set of sources. Sources are never swapped in
/// place; a new resource is created instead.
pub trait PlayerResource: Send {
    fn on_event(&mut self, handler: PlayerEventHandler);

    /// Release the resource. Calling it again is a no-op.
    fn dispose(&mut self) -> Result<(), PlayerError>;
}

pub trait PlayerFactory: Send + Sync {
    fn create(&self, sources: &Sources) -> Result<Box<dyn PlayerResource>, PlayerError>;
}

pub struct PlayerAdapter<F> {
    factory: F,
    current: Option<Box<dyn PlayerResource>>,
    bound: Option<Sources>,
    sink: Option<PlayerEventHandler>,
    exited: Arc<AtomicBool>,
}

impl<F: PlayerFactory> PlayerAdapter<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            current: None,
            bound: None,
            sink: None,
            exited: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Where player events go after the adapter has logged them.
    pub fn set_event_sink(&mut self, sink: PlayerEventHandler) {
        self.sink = Some(sink);
    }

    /// A live resource exists and has not exited on its own.
    pub fn is_bound(&self) -> bool {
        self.current.is_some() && !self.exited.load(Ordering::Relaxed)
    }

    pub fn bound_sources(&self) -> Option<&Sources> {
        self.bound.as_ref()
    }

    /// Dispose any live resource, then create one for `sources`. An empty
    /// video source leaves the adapter unbound.
    pub fn bind(&mut self, sources: &Sources) -> Result<(), PlayerError> {
        self.dispose();

        if sources.video.is_empty() {
            debug!("no video source, player left unbound");
            return Ok(());
        }

        let mut resource = self.factory.create(sources)?;

        let exited = Arc::new(AtomicBool::new(false));
        self.exited = Arc::clone(&exited);

        let sink = self.sink.clone();
        resource.on_event(Arc::new(move |event: PlayerEvent| {
            match event {
                PlayerEvent::Waiting => debug!("player is waiting for data"),
                PlayerEvent::Disposed => debug!("player disposed"),
                PlayerEvent::Exited => {
                    info!("player exited");
                    exited.store(true, Ordering::Relaxed);
                }
            }
            if let Some(sink) = &sink {
                sink(event);
            }
        }));

        info!(video = %sources.video, "player bound");
        self.current = Some(resource);
        self.bound = Some(sources.clone());
        Ok(())
    }

    /// Release the live resource, if any. A failing dispose is logged and
    /// the handle is dropped anyway.
    pub fn dispose(&mut self) {
        self.bound = None;
        let Some(mut resource) = self.current.take() else {
            return;
        };

        if let Err(e) = resource.dispose() {
            warn!(error = %e, "player dispose failed, dropping handle");
        }
    }
}

impl<F> Drop for PlayerAdapter<F> {
    fn drop(&mut self) {
        if let Some(mut resource) = self.current.take() {
            let _ = resource.dispose();
        }
    }
}
