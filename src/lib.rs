//! Playback sessions for a torrent streaming backend.
//!
//! A [`PlaybackController`] owns one [`session::Session`]: it adds the
//! torrent to the backend, lists its files, binds the embedded player or
//! hands streams to the backend's external player, and tears everything
//! down again.

pub mod backend;
pub mod config;
pub mod controller;
pub mod doctor;
pub mod observer;
pub mod player;
pub mod session;
pub mod shell;
pub mod teardown;

#[cfg(test)]
mod testing;

pub use backend::{Backend, BackendClient, BackendError, FileEntry};
pub use config::{Config, ConfigError};
pub use controller::{ControllerError, Outcome, PlaybackController};
pub use observer::{Notice, NoticeLevel, SessionEvent, SessionObserver};
pub use player::{PlayerAdapter, PlayerFactory, ProcessPlayerFactory};
pub use session::{PlaybackMode, PlaybackState, PlaybackTarget, SessionSnapshot};
pub use teardown::{RemovePolicy, TeardownPolicy};
