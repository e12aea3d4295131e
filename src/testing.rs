//! Test doubles for the backend and the player factory.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use reqwest::StatusCode;
use tokio::sync::Notify;

use crate::backend::{Backend, BackendError, Endpoints, FileEntry, Operation};
use crate::player::{PlayerError, PlayerEvent, PlayerEventHandler, PlayerFactory, PlayerResource};
use crate::session::Sources;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Operation,
    pub args: Vec<String>,
}

/// In-memory backend. Calls succeed unless scripted otherwise, and a call
/// can be held until the test releases it.
pub struct FakeBackend {
    endpoints: Endpoints,
    calls: Mutex<Vec<Call>>,
    outcomes: Mutex<HashMap<Operation, VecDeque<bool>>>,
    files: Mutex<HashMap<String, Vec<FileEntry>>>,
    holds: Mutex<HashMap<(Operation, String), Arc<Notify>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            endpoints: Endpoints::new("http://backend"),
            calls: Mutex::new(Vec::new()),
            outcomes: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            holds: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: Operation) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.op == op).count()
    }

    /// Queue outcomes for the next calls of `op` (`false` fails the call).
    pub fn script(&self, op: Operation, outcomes: &[bool]) {
        self.outcomes
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .extend(outcomes.iter().copied());
    }

    pub fn set_files(&self, magnet_id: &str, files: Vec<FileEntry>) {
        self.files
            .lock()
            .unwrap()
            .insert(magnet_id.to_string(), files);
    }

    /// Hold the next `op` call whose first argument is `key` until the
    /// returned handle is notified.
    pub fn hold(&self, op: Operation, key: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.holds
            .lock()
            .unwrap()
            .insert((op, key.to_string()), Arc::clone(&notify));
        notify
    }

    async fn respond(&self, op: Operation, args: &[&str]) -> Result<(), BackendError> {
        let key = args.first().map(|a| a.to_string()).unwrap_or_default();
        self.calls.lock().unwrap().push(Call {
            op,
            args: args.iter().map(|a| a.to_string()).collect(),
        });

        let hold = self.holds.lock().unwrap().remove(&(op, key));
        if let Some(notify) = hold {
            notify.notified().await;
        }

        let ok = self
            .outcomes
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(true);

        if ok {
            Ok(())
        } else {
            Err(BackendError::Status {
                op,
                status: StatusCode::INTERNAL_SERVER_ERROR,
            })
        }
    }
}

impl Backend for FakeBackend {
    fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn add_torrent(&self, magnet_id: &str) -> Result<(), BackendError> {
        self.respond(Operation::AddTorrent, &[magnet_id]).await
    }

    async fn fetch_metadata(&self, magnet_id: &str) -> Result<Vec<FileEntry>, BackendError> {
        self.respond(Operation::FetchMetadata, &[magnet_id]).await?;
        let files = self.files.lock().unwrap().get(magnet_id).cloned();
        Ok(files.unwrap_or_default())
    }

    async fn dispatch_to_external_player(&self, stream_url: &str) -> Result<(), BackendError> {
        self.respond(Operation::ExternalPlayer, &[stream_url]).await
    }

    async fn deselect_file(&self, magnet_id: &str, file_key: &str) -> Result<(), BackendError> {
        self.respond(Operation::DeselectFile, &[magnet_id, file_key])
            .await
    }

    async fn remove_torrent(&self, magnet_id: &str) -> Result<(), BackendError> {
        self.respond(Operation::RemoveTorrent, &[magnet_id]).await
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.respond(Operation::Ping, &[]).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerLog {
    Created(u32, String),
    Disposed(u32),
}

#[derive(Default)]
struct FactoryState {
    log: Vec<PlayerLog>,
    next_id: u32,
    fail_create: bool,
    fail_dispose: bool,
    handlers: Vec<(u32, PlayerEventHandler)>,
}

/// Player factory that records every create and dispose.
#[derive(Clone, Default)]
pub struct RecordingFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<PlayerLog> {
        self.state.lock().unwrap().log.clone()
    }

    /// Players created and not yet disposed.
    pub fn live(&self) -> usize {
        let state = self.state.lock().unwrap();
        let created = state
            .log
            .iter()
            .filter(|e| matches!(e, PlayerLog::Created(..)))
            .count();
        created - (state.log.len() - created)
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub fn fail_dispose(&self, fail: bool) {
        self.state.lock().unwrap().fail_dispose = fail;
    }

    /// Fire `event` on every live player.
    pub fn emit(&self, event: PlayerEvent) {
        let handlers: Vec<PlayerEventHandler> = self
            .state
            .lock()
            .unwrap()
            .handlers
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

impl PlayerFactory for RecordingFactory {
    fn create(&self, sources: &Sources) -> Result<Box<dyn PlayerResource>, PlayerError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(PlayerError::Launch(
                "fake".to_string(),
                "scripted failure".to_string(),
            ));
        }

        state.next_id += 1;
        let id = state.next_id;
        state.log.push(PlayerLog::Created(id, sources.video.clone()));

        Ok(Box::new(RecordingPlayer {
            id,
            state: Arc::clone(&self.state),
            disposed: false,
        }))
    }
}

struct RecordingPlayer {
    id: u32,
    state: Arc<Mutex<FactoryState>>,
    disposed: bool,
}

impl PlayerResource for RecordingPlayer {
    fn on_event(&mut self, handler: PlayerEventHandler) {
        self.state.lock().unwrap().handlers.push((self.id, handler));
    }

    fn dispose(&mut self) -> Result<(), PlayerError> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        let (handlers, fail) = {
            let mut state = self.state.lock().unwrap();
            state.log.push(PlayerLog::Disposed(self.id));
            let (mine, rest): (Vec<_>, Vec<_>) =
                state.handlers.drain(..).partition(|(id, _)| *id == self.id);
            state.handlers = rest;
            (mine, state.fail_dispose)
        };

        for (_, handler) in handlers {
            handler(PlayerEvent::Disposed);
        }

        if fail {
            Err(PlayerError::Dispose("scripted failure".to_string()))
        } else {
            Ok(())
        }
    }
}
