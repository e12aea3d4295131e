//! Line-oriented front-end for a [`PlaybackController`].
//!
//! Each command runs on its own task so a slow backend call never blocks
//! the prompt. Session events come back over a channel and are printed by
//! the input loop.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::backend::{Backend, FileEntry};
use crate::controller::{Outcome, PlaybackController};
use crate::observer::{NoticeLevel, SessionEvent, SessionObserver};
use crate::player::{PlayerEvent, PlayerFactory};
use crate::session::{PlaybackMode, PlaybackState, PlaybackTarget, SessionSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Add the torrent and play it whole in the embedded player.
    Play,
    Files,
    Browser(String),
    External(String),
    /// Add the torrent and play it whole in the external player.
    Vlc,
    Stop(String),
    Remove,
    Ping,
    Status,
    Open(String),
    Help,
    Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command '{0}', type 'help' for a list")]
    Unknown(String),
    #[error("'{0}' needs an argument: {1}")]
    MissingArgument(&'static str, &'static str),
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let arg = |name: &'static str, what: &'static str| {
            if rest.is_empty() {
                Err(ParseError::MissingArgument(name, what))
            } else {
                Ok(rest.to_string())
            }
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "play" => Command::Play,
            "files" | "ls" => Command::Files,
            "browser" | "b" => Command::Browser(arg("browser", "<file key>")?),
            "external" | "x" => Command::External(arg("external", "<file key>")?),
            "vlc" => Command::Vlc,
            "stop" => Command::Stop(arg("stop", "<file key>")?),
            "remove" | "rm" => Command::Remove,
            "ping" => Command::Ping,
            "status" => Command::Status,
            "open" => Command::Open(arg("open", "<magnet>")?),
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };

        Ok(Some(command))
    }
}

pub const HELP: &str = "\
commands:
  play              stream the whole torrent in the player
  files             list the files in the torrent
  browser <key>     play one file in the player
  external <key>    play one file in the backend's external player
  vlc               stream the whole torrent in the external player
  stop <key>        stop downloading one file
  remove            remove the torrent from the backend
  ping              check that the backend is running
  status            show the current session
  open <magnet>     switch to another torrent
  quit              leave";

/// Messages from observers and command tasks to the input loop.
pub enum ShellMessage {
    Event(SessionEvent),
    Failed { command: String, error: String },
}

/// Forwards session events to the input loop.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ShellMessage>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<ShellMessage>) -> Self {
        Self { tx }
    }
}

impl SessionObserver for ChannelObserver {
    fn name(&self) -> &str {
        "shell"
    }

    fn on_event(&self, event: &SessionEvent) {
        let _ = self.tx.send(ShellMessage::Event(event.clone()));
    }
}

pub fn render_state(state: &PlaybackState) -> String {
    match state {
        PlaybackState::Idle => "idle".to_string(),
        PlaybackState::Listed => "files listed".to_string(),
        PlaybackState::Playing { mode, target } => {
            let mode = match mode {
                PlaybackMode::Embedded => "player",
                PlaybackMode::External => "external player",
            };
            format!("playing {} in {}", target, mode)
        }
    }
}

pub fn render_file(file: &FileEntry, selected: Option<&PlaybackTarget>) -> String {
    let marker = match selected.and_then(PlaybackTarget::file_key) {
        Some(key) if key == file.key() => ">",
        _ => " ",
    };

    let mut line = format!("{} [{}] {}", marker, file.key(), file.name);
    if let Some(episode) = file.episode() {
        line.push_str(&format!("  ({})", episode.label()));
    }
    if let Some(length) = file.length {
        line.push_str(&format!("  {:.1} MB", length as f64 / 1_048_576.0));
    }
    line
}

pub fn render_snapshot(snapshot: &SessionSnapshot) -> String {
    let mut out = format!(
        "torrent: {}\nadded: {}\nstate: {}",
        snapshot.magnet_id,
        if snapshot.added { "yes" } else { "no" },
        render_state(&snapshot.state)
    );

    if let Some(video) = &snapshot.video_source {
        out.push_str(&format!("\nvideo: {}", video));
    }
    if let Some(subtitle) = &snapshot.subtitle_source {
        out.push_str(&format!("\nsubtitles: {}", subtitle));
    }
    if let Some(external) = &snapshot.external {
        out.push_str(&format!("\nexternal: {}", external.stream_url));
    }

    for file in &snapshot.files {
        out.push('\n');
        out.push_str(&render_file(file, snapshot.selected.as_ref()));
    }
    out
}

fn print_message(message: ShellMessage, last_files: &mut Vec<FileEntry>) {
    match message {
        ShellMessage::Event(SessionEvent::Notice(notice)) => {
            let tag = match notice.level {
                NoticeLevel::Success => "ok",
                NoticeLevel::Error => "error",
            };
            println!("[{}] {}: {}", tag, notice.title, notice.description);
        }
        ShellMessage::Event(SessionEvent::StateChanged(snapshot)) => {
            println!("-- {}", render_state(&snapshot.state));
            if snapshot.files != *last_files {
                for file in &snapshot.files {
                    println!("{}", render_file(file, snapshot.selected.as_ref()));
                }
                *last_files = snapshot.files;
            }
        }
        ShellMessage::Event(SessionEvent::Player(PlayerEvent::Waiting)) => {
            println!("-- buffering...");
        }
        ShellMessage::Event(SessionEvent::Player(PlayerEvent::Exited)) => {
            println!("-- player closed, 'play' or 'browser <key>' starts it again");
        }
        ShellMessage::Event(SessionEvent::Player(PlayerEvent::Disposed)) => {}
        ShellMessage::Failed { command, error } => {
            debug!(command, error, "command failed");
        }
    }
}

async fn execute<B, F>(controller: &PlaybackController<B, F>, command: Command) -> Result<(), String>
where
    B: Backend,
    F: PlayerFactory,
{
    let outcome = match command {
        Command::Play => controller.submit_magnet().await,
        Command::Files => controller.request_file_list().await,
        Command::Browser(key) => controller
            .play_file_in_browser(&key)
            .map(|()| Outcome::Applied),
        Command::External(key) => controller.play_file_externally(&key).await,
        Command::Vlc => controller.play_torrent_externally().await,
        Command::Stop(key) => controller.stop_file(&key).await,
        Command::Remove => controller.remove_torrent().await,
        Command::Ping => controller.check_health().await.map(|()| Outcome::Applied),
        Command::Open(magnet) => {
            controller.open_session(magnet);
            Ok(Outcome::Applied)
        }
        Command::Status | Command::Help | Command::Quit => Ok(Outcome::Applied),
    };

    match outcome {
        Ok(Outcome::Discarded) => {
            debug!("response arrived for a previous session");
            Ok(())
        }
        Ok(Outcome::Applied) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

/// Read commands from stdin until `quit` or end of input. The session is
/// closed on the way out.
pub async fn run<B, F>(controller: Arc<PlaybackController<B, F>>) -> io::Result<()>
where
    B: Backend + 'static,
    F: PlayerFactory + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<ShellMessage>();
    controller.subscribe(Arc::new(ChannelObserver::new(tx.clone())));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_files = Vec::new();

    println!("{}", HELP);
    println!("\n{}\n", render_snapshot(&controller.snapshot()));

    loop {
        tokio::select! {
            Some(message) = rx.recv() => print_message(message, &mut last_files),
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };

                let command = match Command::parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };

                match command {
                    Command::Quit => break,
                    Command::Help => println!("{}", HELP),
                    Command::Status => println!("{}", render_snapshot(&controller.snapshot())),
                    command => {
                        info!(?command, "running command");
                        let controller = Arc::clone(&controller);
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            let name = format!("{:?}", command);
                            if let Err(error) = execute(&controller, command).await {
                                let _ = tx.send(ShellMessage::Failed { command: name, error });
                            }
                        });
                    }
                }
            }
        }
    }

    controller.close();
    info!("shell closed");
    Ok(())
}
