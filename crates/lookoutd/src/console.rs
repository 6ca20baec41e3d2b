//! Operator command source and dispatcher.
//!
//! Commands arrive on an explicit queue as [`ConsoleCommand`] values. The
//! shipped source reads them from stdin, one per line:
//!
//! ```text
//! list                 show connected agents
//! select <id>          stream from agent <id> (also: s 3, select #3)
//! toggle               start/stop the stream of the selected agent
//! notice <text>        show <text> on the selected agent's screen
//! quit                 disconnect everyone and exit
//! ```
//!
//! The dispatcher turns each command into a registry call and reports the
//! outcome as one feedback line.

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lookout_core::{DomainError, SessionId, SessionState};

use crate::registry::{ManagerError, RegistryHandle, StreamToggle};

/// An operator action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Select(SessionId),
    ToggleStream,
    Notice(String),
    List,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    #[error("unknown command {0:?} (try: list, select <id>, toggle, notice <text>, quit)")]
    Unknown(String),

    #[error("usage: select <id>")]
    MissingId,

    #[error(transparent)]
    InvalidId(#[from] DomainError),
}

impl ConsoleCommand {
    /// Parses one input line. Blank lines yield `Ok(None)`.
    pub fn parse_line(line: &str) -> Result<Option<Self>, ConsoleError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let trimmed = line.trim_start();
        if trimmed.trim().is_empty() {
            return Ok(None);
        }

        let (word, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest),
            None => (trimmed, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "list" | "ls" => Self::List,
            "select" | "s" => {
                let id = rest.trim();
                if id.is_empty() {
                    return Err(ConsoleError::MissingId);
                }
                Self::Select(id.parse()?)
            }
            "toggle" | "t" => Self::ToggleStream,
            // Notice text is kept as typed, minus the separator.
            "notice" | "n" => Self::Notice(rest.to_string()),
            "quit" | "exit" | "shutdown" => Self::Shutdown,
            _ => return Err(ConsoleError::Unknown(word.to_string())),
        };
        Ok(Some(command))
    }
}

/// Executes operator commands against the registry.
pub struct CommandDispatcher {
    registry: RegistryHandle,
    commands: mpsc::Receiver<ConsoleCommand>,
    feedback: mpsc::UnboundedSender<String>,
    cancel_token: CancellationToken,
}

impl CommandDispatcher {
    pub fn new(
        registry: RegistryHandle,
        commands: mpsc::Receiver<ConsoleCommand>,
        feedback: mpsc::UnboundedSender<String>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            registry,
            commands,
            feedback,
            cancel_token,
        }
    }

    /// Processes commands until the queue closes or the token fires.
    ///
    /// `Shutdown` removes every session and then cancels the token.
    pub async fn run(mut self) {
        loop {
            let cmd = tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => cmd,
                    None => break,
                },
            };

            let shutdown = cmd == ConsoleCommand::Shutdown;
            let line = match self.execute(cmd).await {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Operator command failed");
                    format!("error: {e}")
                }
            };
            self.say(line);

            if shutdown {
                self.cancel_token.cancel();
                break;
            }
        }
        debug!("Command dispatcher stopped");
    }

    /// Runs one command and returns the feedback line.
    pub async fn execute(&self, cmd: ConsoleCommand) -> Result<String, ManagerError> {
        match cmd {
            ConsoleCommand::List => Ok(self.list().await),
            ConsoleCommand::Select(id) => {
                self.registry.select(id).await?;
                info!(session_id = %id, "Operator selected session");
                Ok(format!("streaming from #{id}"))
            }
            ConsoleCommand::ToggleStream => match self.registry.toggle_stream().await? {
                StreamToggle::Started(id) => Ok(format!("started stream from #{id}")),
                StreamToggle::Stopped(id) => Ok(format!("stopped stream from #{id}")),
            },
            ConsoleCommand::Notice(text) => {
                self.registry.send_notice(text).await?;
                Ok("notice sent".to_string())
            }
            ConsoleCommand::Shutdown => {
                let removed = self.registry.shutdown().await;
                Ok(format!("shutting down ({removed} agents disconnected)"))
            }
        }
    }

    async fn list(&self) -> String {
        let sessions = self.registry.get_all_sessions().await;
        if sessions.is_empty() {
            return "no agents connected".to_string();
        }

        let slot = self.registry.slot_status().await;
        sessions
            .iter()
            .map(|view| {
                let marker = match (Some(view.id) == slot.active, view.state) {
                    (_, SessionState::Streaming) => '>',
                    (true, _) => '*',
                    _ => ' ',
                };
                format!("{marker} {}", view.summary())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn say(&self, line: String) {
        if self.feedback.send(line).is_err() {
            debug!("Feedback channel closed");
        }
    }
}

/// Reads operator commands from stdin until EOF or cancellation.
///
/// Lines that do not parse are answered on the feedback channel and
/// otherwise ignored. EOF only stops reading; the monitor keeps running.
pub fn spawn_stdin_source(
    commands: mpsc::Sender<ConsoleCommand>,
    feedback: mpsc::UnboundedSender<String>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = tokio::select! {
                _ = cancel_token.cancelled() => break,
                line = lines.next_line() => line,
            };

            match line {
                Ok(Some(line)) => match ConsoleCommand::parse_line(&line) {
                    Ok(Some(cmd)) => {
                        if commands.send(cmd).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let _ = feedback.send(format!("error: {e}"));
                    }
                },
                Ok(None) => {
                    debug!("Console input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read console input");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use lookout_core::MonitorConfig;

    use crate::registry::spawn_registry;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse_line("list").unwrap(), Some(ConsoleCommand::List));
        assert_eq!(
            ConsoleCommand::parse_line("select #3").unwrap(),
            Some(ConsoleCommand::Select(SessionId::new(3)))
        );
        assert_eq!(
            ConsoleCommand::parse_line("s 12\n").unwrap(),
            Some(ConsoleCommand::Select(SessionId::new(12)))
        );
        assert_eq!(
            ConsoleCommand::parse_line("TOGGLE").unwrap(),
            Some(ConsoleCommand::ToggleStream)
        );
        assert_eq!(
            ConsoleCommand::parse_line("notice Pencils down").unwrap(),
            Some(ConsoleCommand::Notice("Pencils down".into()))
        );
        assert_eq!(
            ConsoleCommand::parse_line("quit").unwrap(),
            Some(ConsoleCommand::Shutdown)
        );
        assert_eq!(ConsoleCommand::parse_line("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            ConsoleCommand::parse_line("dance"),
            Err(ConsoleError::Unknown("dance".into()))
        );
        assert_eq!(
            ConsoleCommand::parse_line("select"),
            Err(ConsoleError::MissingId)
        );
        assert!(matches!(
            ConsoleCommand::parse_line("select alice"),
            Err(ConsoleError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatcher_reports_errors_and_shuts_down() {
        let (display_tx, _display_rx) = mpsc::unbounded_channel();
        let registry = spawn_registry(MonitorConfig::default(), display_tx);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let peer: SocketAddr = "10.1.1.1:4000".parse().unwrap();
        let adm = registry.admit(peer).await.unwrap();
        registry
            .complete_handshake(adm.session_id, "alice")
            .await
            .unwrap();

        let task = tokio::spawn(
            CommandDispatcher::new(registry.clone(), cmd_rx, feedback_tx, cancel.clone()).run(),
        );

        cmd_tx.send(ConsoleCommand::ToggleStream).await.unwrap();
        assert_eq!(
            feedback_rx.recv().await.unwrap(),
            "error: no active session selected"
        );

        cmd_tx
            .send(ConsoleCommand::Select(adm.session_id))
            .await
            .unwrap();
        assert_eq!(
            feedback_rx.recv().await.unwrap(),
            format!("streaming from #{}", adm.session_id)
        );

        cmd_tx.send(ConsoleCommand::List).await.unwrap();
        let listing = feedback_rx.recv().await.unwrap();
        assert!(listing.starts_with("> #1  alice"), "{listing}");

        cmd_tx.send(ConsoleCommand::Shutdown).await.unwrap();
        assert_eq!(
            feedback_rx.recv().await.unwrap(),
            "shutting down (1 agents disconnected)"
        );
        task.await.unwrap();
        assert!(cancel.is_cancelled());
        assert!(adm.cancel.is_cancelled());
    }
}
