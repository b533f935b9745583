//! The duplex link to a running worker: reader, router and correlator.
//!
//! A [`WorkerLink`] multiplexes two kinds of traffic over one byte stream:
//! solicited command responses and unsolicited domain events. Commands are
//! strictly serialized — exactly one command line is on the wire at a time,
//! and the next queued command is written only after the previous one received
//! its terminal `Data`/`Error` message (or timed out). The worker protocol
//! carries no request identifier, so this queue is what makes correlation
//! unambiguous: two sequential sends can never receive each other's
//! responses.
//!
//! A command timeout poisons the link. The worker contract promises exactly
//! one terminal line per command, so a missing answer means the worker is
//! hung or dead, and any line it might still produce can no longer be
//! attributed to a command. Subsequent sends fail fast with
//! `WorkerNotRunning` until the supervisor builds a fresh link; push events
//! keep flowing meanwhile.

use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{AppResult, ScanError};
use crate::protocol::codec::{classify, LineAssembler};
use crate::protocol::Command;
use crate::worker::router::{route, Routed, TerminalMessage, WorkerEvent};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_QUEUE_CAPACITY: usize = 64;

struct QueuedCommand {
    line: String,
    reply: oneshot::Sender<AppResult<Value>>,
}

/// Cloneable handle for issuing commands and subscribing to events.
#[derive(Clone)]
pub struct WorkerClient {
    commands: mpsc::Sender<QueuedCommand>,
    events: broadcast::Sender<WorkerEvent>,
}

impl WorkerClient {
    /// Send one command and await its terminal response payload.
    ///
    /// Resolution is bounded: a `Data` payload resolves, an `Error` line or a
    /// command timeout rejects, and worker exit rejects with `ProcessExit`.
    pub async fn send(&self, command: &Command) -> AppResult<Value> {
        let line = command.to_line()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(QueuedCommand {
                line,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ScanError::WorkerNotRunning)?;
        reply_rx.await.map_err(|_| ScanError::WorkerNotRunning)?
    }

    /// Subscribe to unsolicited worker events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<WorkerEvent> {
        self.events.clone()
    }
}

/// The running connection to one worker process.
///
/// Dropping the link aborts its tasks; anything still queued is rejected.
pub struct WorkerLink {
    client: WorkerClient,
    reader_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
}

impl WorkerLink {
    /// Build a link over any byte stream pair and spawn its tasks.
    ///
    /// Returns the link together with an event subscription created before
    /// the reader starts, so no startup message can be missed.
    pub fn open<R, W>(
        reader: R,
        writer: W,
        command_timeout: Duration,
    ) -> (Self, broadcast::Receiver<WorkerEvent>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (events_tx, events_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (terminal_tx, terminal_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        let reader_task = tokio::spawn(read_loop(reader, events_tx.clone(), terminal_tx));
        let dispatch_task =
            tokio::spawn(dispatch_loop(writer, command_rx, terminal_rx, command_timeout));

        let client = WorkerClient {
            commands: command_tx,
            events: events_tx,
        };
        (
            Self {
                client,
                reader_task,
                dispatch_task,
            },
            events_rx,
        )
    }

    pub fn client(&self) -> WorkerClient {
        self.client.clone()
    }
}

impl Drop for WorkerLink {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.dispatch_task.abort();
    }
}

/// Decode the worker's stdout and route every line.
async fn read_loop<R>(
    mut reader: R,
    events: broadcast::Sender<WorkerEvent>,
    terminals: mpsc::Sender<TerminalMessage>,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut assembler = LineAssembler::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in assembler.push(&chunk[..n]) {
                    match route(classify(&line)) {
                        Routed::Terminal(terminal) => {
                            if terminals.send(terminal).await.is_err() {
                                return;
                            }
                        }
                        Routed::Event(event) => {
                            if let WorkerEvent::Raw(ref text) = event {
                                debug!(line = %text, "unrecognized worker line");
                            }
                            let _ = events.send(event);
                        }
                    }
                }
            }
            Err(e) => {
                warn!("worker stdout read failed: {e}");
                break;
            }
        }
    }
    let _ = terminals.send(TerminalMessage::Closed).await;
    let _ = events.send(WorkerEvent::Closed);
}

/// Serialize command dispatch: one command on the wire at a time.
async fn dispatch_loop<W>(
    mut writer: W,
    mut commands: mpsc::Receiver<QueuedCommand>,
    mut terminals: mpsc::Receiver<TerminalMessage>,
    command_timeout: Duration,
) where
    W: AsyncWrite + Send + Unpin,
{
    let mut unusable = false;
    loop {
        tokio::select! {
            // Drain stray terminal messages before dispatching anything new,
            // so a late answer to an abandoned command is dropped here and
            // never attributed to the next command.
            biased;
            terminal = terminals.recv() => {
                match terminal {
                    Some(TerminalMessage::Closed) | None => unusable = true,
                    Some(stray) => warn!(?stray, "dropping terminal message with no command in flight"),
                }
            }
            queued = commands.recv() => {
                let Some(queued) = queued else { break };
                if unusable {
                    let _ = queued.reply.send(Err(ScanError::WorkerNotRunning));
                    continue;
                }
                unusable = run_command(&mut writer, queued, &mut terminals, command_timeout).await;
            }
        }
    }
}

/// Write one command line and settle it. Returns true if the link can no
/// longer correlate commands (stream closed or response overdue).
async fn run_command<W>(
    writer: &mut W,
    queued: QueuedCommand,
    terminals: &mut mpsc::Receiver<TerminalMessage>,
    command_timeout: Duration,
) -> bool
where
    W: AsyncWrite + Send + Unpin,
{
    let mut line = queued.line;
    line.push('\n');
    if let Err(e) = async {
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }
    .await
    {
        let _ = queued.reply.send(Err(ScanError::Io(e)));
        return true;
    }

    tokio::select! {
        terminal = terminals.recv() => match terminal {
            Some(TerminalMessage::Data(value)) => {
                let _ = queued.reply.send(Ok(value));
                false
            }
            Some(TerminalMessage::Error(text)) => {
                let _ = queued.reply.send(Err(ScanError::Worker(text)));
                false
            }
            Some(TerminalMessage::Closed) | None => {
                let _ = queued.reply.send(Err(ScanError::ProcessExit { code: None }));
                true
            }
        },
        _ = tokio::time::sleep(command_timeout) => {
            warn!(timeout = ?command_timeout, "command overdue; link requires restart");
            let _ = queued.reply.send(Err(ScanError::CommandTimeout { timeout: command_timeout }));
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandDomain;
    use serde_json::json;
    use tokio::io::{duplex, split, AsyncBufReadExt, BufReader, ReadHalf, WriteHalf};
    use tokio::io::DuplexStream;

    const FAST: Duration = Duration::from_millis(200);

    struct Remote {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Remote {
        async fn recv_line(&mut self) -> String {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            line
        }

        async fn send_line(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }
    }

    fn open_link(timeout: Duration) -> (WorkerLink, broadcast::Receiver<WorkerEvent>, Remote) {
        let (local, remote) = duplex(4096);
        let (local_read, local_write) = split(local);
        let (remote_read, remote_write) = split(remote);
        let (link, events) = WorkerLink::open(local_read, local_write, timeout);
        (
            link,
            events,
            Remote {
                reader: BufReader::new(remote_read),
                writer: remote_write,
            },
        )
    }

    #[tokio::test]
    async fn test_data_resolves_and_error_rejects_in_order() {
        let (link, _events, mut remote) = open_link(FAST);
        let client = link.client();

        let responder = tokio::spawn(async move {
            let first = remote.recv_line().await;
            assert!(first.contains("\"ping\""));
            remote.send_line(r#"DATA:{"status":"ok","message":"pong"}"#).await;

            let second = remote.recv_line().await;
            assert!(second.contains("\"get_version\""));
            remote.send_line("ERROR:version unavailable").await;
            remote
        });

        let pong = client.send(&Command::bare(CommandDomain::Ping)).await.unwrap();
        assert_eq!(pong["message"], json!("pong"));

        let err = client
            .send(&Command::bare(CommandDomain::GetVersion))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Worker(ref text) if text == "version unavailable"));

        // The link stays usable after a worker-reported error.
        let mut remote = responder.await.unwrap();
        let answer = tokio::spawn(async move {
            let _ = remote.recv_line().await;
            remote.send_line(r#"DATA:{"status":"ok"}"#).await;
            remote
        });
        let ok = client.send(&Command::bare(CommandDomain::Ping)).await.unwrap();
        assert_eq!(ok["status"], json!("ok"));
        drop(answer.await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_sends_are_serialized() {
        let (link, _events, mut remote) = open_link(Duration::from_secs(2));
        let client_a = link.client();
        let client_b = link.client();

        // Answer strictly in arrival order; the second command line must not
        // appear on the wire before the first response was written.
        let responder = tokio::spawn(async move {
            let first = remote.recv_line().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            let reply = if first.contains("\"ping\"") {
                r#"DATA:{"message":"pong"}"#
            } else {
                r#"DATA:{"version":"0.1.0"}"#
            };
            remote.send_line(reply).await;

            let second = remote.recv_line().await;
            let reply = if second.contains("\"ping\"") {
                r#"DATA:{"message":"pong"}"#
            } else {
                r#"DATA:{"version":"0.1.0"}"#
            };
            remote.send_line(reply).await;
        });

        let ping_cmd = Command::bare(CommandDomain::Ping);
        let version_cmd = Command::bare(CommandDomain::GetVersion);
        let (ping, version) = tokio::join!(
            client_a.send(&ping_cmd),
            client_b.send(&version_cmd),
        );

        assert_eq!(ping.unwrap()["message"], json!("pong"));
        assert_eq!(version.unwrap()["version"], json!("0.1.0"));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_poisons_link_and_drops_stale_response() {
        let (link, _events, mut remote) = open_link(Duration::from_millis(100));
        let client = link.client();

        let responder = tokio::spawn(async move {
            let _ = remote.recv_line().await;
            // Answer far too late.
            tokio::time::sleep(Duration::from_millis(250)).await;
            remote.send_line(r#"DATA:{"message":"stale"}"#).await;
            remote
        });

        let err = client.send(&Command::bare(CommandDomain::Ping)).await.unwrap_err();
        assert!(matches!(err, ScanError::CommandTimeout { .. }));

        // Give the stale response time to arrive, then verify it is not
        // applied to a later command: the poisoned link rejects outright.
        let _remote = responder.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = client.send(&Command::bare(CommandDomain::Ping)).await.unwrap_err();
        assert!(matches!(err, ScanError::WorkerNotRunning));
    }

    #[tokio::test]
    async fn test_stream_close_rejects_pending_command() {
        let (link, _events, mut remote) = open_link(Duration::from_secs(5));
        let client = link.client();

        let responder = tokio::spawn(async move {
            let _ = remote.recv_line().await;
            drop(remote); // worker dies mid-command
        });

        let err = client.send(&Command::bare(CommandDomain::Ping)).await.unwrap_err();
        assert!(matches!(err, ScanError::ProcessExit { .. }));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_push_events_do_not_disturb_correlation() {
        let (link, mut events, mut remote) = open_link(FAST);
        let client = link.client();

        let responder = tokio::spawn(async move {
            let _ = remote.recv_line().await;
            remote.send_line("TRIGGER_CAMERA").await;
            remote.send_line("DAQ_POSITION 45.0").await;
            remote.send_line("FRAME:data:image/png;base64,Zg==").await;
            remote.send_line(r#"DATA:{"success":true}"#).await;
        });

        let value = client.send(&Command::bare(CommandDomain::Ping)).await.unwrap();
        assert_eq!(value["success"], json!(true));
        responder.await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.iter().any(|e| matches!(e, WorkerEvent::Trigger)));
        assert!(seen
            .iter()
            .any(|e| matches!(e, WorkerEvent::PositionChanged(p) if (p - 45.0).abs() < 1e-9)));
        assert!(seen.iter().any(|e| matches!(e, WorkerEvent::Frame(_))));
    }
}
