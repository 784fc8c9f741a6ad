//! Newline-delimited JSON over process pipes
//!
//! The controller talks to each worker through the worker's stdin/stdout;
//! the worker uses its own stdin/stdout for the other end. One JSON object
//! per line. Workers must log to stderr.

use super::{InboxSender, Side, Transport};
use serde_json::Value;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

enum Outbound {
    Line(String),
    Flush(oneshot::Sender<()>),
}

/// Pipe-backed transport. Writes are handed to a background task, so
/// [`Transport::send`] never blocks.
pub struct StdioTransport {
    side: Side,
    outbound: mpsc::UnboundedSender<Outbound>,
    connected: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Wrap a writer, spawning the task that drains outbound lines into it.
    pub fn new<W>(side: Side, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let connected = Arc::new(AtomicBool::new(true));
        let (outbound, lines) = mpsc::unbounded_channel();
        tokio::spawn(write_lines(writer, lines, connected.clone()));

        Self {
            side,
            outbound,
            connected,
        }
    }

    /// Worker end: write to our stdout, read the controller's messages from stdin.
    ///
    /// Stdin is read on a plain thread; a blocking read there must not keep
    /// the runtime from shutting down when the worker is done.
    pub fn current_process(inbox: InboxSender) -> (Self, std::thread::JoinHandle<()>) {
        let transport = Self::new(Side::Child, tokio::io::stdout());
        let connected = transport.connected.clone();
        let reader = std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if !forward_line(&line, &inbox) {
                            break;
                        }
                    }
                    Err(e) => {
                        log::debug!("stdin read failed: {}", e);
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        });
        (transport, reader)
    }

    /// Resolves once every message sent before this call has been written.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.outbound.send(Outbound::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Controller end for a spawned worker. Takes ownership of its stdin/stdout.
    ///
    /// Returns `None` if the child was not spawned with piped stdio.
    pub fn attach_child(child: &mut Child, inbox: InboxSender) -> Option<(Self, JoinHandle<()>)> {
        let stdin = child.stdin.take()?;
        let stdout = child.stdout.take()?;
        let transport = Self::new(Side::Parent, stdin);
        let reader = transport.spawn_reader(stdout, inbox);
        Some((transport, reader))
    }

    /// Forward every decodable line from `reader` into `inbox`. The channel
    /// is marked disconnected when the reader hits EOF.
    pub fn spawn_reader<R>(&self, reader: R, inbox: InboxSender) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let connected = self.connected.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if !forward_line(&line, &inbox) {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::debug!("pipe read failed: {}", e);
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        })
    }
}

/// Decode one line into `inbox`. Returns `false` once nobody drains it.
fn forward_line(line: &str, inbox: &InboxSender) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }
    match serde_json::from_str::<Value>(line) {
        Ok(value) => inbox.send(value).is_ok(),
        Err(e) => {
            log::trace!("dropping non-JSON line: {}", e);
            true
        }
    }
}

async fn write_lines<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    connected: Arc<AtomicBool>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let mut line = match message {
            Outbound::Line(line) => line,
            Outbound::Flush(ack) => {
                let _ = ack.send(());
                continue;
            }
        };
        line.push('\n');
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            log::debug!("pipe write failed: {}", e);
            break;
        }
    }
    connected.store(false, Ordering::SeqCst);
}

impl Transport for StdioTransport {
    fn side(&self) -> Side {
        self.side
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    fn send(&self, message: &Value) -> bool {
        match serde_json::to_string(message) {
            Ok(line) => self.outbound.send(Outbound::Line(line)).is_ok(),
            Err(e) => {
                log::warn!("failed to encode message: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::inbox;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_over_duplex_pipe() {
        let (ours, theirs) = tokio::io::duplex(1024);
        let (their_read, their_write) = tokio::io::split(theirs);
        let (our_read, our_write) = tokio::io::split(ours);

        let (tx, mut rx) = inbox();
        let sender = StdioTransport::new(Side::Parent, our_write);
        let receiver = StdioTransport::new(Side::Child, their_write);
        let _reader = receiver.spawn_reader(their_read, tx);
        drop(our_read);

        assert!(sender.send(&json!({ "scope": "test", "isRunning": true })));
        sender.flush().await;
        let value = rx.recv().await.unwrap();
        assert_eq!(value["scope"], "test");
        assert_eq!(value["isRunning"], true);
    }

    #[tokio::test]
    async fn test_reader_skips_garbage_and_marks_eof() {
        let input: &[u8] = b"not json\n\n{\"scope\":\"shutdown\"}\n";
        let (tx, mut rx) = inbox();
        let transport = StdioTransport::new(Side::Child, tokio::io::sink());

        transport.spawn_reader(input, tx).await.unwrap();

        assert_eq!(rx.recv().await.unwrap()["scope"], "shutdown");
        assert!(rx.recv().await.is_none());
        assert!(!transport.is_connected());
    }
}
