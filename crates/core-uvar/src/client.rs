//! Shell-side client for the universal-variable broker.

use crate::protocol::{self, Message};
use crate::table::{VarEventSink, VarTable};
use anyhow::Result;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::warn;

/// Connection to the broker mirroring its variable table locally. Updates
/// arriving from the socket are applied to the mirror and forwarded to an
/// optional sink.
pub struct UvarClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    table: VarTable,
    sink: Option<Box<dyn VarEventSink + Send>>,
}

impl UvarClient {
    pub async fn connect(path: &Path) -> Result<UvarClient> {
        let stream = UnixStream::connect(path).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(UvarClient {
            reader: BufReader::new(read_half),
            writer: write_half,
            table: VarTable::new(),
            sink: None,
        })
    }

    pub fn set_sink(&mut self, sink: Box<dyn VarEventSink + Send>) {
        self.sink = Some(sink);
    }

    pub fn table(&self) -> &VarTable {
        &self.table
    }

    async fn send(&mut self, msg: &Message) -> Result<()> {
        self.writer
            .write_all(protocol::format_message(msg).as_bytes())
            .await?;
        Ok(())
    }

    pub async fn set(&mut self, key: &str, value: &str, export: bool) -> Result<()> {
        self.send(&Message::Set {
            key: key.to_string(),
            value: value.to_string(),
            export,
        })
        .await
    }

    pub async fn erase(&mut self, key: &str) -> Result<()> {
        self.send(&Message::Erase {
            key: key.to_string(),
        })
        .await
    }

    fn apply(&mut self, msg: &Message) {
        match msg {
            Message::Set { key, value, export } => {
                self.table.set(key, value, *export);
                if let Some(sink) = &self.sink {
                    sink.on_set(key, value, *export);
                }
            }
            Message::Erase { key } => {
                self.table.erase(key);
                if let Some(sink) = &self.sink {
                    sink.on_erased(key);
                }
            }
            _ => {}
        }
    }

    /// Read one message, applying variable updates to the mirror. `None`
    /// means the broker hung up.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = self.reader.read_until(b'\n', &mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            let Ok(line) = std::str::from_utf8(&buf) else {
                warn!(target: "uvar.client", "dropping non-utf8 line");
                continue;
            };
            match protocol::parse_line(line) {
                Ok(Some(msg)) => {
                    self.apply(&msg);
                    return Ok(Some(msg));
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(target: "uvar.client", %e, "dropping malformed line");
                    continue;
                }
            }
        }
    }

    /// Round-trip: send `barrier`, then drain updates until the broker's
    /// `barrier_reply` arrives. Everything sent to us before the reply is
    /// applied first, which is the synchronisation clients rely on.
    pub async fn barrier(&mut self) -> Result<()> {
        self.send(&Message::Barrier).await?;
        loop {
            match self.next_message().await? {
                Some(Message::BarrierReply) => return Ok(()),
                Some(_) => continue,
                None => anyhow::bail!("broker closed during barrier"),
            }
        }
    }
}
