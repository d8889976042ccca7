//! Single-process universal-variable broker.
//!
//! The daemon is single-threaded: a current-thread runtime multiplexes the
//! listener, per-connection readers, and per-connection bounded outgoing
//! queues. Messages are shared `Arc<str>` lines so a broadcast enqueues one
//! allocation regardless of client count. Each connection moves through
//! greeting-pending → active → draining → closing; entry to active sends
//! the banner plus a snapshot of every variable.

use crate::persist;
use crate::protocol::{self, Message};
use crate::table::VarTable;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Banner sent on connect; clients treat `#` lines as comments.
pub const GREETING: &str = "# Fish universal variable server\n";
/// Received-message count between periodic saves.
pub const SAVE_EVERY: usize = 64;
/// Bound on each connection's outgoing queue.
const QUEUE_CAP: usize = 1024;
/// How long a draining connection may keep flushing before it is closed
/// regardless.
const DRAIN_LIMIT: Duration = Duration::from_secs(2);
/// How long lock acquisition polls before giving up.
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    /// Cross-version compatibility hard link, removed at shutdown.
    pub legacy_socket_path: Option<PathBuf>,
    pub vars_dir: PathBuf,
    pub machine_id: String,
}

/// Unlinks the lockfile when dropped.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// NFS-safe lock: create a unique file, then hard-link it to the lockfile.
/// The link succeeding, or the unique file's link count reaching two, means
/// we own the lock. A stale lock older than the timeout is removed once
/// when `force` is set.
fn acquire_lock_file(lockfile: &Path, mut force: bool) -> std::io::Result<LockGuard> {
    let unique = PathBuf::from(format!(
        "{}.{}",
        lockfile.display(),
        std::process::id()
    ));
    let _ = std::fs::remove_file(&unique);
    std::fs::File::create(&unique)?;
    if std::fs::metadata(&unique)?.nlink() != 1 {
        let _ = std::fs::remove_file(&unique);
        return Err(std::io::Error::other("unique lock file has extra links"));
    }
    let start = Instant::now();
    loop {
        let linked = std::fs::hard_link(&unique, lockfile).is_ok()
            || std::fs::metadata(&unique)
                .map(|m| m.nlink() == 2)
                .unwrap_or(false);
        if linked {
            let _ = std::fs::remove_file(&unique);
            return Ok(LockGuard {
                path: lockfile.to_path_buf(),
            });
        }
        if start.elapsed() > LOCK_TIMEOUT {
            if force {
                warn!(target: "uvar.daemon", lockfile = %lockfile.display(), "removing stale lockfile");
                let _ = std::fs::remove_file(lockfile);
                force = false;
                continue;
            }
            let _ = std::fs::remove_file(&unique);
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "could not obtain socket lock",
            ));
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

/// Outcome of socket acquisition.
pub enum SocketSetup {
    Listener(std::os::unix::net::UnixListener),
    /// A live sibling owns the socket; exit 0 silently.
    SiblingRunning,
}

/// Take the socket under the lockfile: if something is already answering on
/// it we yield; otherwise we replace it and start listening. The legacy
/// path is hard-linked beside it when configured.
pub fn acquire_socket(config: &DaemonConfig) -> Result<SocketSetup> {
    let lockfile = PathBuf::from(format!("{}.lock", config.socket_path.display()));
    let _lock = acquire_lock_file(&lockfile, true).context("acquiring socket lock")?;

    if std::os::unix::net::UnixStream::connect(&config.socket_path).is_ok() {
        debug!(target: "uvar.daemon", "socket already owned by a sibling");
        return Ok(SocketSetup::SiblingRunning);
    }

    let _ = std::fs::remove_file(&config.socket_path);
    let listener = std::os::unix::net::UnixListener::bind(&config.socket_path)
        .with_context(|| format!("binding {}", config.socket_path.display()))?;

    if let Some(legacy) = &config.legacy_socket_path {
        if let Err(e) = std::fs::remove_file(legacy) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(target: "uvar.daemon", %e, "could not clear legacy socket path");
            }
        }
        if let Err(e) = std::fs::hard_link(&config.socket_path, legacy) {
            warn!(target: "uvar.daemon", %e, "could not create legacy socket path");
        }
    }
    Ok(SocketSetup::Listener(listener))
}

/// Detach: fork (parent exits), new session, stdin/stdout closed, SIGHUP
/// ignored. Call before entering the runtime.
pub fn daemonize() -> Result<()> {
    // Single-threaded process; fork is safe here.
    match unsafe { libc::fork() } {
        -1 => anyhow::bail!("fork failed"),
        0 => {}
        _ => {
            info!(target: "uvar.daemon", "parent exiting, daemon continues in background");
            std::process::exit(0);
        }
    }
    unsafe {
        libc::setsid();
        libc::close(0);
        libc::close(1);
        libc::signal(libc::SIGHUP, libc::SIG_IGN);
    }
    Ok(())
}

/// Per-connection lifecycle. Entry to `Active` sends the banner and a
/// variable snapshot; peer close or protocol error moves the connection to
/// `Draining`, where the outgoing queue keeps flushing (but accepts nothing
/// new) until empty or the drain bound elapses, at which point `Closing`
/// drops the sender and the writer task exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    GreetingPending,
    Active,
    Draining,
    Closing,
}

struct Conn {
    tx: mpsc::Sender<Arc<str>>,
    state: ConnState,
}

impl Conn {
    /// Queue one line; a full queue drops the message (the bound protects
    /// the daemon from a stuck client). Draining and closing connections
    /// take nothing new.
    fn enqueue(&self, line: Arc<str>) {
        if matches!(self.state, ConnState::Draining | ConnState::Closing) {
            return;
        }
        if let Err(e) = self.tx.try_send(line) {
            warn!(target: "uvar.daemon", %e, "outgoing queue full, dropping message");
        }
    }

    /// The writer task has taken every queued message.
    fn queue_flushed(&self) -> bool {
        self.tx.capacity() == self.tx.max_capacity()
    }
}

enum Event {
    Line(u64, String),
    Closed(u64),
}

struct Daemon {
    table: VarTable,
    conns: HashMap<u64, Conn>,
    /// Connections flushing their last queued messages, with the drain
    /// start time for the bound.
    draining: HashMap<u64, (Conn, Instant)>,
    config: DaemonConfig,
    received: usize,
    ever_connected: bool,
}

impl Daemon {
    fn save(&self) {
        let path = persist::vars_file_path(&self.config.vars_dir, &self.config.machine_id);
        if let Err(e) = persist::save_to_path(&self.table, &path) {
            warn!(target: "uvar.daemon", %e, "save failed");
        }
    }

    fn broadcast(&self, line: Arc<str>) {
        // Every connection is offered the message; enqueue itself refuses
        // for the draining ones.
        for conn in self
            .conns
            .values()
            .chain(self.draining.values().map(|(conn, _)| conn))
        {
            conn.enqueue(line.clone());
        }
    }

    fn handle_line(&mut self, id: u64, line: &str) {
        let msg = match protocol::parse_line(line) {
            Ok(Some(msg)) => msg,
            Ok(None) => return,
            Err(e) => {
                warn!(target: "uvar.daemon", %e, "dropping malformed line");
                return;
            }
        };
        self.received += 1;
        match msg {
            Message::Set { key, value, export } => {
                self.table.set(&key, &value, export);
                let line: Arc<str> = protocol::format_message(&Message::Set {
                    key,
                    value,
                    export,
                })
                .into();
                self.broadcast(line);
            }
            Message::Erase { key } => {
                self.table.erase(&key);
                let line: Arc<str> =
                    protocol::format_message(&Message::Erase { key }).into();
                self.broadcast(line);
            }
            Message::Barrier => {
                // The reply rides the same queue as pending broadcasts, so
                // the client sees every earlier update first.
                if let Some(conn) = self.conns.get(&id) {
                    conn.enqueue(protocol::format_message(&Message::BarrierReply).into());
                }
            }
            Message::BarrierReply => {}
        }
        if self.received >= SAVE_EVERY {
            self.received = 0;
            self.save();
        }
    }

    fn accept(&mut self, id: u64, stream: UnixStream, ev_tx: mpsc::Sender<Event>) {
        let (read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<Arc<str>>(QUEUE_CAP);

        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => match String::from_utf8(buf.clone()) {
                        Ok(line) => {
                            if ev_tx.send(Event::Line(id, line)).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => {
                            // Whole malformed-UTF-8 lines are dropped.
                            warn!(target: "uvar.daemon", "dropping non-utf8 line");
                        }
                    },
                }
            }
            let _ = ev_tx.send(Event::Closed(id)).await;
        });

        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let conn = Conn {
            tx,
            state: ConnState::GreetingPending,
        };
        // Entering active sends the banner and a snapshot of every
        // variable.
        conn.enqueue(GREETING.into());
        for (key, entry) in self.table.iter() {
            conn.enqueue(
                protocol::format_message(&Message::Set {
                    key: key.to_string(),
                    value: entry.value.clone(),
                    export: entry.exported,
                })
                .into(),
            );
        }
        let mut conn = conn;
        conn.state = ConnState::Active;
        self.conns.insert(id, conn);
        self.ever_connected = true;
        debug!(target: "uvar.daemon", id, clients = self.conns.len(), "client_connected");
    }

    /// Peer closed or errored: stop feeding the connection and let its
    /// queue flush.
    fn close(&mut self, id: u64) {
        if let Some(mut conn) = self.conns.remove(&id) {
            conn.state = ConnState::Draining;
            self.draining.insert(id, (conn, Instant::now()));
            debug!(target: "uvar.daemon", id, clients = self.conns.len(), "client_draining");
        }
    }

    /// Move drained (or drain-bound-expired) connections to closing and
    /// drop them; dropping the sender ends the writer task.
    fn poll_draining(&mut self) {
        self.draining.retain(|id, (conn, since)| {
            if conn.queue_flushed() || since.elapsed() >= DRAIN_LIMIT {
                conn.state = ConnState::Closing;
                debug!(
                    target: "uvar.daemon",
                    id,
                    flushed = conn.queue_flushed(),
                    "client_closed"
                );
                return false;
            }
            true
        });
    }

    fn idle(&self) -> bool {
        self.ever_connected && self.conns.is_empty() && self.draining.is_empty()
    }
}

/// Run the broker on an already-acquired listener until the last client
/// disconnects or SIGTERM arrives; both paths save before returning.
pub async fn run(listener: std::os::unix::net::UnixListener, config: DaemonConfig) -> Result<()> {
    listener.set_nonblocking(true)?;
    let listener = UnixListener::from_std(listener)?;
    let table = persist::load_or_upgrade(&config.vars_dir, &config.machine_id);
    info!(
        target: "uvar.daemon",
        socket = %config.socket_path.display(),
        vars = table.len(),
        "daemon_started"
    );

    let mut daemon = Daemon {
        table,
        conns: HashMap::new(),
        draining: HashMap::new(),
        config: config.clone(),
        received: 0,
        ever_connected: false,
    };
    let (ev_tx, mut ev_rx) = mpsc::channel::<Event>(QUEUE_CAP);
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut next_id = 0u64;
    // Keeps the loop turning while draining connections finish flushing.
    let mut drain_tick = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        next_id += 1;
                        daemon.accept(next_id, stream, ev_tx.clone());
                    }
                    Err(e) => warn!(target: "uvar.daemon", %e, "accept_failed"),
                }
            }
            event = ev_rx.recv() => {
                match event {
                    Some(Event::Line(id, line)) => daemon.handle_line(id, &line),
                    Some(Event::Closed(id)) => daemon.close(id),
                    None => break,
                }
            }
            _ = drain_tick.tick() => {}
            _ = sigterm.recv() => {
                info!(target: "uvar.daemon", "sigterm_received");
                break;
            }
        }
        daemon.poll_draining();
        if daemon.idle() {
            info!(target: "uvar.daemon", "no_clients_remaining");
            break;
        }
    }

    daemon.save();
    if let Some(legacy) = &config.legacy_socket_path {
        let _ = std::fs::remove_file(legacy);
    }
    let _ = std::fs::remove_file(&config.socket_path);
    Ok(())
}
