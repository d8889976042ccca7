//! Universal variables: key/value pairs shared by every running shell
//! through a single broker process. This crate holds the wire protocol, the
//! ordered variable table, file persistence keyed by machine identifier,
//! the broker runtime, and the shell-side client.

pub mod client;
pub mod daemon;
pub mod persist;
pub mod protocol;
pub mod table;

pub use client::UvarClient;
pub use daemon::{DaemonConfig, GREETING, SAVE_EVERY, SocketSetup, acquire_socket, daemonize, run};
pub use persist::{load_from_path, load_or_upgrade, machine_identifier, save_to_path, vars_file_path};
pub use protocol::{Message, ProtocolError, escape_value, format_message, parse_line, unescape_value};
pub use table::{VarEntry, VarEventSink, VarTable};
