//! Variable file persistence and the machine identifier naming it.

use crate::protocol::{Message, escape_value, parse_line};
use crate::table::VarTable;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const FILE_BANNER: &str =
    "# This file is automatically generated by the universal variable daemon.\n\
     # Do NOT edit it directly; your changes will be overwritten.\n";

/// Prefix of the persistence file name; the machine identifier follows.
pub const FILE_PREFIX: &str = "fishd.";

fn mac_address() -> Option<String> {
    let entries = std::fs::read_dir("/sys/class/net").ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy() == "lo" {
            continue;
        }
        let Ok(addr) = std::fs::read_to_string(entry.path().join("address")) else {
            continue;
        };
        let hex: String = addr
            .trim()
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .collect::<String>()
            .to_lowercase();
        if hex.len() == 12 && hex.chars().any(|c| c != '0') {
            return Some(hex);
        }
    }
    None
}

/// Hostname via gethostname(2), truncated to 32 bytes.
pub fn hostname_identifier() -> Option<String> {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..len]).to_string();
    if name.is_empty() {
        return None;
    }
    Some(name.chars().take(32).collect())
}

/// Machine identifier: lowercase hex MAC of the first real interface, else
/// the truncated hostname, else the literal `nohost`.
pub fn machine_identifier() -> String {
    mac_address()
        .or_else(hostname_identifier)
        .unwrap_or_else(|| "nohost".to_string())
}

pub fn vars_file_path(dir: &Path, identifier: &str) -> PathBuf {
    dir.join(format!("{FILE_PREFIX}{identifier}"))
}

/// Write the table: banner first, then one `set`/`set_export` line per
/// variable in insertion order.
pub fn save_to_path(table: &VarTable, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(FILE_BANNER.as_bytes())?;
    for (key, entry) in table.iter() {
        let cmd = if entry.exported { "set_export" } else { "set" };
        writeln!(file, "{cmd} {key}:{}", escape_value(&entry.value))?;
    }
    file.sync_all()?;
    debug!(target: "uvar", path = %path.display(), vars = table.len(), "vars_saved");
    Ok(())
}

/// Read a variable file. Malformed lines are dropped, as are lines that are
/// not valid UTF-8.
pub fn load_from_path(path: &Path) -> std::io::Result<VarTable> {
    let bytes = std::fs::read(path)?;
    let mut table = VarTable::new();
    for raw in bytes.split(|&b| b == b'\n') {
        let Ok(line) = std::str::from_utf8(raw) else {
            warn!(target: "uvar", "dropping non-utf8 line");
            continue;
        };
        match parse_line(line) {
            Ok(Some(Message::Set { key, value, export })) => {
                table.set(&key, &value, export);
            }
            Ok(Some(Message::Erase { key })) => {
                table.erase(&key);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(target: "uvar", %e, "dropping malformed line");
            }
        }
    }
    Ok(table)
}

/// Load the machine-id file, silently renaming an old hostname-named file
/// into place when the machine-id file does not exist yet.
pub fn load_or_upgrade(dir: &Path, identifier: &str) -> VarTable {
    let target = vars_file_path(dir, identifier);
    match load_from_path(&target) {
        Ok(table) => return table,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(target: "uvar", %e, "vars_file_unreadable");
            return VarTable::new();
        }
    }
    if let Some(hostname) = hostname_identifier() {
        if hostname != identifier {
            let old = vars_file_path(dir, &hostname);
            if old.exists() && std::fs::rename(&old, &target).is_ok() {
                debug!(target: "uvar", "vars_file_upgraded_from_hostname");
                return load_from_path(&target).unwrap_or_default();
            }
        }
    }
    VarTable::new()
}
