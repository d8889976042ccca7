//! Pager bridge: hand a candidate list to an external viewer and splice its
//! selection back.
//!
//! The viewer reads candidates on fd 3 (one per line, escaped, with the
//! description after a tab) and writes the chosen text to fd 4. The pager
//! owns the tty while it runs; the caller wraps the invocation in a cooked-
//! mode scope and repaints from scratch afterwards.

use anyhow::{Context, Result, bail};
use core_complete::{Candidate, Quoting, escape_for_insertion};
use std::io::{Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Default viewer when `brine.toml` names none.
pub const DEFAULT_PAGER: &str = "fish_pager";

fn make_pipe() -> Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        bail!("pipe: {}", std::io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

/// Run the pager over `candidates`. Returns the chosen line, or `None` when
/// the pager exited non-zero or wrote nothing (caller beeps and leaves the
/// buffer untouched).
pub fn run_pager(command: &str, candidates: &[Candidate]) -> Result<Option<String>> {
    let (cand_read, cand_write) = make_pipe()?;
    let (out_read, out_write) = make_pipe()?;

    let mut parts = command.split_whitespace();
    let program = parts.next().context("empty pager command")?;
    let mut child = {
        let mut cmd = Command::new(program);
        cmd.args(parts)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        unsafe {
            cmd.pre_exec(move || {
                // Candidates arrive on fd 3; the choice leaves on fd 4.
                if libc::dup2(cand_read, 3) == -1 || libc::dup2(out_write, 4) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                libc::close(cand_read);
                libc::close(cand_write);
                libc::close(out_read);
                libc::close(out_write);
                Ok(())
            });
        }
        cmd.spawn().context("spawning pager")?
    };

    // Parent keeps only its own ends.
    unsafe {
        libc::close(cand_read);
        libc::close(out_write);
    }
    let mut cand_file = unsafe { std::fs::File::from_raw_fd(cand_write) };
    let mut out_file = unsafe { std::fs::File::from_raw_fd(out_read) };

    // Feed the list from a helper thread so a large list cannot deadlock
    // against the child's reading pace.
    let payload: String = candidates
        .iter()
        .map(|c| {
            let escaped = escape_for_insertion(&c.replacement, Quoting::None);
            if c.description.is_empty() {
                format!("{escaped}\n")
            } else {
                format!("{escaped}\t{}\n", c.description)
            }
        })
        .collect();
    let writer = std::thread::spawn(move || {
        let _ = cand_file.write_all(payload.as_bytes());
        // Dropping closes fd 3's write end; the child sees EOF.
    });

    let mut chosen = String::new();
    if let Err(e) = out_file.read_to_string(&mut chosen) {
        warn!(target: "pager", %e, "pager_output_read_failed");
        let _ = child.kill();
        let _ = child.wait();
        let _ = writer.join();
        return Ok(None);
    }
    let status = child.wait().context("waiting for pager")?;
    let _ = writer.join();

    if !status.success() {
        debug!(target: "pager", ?status, "pager_exited_nonzero");
        return Ok(None);
    }
    let line = chosen.lines().next().unwrap_or("").to_string();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(line))
}
