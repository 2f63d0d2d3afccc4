//! Keeps user code off the IPC stream.
//!
//! The framed sink takes a private dup of the original stdout; fd 1 is then
//! redirected into a pipe whose reader re-routes stray lines to stderr with
//! a prefix. Anything a script (or a library it pulls in) prints can no
//! longer corrupt frame boundaries.

#![cfg(unix)]

use std::io::{BufRead, BufReader};
use std::os::unix::io::FromRawFd;

use tokio::fs::File;

/// Installs the guard and returns the protected sink stream.
pub fn install() -> std::io::Result<File> {
    // dup the real stdout for the sink before touching fd 1
    let sink_fd = unsafe { libc::dup(libc::STDOUT_FILENO) };
    if sink_fd < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let mut pipe_fds = [0i32; 2];
    if unsafe { libc::pipe(pipe_fds.as_mut_ptr()) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let (read_fd, write_fd) = (pipe_fds[0], pipe_fds[1]);

    if unsafe { libc::dup2(write_fd, libc::STDOUT_FILENO) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    unsafe { libc::close(write_fd) };

    let reader = unsafe { std::fs::File::from_raw_fd(read_fd) };
    std::thread::Builder::new()
        .name("stdout-guard".to_owned())
        .spawn(move || {
            for line in BufReader::new(reader).lines() {
                match line {
                    Ok(line) => eprintln!("[script stdout] {line}"),
                    Err(_) => break,
                }
            }
        })?;

    let sink = unsafe { std::fs::File::from_raw_fd(sink_fd) };
    Ok(File::from_std(sink))
}
