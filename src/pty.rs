//! PTY (pseudo-terminal) management
//!
//! Creates a pty pair with forkpty and runs the hosted command in the child
//! process. Provides master side read/write and terminal size setting.

#![allow(dead_code)]

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::info;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::{ForkResult, Pid};

/// PTY management structure
pub struct Pty {
    /// Master side file descriptor
    master: OwnedFd,
    /// Child process PID
    child_pid: Pid,
}

impl Pty {
    /// Create a pty and run `command` with `args` in the child.
    ///
    /// `cols`/`rows` set the initial terminal size; `term_env` sets the TERM
    /// environment variable the child sees.
    pub fn spawn(command: &str, args: &[String], cols: u16, rows: u16, term_env: &str) -> Result<Self> {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let ForkptyResult {
            master,
            fork_result,
        } = unsafe { forkpty(Some(&winsize), None)? };

        match fork_result {
            ForkResult::Child => {
                std::env::set_var("TERM", term_env);

                let program = std::ffi::CString::new(command).expect("NUL byte in command");
                let mut argv = vec![program.clone()];
                for arg in args {
                    argv.push(std::ffi::CString::new(arg.as_str()).expect("NUL byte in argument"));
                }

                match nix::unistd::execvp(&program, &argv) {
                    Ok(infallible) => match infallible {},
                    Err(e) => panic!("failed to run {}: {}", command, e),
                }
            }
            ForkResult::Parent { child } => {
                info!(
                    "pty spawned: command={}, pid={}, master_fd={}",
                    command,
                    child,
                    master.as_raw_fd()
                );
                Ok(Self {
                    master,
                    child_pid: child,
                })
            }
        }
    }

    /// Blocking read from the pty master.
    ///
    /// Returns Ok(0) when the child hangs up.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        match nix::unistd::read(self.master.as_raw_fd(), buf) {
            Ok(n) => Ok(n),
            // EIO is how Linux reports the replica side closing
            Err(nix::errno::Errno::EIO) => Ok(0),
            Err(e) => Err(anyhow!("pty read error: {}", e)),
        }
    }

    /// Write data to the pty master (the child's stdin)
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        match nix::unistd::write(self.master.as_raw_fd(), data) {
            Ok(n) => Ok(n),
            Err(e) => Err(anyhow!("pty write error: {}", e)),
        }
    }

    /// Change terminal size (TIOCSWINSZ) and notify the child
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        unsafe {
            let ret = libc::ioctl(
                self.master.as_raw_fd(),
                libc::TIOCSWINSZ,
                &winsize as *const Winsize,
            );
            if ret < 0 {
                return Err(anyhow!("TIOCSWINSZ failed: {}", io::Error::last_os_error()));
            }
        }

        let _ = nix::sys::signal::kill(self.child_pid, nix::sys::signal::Signal::SIGWINCH);

        Ok(())
    }

    /// Check if the child process is alive
    pub fn is_alive(&self) -> bool {
        match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(nix::sys::wait::WaitStatus::StillAlive) => true,
            Ok(_) => false,
            Err(_) => false,
        }
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        // Hang up and wait for the child to exit
        let _ = nix::sys::signal::kill(self.child_pid, nix::sys::signal::Signal::SIGHUP);
        let _ = waitpid(self.child_pid, None);
    }
}

/// Size of the hosting terminal (TIOCGWINSZ), None when stdout is not a tty
pub fn host_terminal_size() -> Option<(u16, u16)> {
    let mut winsize = Winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let ret = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut winsize) };
    if ret == 0 && winsize.ws_col > 0 && winsize.ws_row > 0 {
        Some((winsize.ws_col, winsize.ws_row))
    } else {
        None
    }
}

/// `io::Write` adapter over the master side, handed to a view as its stdin
/// writer so device replies and forwarded keystrokes reach the child
pub struct MasterWriter(Arc<Pty>);

impl MasterWriter {
    pub fn new(pty: Arc<Pty>) -> Self {
        Self(pty)
    }
}

impl io::Write for MasterWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .write(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
