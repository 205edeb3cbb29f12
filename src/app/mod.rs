//! Application shim
//!
//! Wires the hosted command's pty to the terminal view: a writer thread
//! copies pty output into the main view, keystrokes and buffer submissions
//! go back down the pty master, and the submitted-line history persists in
//! the state file. Everything here is plumbing; the terminal semantics live
//! in [`crate::view`].

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use log::{info, warn};
use signal_hook::consts::SIGWINCH;
use signal_hook::iterator::Signals;

use crate::config::AppConfig;
use crate::pty::{host_terminal_size, MasterWriter, Pty};
use crate::state::State;
use crate::view::View;

/// Read buffer size for the pty pump
const READ_BUF_SIZE: usize = 4096;

/// Notice appended to the main view when the child goes away
const EXIT_NOTICE: &[u8] = b"\n\n\x1b[32mcommand has exited\x1b[0m";

/// Everything the shim needs to host one command
pub struct App {
    config: AppConfig,
    state: Mutex<State>,
    /// Output of the hosted command
    main: Arc<View>,
    /// Line editor whose contents flush to the child on Enter
    buffer: Arc<View>,
    pty: Arc<Pty>,
    /// History browse position; `history.len()` means the live entry
    history_index: Mutex<usize>,
}

impl App {
    /// Spawn `command` in a pty and wire it to a fresh pair of views
    pub fn new(config: AppConfig, command: &str, args: &[String]) -> Result<App> {
        let state = State::load(&config.config_dir).context("failed to load state")?;

        let terminal = &config.user_config.terminal;
        let (cols, rows) = (terminal.cols, terminal.rows);
        let mode = terminal.output_mode();

        let main = Arc::new(View::new("main", -1, -1, cols as i32, rows as i32, mode));
        main.set_wrap(true);
        main.set_autoscroll(true);
        main.set_ignore_carriage_returns(terminal.ignore_carriage_returns);
        main.set_keybinding_context("main");

        let buffer = Arc::new(View::new("buffer", -1, -1, cols as i32, 4, mode));
        buffer.set_wrap(true);
        buffer.set_editable(true);
        buffer.set_keybinding_context("buffer");
        buffer.set_parent_view(Some("main"));

        let pty = Arc::new(
            Pty::spawn(command, args, cols, rows, &terminal.term_env)
                .with_context(|| format!("failed to spawn {}", command))?,
        );
        main.set_stdin_writer(Box::new(MasterWriter::new(pty.clone())));
        main.set_pty(true);

        // Initial resize: follow the hosting terminal when there is one
        resize_to_host(&main, &pty);

        let history_index = state.history.len();
        Ok(App {
            config,
            state: Mutex::new(state),
            main,
            buffer,
            pty,
            history_index: Mutex::new(history_index),
        })
    }

    pub fn main_view(&self) -> &Arc<View> {
        &self.main
    }

    pub fn buffer_view(&self) -> &Arc<View> {
        &self.buffer
    }

    /// Pump pty output into the main view until the child exits.
    ///
    /// Host stdin is forwarded to the child byte-for-byte in the background.
    pub fn run(&self) -> Result<()> {
        self.watch_resize();
        self.forward_host_stdin();
        let reader = self.start_reader();
        reader
            .join()
            .map_err(|_| anyhow::anyhow!("pty reader thread panicked"))?;
        self.save_state();
        Ok(())
    }

    /// The writer thread of the concurrency model: pty bytes in arrival
    /// order, serialized into the view under its lock
    fn start_reader(&self) -> thread::JoinHandle<()> {
        let view = self.main.clone();
        let pty = self.pty.clone();
        thread::spawn(move || {
            let mut buf = vec![0u8; READ_BUF_SIZE];
            loop {
                match pty.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        view.write(&buf[..n]);
                    }
                    Err(e) => {
                        warn!("pty read failed: {}", e);
                        break;
                    }
                }
            }
            info!("pty closed, writer loop done");
            view.write(EXIT_NOTICE);
            view.set_pty(false);
        })
    }

    /// Propagate host terminal size changes to the main view and the child
    /// (TIOCSWINSZ plus SIGWINCH). Detached: dies with the process.
    fn watch_resize(&self) {
        let view = self.main.clone();
        let pty = self.pty.clone();
        thread::spawn(move || match Signals::new([SIGWINCH]) {
            Ok(mut signals) => {
                for _ in signals.forever() {
                    resize_to_host(&view, &pty);
                }
            }
            Err(e) => warn!("failed to install SIGWINCH handler: {}", e),
        });
    }

    /// Forward raw host stdin to the child. Detached: dies with the process.
    fn forward_host_stdin(&self) {
        let pty = self.pty.clone();
        thread::spawn(move || {
            let mut stdin = std::io::stdin();
            let mut buf = [0u8; 1024];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if pty.write(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    // ========== Buffer editor ==========

    /// Append typed text to the buffer view
    pub fn type_into_buffer(&self, text: &str) {
        if !self.buffer.editable() {
            return;
        }
        self.buffer.write(text.as_bytes());
    }

    /// Delete the last rune of the buffer line
    pub fn backspace_in_buffer(&self) {
        if !self.buffer.editable() {
            return;
        }
        let mut contents = self.buffer.buffer();
        if contents.pop().is_some() {
            self.buffer.clear();
            self.buffer.write(contents.as_bytes());
        }
    }

    /// Send the buffer line (plus a newline) to the child and record it in
    /// the persistent history
    pub fn flush_buffer(&self) -> Result<()> {
        let line = self.buffer.buffer();
        self.pty
            .write(format!("{}\n", line).as_bytes())
            .context("failed to write to pty")?;

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.push_history(&line, self.config.user_config.buffer.history_size);
            *self.history_index.lock().unwrap_or_else(|e| e.into_inner()) = state.history.len();
        }
        self.save_state();
        self.buffer.clear();
        Ok(())
    }

    /// Recall the previous history entry into the buffer
    pub fn prev_history_item(&self) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut index = self.history_index.lock().unwrap_or_else(|e| e.into_inner());
        if *index == 0 {
            return;
        }
        *index -= 1;
        let entry = state.history[*index].clone();
        drop(state);
        self.set_buffer_contents(&entry);
    }

    /// Step forward through history; past the newest entry the buffer
    /// empties back to the live line
    pub fn next_history_item(&self) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut index = self.history_index.lock().unwrap_or_else(|e| e.into_inner());
        if *index >= state.history.len() {
            return;
        }
        *index += 1;
        let entry = if *index == state.history.len() {
            String::new()
        } else {
            state.history[*index].clone()
        };
        drop(state);
        self.set_buffer_contents(&entry);
    }

    fn set_buffer_contents(&self, contents: &str) {
        self.buffer.clear();
        self.buffer.write(contents.as_bytes());
    }

    // ========== Scrolling ==========

    /// Scroll the main view up one line, detaching from the tail
    pub fn scroll_main_up(&self) {
        self.main.set_autoscroll(false);
        let (ox, oy) = self.main.origin();
        self.main.set_origin(ox, oy.saturating_sub(1));
    }

    /// Scroll the main view down one line, reattaching at the tail
    pub fn scroll_main_down(&self) {
        let (ox, oy) = self.main.origin();
        let oy = oy + 1;
        let (_, height) = self.main.size();
        if oy + height >= self.main.view_lines_height() {
            self.main.set_autoscroll(true);
        }
        self.main.set_origin(ox, oy);
    }

    fn save_state(&self) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = state.save(&self.config.config_dir) {
            warn!("failed to save state: {}", e);
        }
    }
}

/// Resize the main view and the pty to the hosting terminal's current size.
///
/// A no-op when stdout is not a tty (tests, pipes); the configured
/// cols/rows stay in effect then.
fn resize_to_host(view: &View, pty: &Pty) {
    if let Some((cols, rows)) = host_terminal_size() {
        view.set_bounds(-1, -1, cols as i32, rows as i32);
        if let Err(e) = pty.resize(cols, rows) {
            warn!("pty resize failed: {}", e);
        }
    }
}
