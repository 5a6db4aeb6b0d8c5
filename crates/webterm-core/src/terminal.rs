//! Terminal sessions: a child process in a pseudo-terminal feeding an emulator.

use crate::emulator::Emulator;
use crate::{Result, WebtermError};
use portable_pty::{native_pty_system, Child as PtyChild, CommandBuilder, MasterPty, PtySize};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use webterm_types::{Cursor, Line, Screen, TerminalSettings};

/// Minimum delay between relaunch attempts after a failed restart.
pub const RELAUNCH_BACKOFF: Duration = Duration::from_secs(1);

/// Receives the screen updates produced by one `Terminal::process` call.
pub trait ScreenObserver {
    fn line_changed(&mut self, line_number: u32, line: Line);
    fn cursor_moved(&mut self, cursor: Cursor);
}

/// The capability the coordinator drives: a screen that changes as a child
/// process writes to it, and that accepts keyboard input.
pub trait Terminal: Send {
    /// Launch the child. Fails with `AlreadyRunning` if it is running.
    fn start(&mut self) -> Result<()>;

    /// Drain pending output without blocking and report changed lines, then
    /// the cursor if any output was consumed. On end of stream the session is
    /// ended instead and no lines are guaranteed to be reported.
    fn process(&mut self, observer: &mut dyn ScreenObserver) -> Result<()>;

    /// Stop the child. Relaunches it when configured to restart.
    fn end(&mut self);

    /// Write raw bytes to the child.
    fn input_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    fn keypress(&mut self, code: u8) -> Result<()> {
        self.input_bytes(&[code])
    }

    fn screen(&self) -> Screen;

    fn settings(&self) -> TerminalSettings;

    fn is_running(&self) -> bool;
}

/// What to run and how big the screen is.
#[derive(Debug, Clone)]
pub struct TerminalOptions {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Exported to the child as `HOME` when set.
    pub home_dir: Option<PathBuf>,
    pub rows: u16,
    pub cols: u16,
    pub restart: bool,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            command: "/bin/sh".to_string(),
            args: Vec::new(),
            working_dir: PathBuf::from("."),
            home_dir: None,
            rows: 30,
            cols: 80,
            restart: true,
        }
    }
}

enum Output {
    Data(Vec<u8>),
    Eof,
}

/// Handles for one launch of the child.
struct Launch {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn PtyChild + Send + Sync>,
    output: Receiver<Output>,
}

impl Launch {
    fn shutdown(mut self) {
        let pid = self.child.process_id();
        if let Err(e) = self.child.kill() {
            debug!(target: "webterm::pty", "Kill of pid {:?} failed (likely already exited): {}", pid, e);
        }
        match self.child.wait() {
            Ok(status) => debug!(target: "webterm::pty", "Child {:?} reaped: {:?}", pid, status),
            Err(e) => warn!(target: "webterm::pty", "Failed to reap child {:?}: {}", pid, e),
        }
        // Dropping the master closes the pty; the reader thread sees EOF and exits.
        drop(self.writer);
        drop(self.master);
    }
}

enum State {
    Stopped { retry_at: Option<Instant> },
    Running(Launch),
}

/// A child process running in a pseudo-terminal, with its screen emulated.
pub struct TerminalSession {
    options: TerminalOptions,
    emulator: Emulator,
    state: State,
    launches: u64,
}

impl TerminalSession {
    pub fn new(options: TerminalOptions) -> Self {
        let emulator = Emulator::new(options.rows, options.cols);
        Self {
            options,
            emulator,
            state: State::Stopped { retry_at: None },
            launches: 0,
        }
    }

    pub fn options(&self) -> &TerminalOptions {
        &self.options
    }

    /// Number of successful launches, restarts included.
    pub fn launches(&self) -> u64 {
        self.launches
    }

    fn launch(&mut self) -> Result<()> {
        let opts = &self.options;
        info!(
            target: "webterm::pty",
            "Launching {} {:?} in {:?} ({}x{})",
            opts.command, opts.args, opts.working_dir, opts.cols, opts.rows
        );

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: opts.rows,
                cols: opts.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| WebtermError::PtyError(e.to_string()))?;

        #[cfg(unix)]
        disable_echo(&*pair.master)?;

        let mut cmd = CommandBuilder::new(&opts.command);
        cmd.args(&opts.args);
        cmd.cwd(&opts.working_dir);
        cmd.env("TERM", "xterm");
        if let Some(home) = &opts.home_dir {
            cmd.env("HOME", home);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!(target: "webterm::pty", "Failed to spawn {}: {}", opts.command, e);
            WebtermError::ProcessSpawnFailed(format!("{}: {}", opts.command, e))
        })?;
        // Only the child may hold the slave, otherwise EOF never arrives.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| WebtermError::PtyError(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| WebtermError::PtyError(e.to_string()))?;

        let (tx, output) = mpsc::channel();
        std::thread::Builder::new()
            .name("webterm-pty-reader".to_string())
            .spawn(move || read_output(reader, tx))?;

        self.emulator = Emulator::new(opts.rows, opts.cols);
        self.state = State::Running(Launch {
            master: pair.master,
            writer,
            child,
            output,
        });
        self.launches += 1;
        Ok(())
    }

    fn relaunch(&mut self) {
        match self.launch() {
            Ok(()) => info!(target: "webterm::pty", "Terminal restarted (launch #{})", self.launches),
            Err(e) => {
                warn!(target: "webterm::pty", "Restart failed, retrying in {:?}: {}", RELAUNCH_BACKOFF, e);
                self.state = State::Stopped {
                    retry_at: Some(Instant::now() + RELAUNCH_BACKOFF),
                };
            }
        }
    }

    fn write_all(&mut self, mut bytes: &[u8]) -> Result<bool> {
        let State::Running(launch) = &mut self.state else {
            return Err(WebtermError::NotRunning);
        };
        while !bytes.is_empty() {
            match launch.writer.write(bytes) {
                Ok(0) => return Ok(false),
                Ok(n) => bytes = &bytes[n..],
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(target: "webterm::pty", "Write to pty failed: {}", e);
                    return Ok(false);
                }
            }
        }
        Ok(launch.writer.flush().is_ok())
    }
}

impl Terminal for TerminalSession {
    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(WebtermError::AlreadyRunning);
        }
        self.launch()
    }

    fn process(&mut self, observer: &mut dyn ScreenObserver) -> Result<()> {
        if let State::Stopped { retry_at } = self.state {
            match retry_at {
                Some(at) if self.options.restart => {
                    if Instant::now() < at {
                        return Ok(());
                    }
                    self.relaunch();
                    if !self.is_running() {
                        return Ok(());
                    }
                }
                _ => return Err(WebtermError::NotRunning),
            }
        }

        let State::Running(launch) = &mut self.state else {
            return Err(WebtermError::NotRunning);
        };

        let mut consumed = false;
        let mut eof = false;
        loop {
            match launch.output.try_recv() {
                Ok(Output::Data(bytes)) => {
                    trace!(target: "webterm::pty", "Feeding {} bytes", bytes.len());
                    self.emulator.feed(&bytes);
                    consumed = true;
                }
                Ok(Output::Eof) | Err(TryRecvError::Disconnected) => {
                    eof = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        if !eof && !consumed {
            match launch.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(target: "webterm::pty", "Child exited: {:?}", status);
                    eof = true;
                }
                Ok(None) => {}
                Err(e) => warn!(target: "webterm::pty", "Failed to poll child: {}", e),
            }
        }

        if eof {
            info!(target: "webterm::pty", "Child output ended");
            self.end();
            return Ok(());
        }

        let replies = self.emulator.take_replies();
        if !replies.is_empty() && !self.write_all(&replies)? {
            self.end();
            return Ok(());
        }

        for (row, line) in self.emulator.take_changed_lines() {
            observer.line_changed(row as u32, line);
        }
        if consumed {
            observer.cursor_moved(self.emulator.cursor());
        }
        Ok(())
    }

    fn end(&mut self) {
        let previous = std::mem::replace(&mut self.state, State::Stopped { retry_at: None });
        let State::Running(launch) = previous else {
            self.state = previous;
            return;
        };
        launch.shutdown();
        info!(target: "webterm::pty", "Terminal session ended");

        if self.options.restart {
            self.relaunch();
        }
    }

    fn input_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.write_all(bytes)? {
            warn!(target: "webterm::pty", "Child stopped accepting input");
            self.end();
        }
        Ok(())
    }

    fn screen(&self) -> Screen {
        self.emulator.screen()
    }

    fn settings(&self) -> TerminalSettings {
        TerminalSettings {
            rows: self.options.rows,
            cols: self.options.cols,
        }
    }

    fn is_running(&self) -> bool {
        matches!(self.state, State::Running(_))
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let previous = std::mem::replace(&mut self.state, State::Stopped { retry_at: None });
        if let State::Running(launch) = previous {
            launch.shutdown();
        }
    }
}

/// Blocking reader loop; runs on its own thread for the life of one launch.
fn read_output(mut reader: Box<dyn Read + Send>, tx: Sender<Output>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Output::Data(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                // Linux reports EIO once the child side is gone.
                debug!(target: "webterm::pty", "PTY read ended: {}", e);
                break;
            }
        }
    }
    let _ = tx.send(Output::Eof);
}

#[cfg(unix)]
fn disable_echo(master: &dyn MasterPty) -> Result<()> {
    let Some(fd) = master.as_raw_fd() else {
        return Ok(());
    };
    // SAFETY: `fd` is the open master descriptor owned by `master`, and the
    // termios struct is fully initialised by tcgetattr before use.
    unsafe {
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut termios) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        termios.c_lflag &= !libc::ECHO;
        if libc::tcsetattr(fd, libc::TCSANOW, &termios) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }
    Ok(())
}
