//! Ambient console output: a tee'd stdout/stderr singleton with an RAII
//! capture guard, a spinner-driven status line for interactive runs, and
//! structured progress/diagnostic events for the phase runner and the
//! guard/context injector. There is no `tracing`/`log` dependency here;
//! this crate's ambient logging is this module, end to end.

use std::io::{self, Write};
use std::sync::Arc;

use colored::Colorize;
use crossterm::{
    cursor::MoveToColumn,
    execute,
    terminal::{Clear, ClearType},
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::time::Duration;

struct TeeWriter<W: Write> {
    upstream: W,
    capture: Option<Arc<Mutex<Vec<u8>>>>,
}

impl<W: Write> TeeWriter<W> {
    fn new(upstream: W) -> Self {
        Self {
            upstream,
            capture: None,
        }
    }

    fn set_capture(&mut self, buf: Option<Arc<Mutex<Vec<u8>>>>) {
        self.capture = buf;
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.upstream.write(buf)?;
        if let Some(cap) = &self.capture {
            cap.lock().extend_from_slice(&buf[..n]);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.upstream.flush()
    }
}

pub struct Console {
    out: TeeWriter<io::Stdout>,
    err: TeeWriter<io::Stderr>,
    out_cap: Arc<Mutex<Vec<u8>>>,
    err_cap: Arc<Mutex<Vec<u8>>>,
}

impl Console {
    fn new() -> Self {
        let out_cap = Arc::new(Mutex::new(Vec::new()));
        let err_cap = Arc::new(Mutex::new(Vec::new()));
        let mut out = TeeWriter::new(io::stdout());
        let mut err = TeeWriter::new(io::stderr());
        out.set_capture(Some(out_cap.clone()));
        err.set_capture(Some(err_cap.clone()));
        Self {
            out,
            err,
            out_cap,
            err_cap,
        }
    }

    fn enable_capture(&mut self, enable: bool) {
        let out = if enable { Some(self.out_cap.clone()) } else { None };
        let err = if enable { Some(self.err_cap.clone()) } else { None };
        self.out.set_capture(out);
        self.err.set_capture(err);
    }

    fn take_stdout(&self) -> String {
        let mut v = self.out_cap.lock();
        let s = String::from_utf8_lossy(&v).into_owned();
        v.clear();
        s
    }

    fn take_stderr(&self) -> String {
        let mut v = self.err_cap.lock();
        let s = String::from_utf8_lossy(&v).into_owned();
        v.clear();
        s
    }
}

pub static CONSOLE: Lazy<Mutex<Console>> = Lazy::new(|| Mutex::new(Console::new()));

pub struct CaptureGuard {
    prev_enabled: bool,
}

impl CaptureGuard {
    pub fn start() -> Self {
        let mut c = CONSOLE.lock();
        let was_enabled = !c.out_cap.lock().is_empty() || !c.err_cap.lock().is_empty();
        c.enable_capture(true);
        Self {
            prev_enabled: was_enabled,
        }
    }

    pub fn take_both(&self) -> (String, String) {
        let c = CONSOLE.lock();
        (c.take_stdout(), c.take_stderr())
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let mut c = CONSOLE.lock();
        c.enable_capture(self.prev_enabled);
    }
}

#[macro_export]
macro_rules! cprintln {
    ($($arg:tt)*) => {{
        use std::io::Write;
        let mut c = $crate::console::CONSOLE.lock();
        let _ = writeln!(&mut c.out, "{}", format!($($arg)*));
        let _ = c.out.flush();
    }};
}

#[macro_export]
macro_rules! ceprintln {
    ($($arg:tt)*) => {{
        use std::io::Write;
        let mut c = $crate::console::CONSOLE.lock();
        let _ = writeln!(&mut c.err, "{}", format!($($arg)*));
        let _ = c.err.flush();
    }};
}

pub fn take_stdout() -> String {
    CONSOLE.lock().take_stdout()
}

pub fn take_stderr() -> String {
    CONSOLE.lock().take_stderr()
}

/// How much progress chatter to print to stderr when no explicit
/// `ProgressHook` channel is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

#[derive(Debug, Clone, Copy)]
pub struct DisplayConfig {
    pub verbosity: Verbosity,
    pub stdout_is_tty: bool,
}

static DISPLAY_CONFIG: Lazy<Mutex<DisplayConfig>> = Lazy::new(|| {
    Mutex::new(DisplayConfig {
        verbosity: Verbosity::Normal,
        stdout_is_tty: atty_stdout(),
    })
});

fn atty_stdout() -> bool {
    use std::io::IsTerminal;
    io::stdout().is_terminal()
}

pub fn set_display_config(config: DisplayConfig) {
    *DISPLAY_CONFIG.lock() = config;
}

pub fn get_display_config() -> DisplayConfig {
    *DISPLAY_CONFIG.lock()
}

/// What produced a [`ProgressEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Agent,
    Phase,
    Guard,
    Injector,
    Dispatcher,
}

/// A structured progress/diagnostic line. Phase subprocess stdout/stderr
/// lines, dispatcher poll-cycle notes, and guard/injector diagnostics all
/// flow through this shape so a caller can render or forward them
/// uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub source: Option<String>,
    pub phase: Option<String>,
    pub message: Option<String>,
    pub detail: Option<String>,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            source: None,
            phase: None,
            message: Some(message.into()),
            detail: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }
}

/// Render a [`ProgressEvent`] to zero or more lines for stderr, honoring
/// verbosity (quiet suppresses everything but is still given the chance
/// to render, so a caller can always call this unconditionally).
pub fn render_progress_event(event: &ProgressEvent, verbosity: Verbosity) -> Vec<String> {
    if verbosity == Verbosity::Quiet {
        return Vec::new();
    }
    let prefix = match event.source.as_deref() {
        Some(source) => format!("[{source}]"),
        None => format!("[{:?}]", event.kind).to_lowercase(),
    };
    let message = event.message.as_deref().unwrap_or("");
    vec![format!("{prefix} {message}")]
}

/// A spinner status line, used by interactive commands (`adw doctor`,
/// `adw run-phase`) while a long-running subprocess is in flight.
pub enum Status {
    Working(String),
    Event(ProgressEvent),
    Done,
    Error(String),
}

async fn display_status(mut rx: Receiver<Status>) {
    let spinner = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
    let mut i = 0usize;
    let mut last_message = String::new();

    loop {
        tokio::select! {
            Some(status) = rx.recv() => match status {
                Status::Working(msg) => {
                    last_message = msg.clone();
                    let _ = execute!(io::stderr(), MoveToColumn(0), Clear(ClearType::CurrentLine));
                    eprint!("{} {}", spinner[i % spinner.len()].blue(), msg.blue());
                    i = i.wrapping_add(1);
                }
                Status::Event(event) => {
                    let _ = execute!(io::stderr(), MoveToColumn(0), Clear(ClearType::CurrentLine));
                    for line in render_progress_event(&event, get_display_config().verbosity) {
                        eprintln!("{line}");
                    }
                }
                Status::Done => {
                    let _ = execute!(io::stderr(), MoveToColumn(0), Clear(ClearType::CurrentLine));
                    break;
                }
                Status::Error(e) => {
                    let _ = execute!(io::stderr(), MoveToColumn(0), Clear(ClearType::CurrentLine));
                    eprintln!("Error: {}", e);
                    break;
                }
            },
            _ = tokio::time::sleep(Duration::from_millis(80)) => {
                let _ = execute!(io::stderr(), MoveToColumn(0), Clear(ClearType::CurrentLine));
                eprint!("{} {}", spinner[i % spinner.len()].blue(), last_message.blue());
                i = i.wrapping_add(1);
            }
        }
    }
}

/// Run `f` while driving a spinner off its `Sender<Status>`, returning
/// whatever `f` returns.
pub async fn call_with_status<F, Fut, T>(f: F) -> T
where
    F: FnOnce(Sender<Status>) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let (tx, rx) = channel(16);
    let handle = tokio::spawn(display_status(rx));
    let output = f(tx.clone()).await;
    let _ = tx.send(Status::Done).await;
    let _ = handle.await;
    output
}
