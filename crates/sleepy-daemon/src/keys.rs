//! Single-key keyboard input.
//!
//! A [`KeyInput`] hands out polling sessions.  The terminal implementation
//! switches stdin into raw mode for the lifetime of a session and restores
//! it on drop, so every exit path (including errors and unwinding) leaves
//! the terminal usable.

use std::io::{self, IsTerminal};
use std::time::Duration;

use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tracing::{debug, error, warn};

/// Non-blocking source of single characters.
#[async_trait]
pub trait KeySource: Send {
    /// Waits at most `timeout` for one keypress.
    async fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<char>>;
}

/// Opens scoped polling sessions.
pub trait KeyInput: Send {
    fn open(&mut self) -> io::Result<Box<dyn KeySource + '_>>;
}

/// Keyboard attached to the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalKeys;

impl KeyInput for TerminalKeys {
    fn open(&mut self) -> io::Result<Box<dyn KeySource + '_>> {
        Ok(Box::new(RawModeSession::acquire()?))
    }
}

/// Holds the terminal in raw mode until dropped.
struct RawModeSession {
    raw: bool,
}

impl RawModeSession {
    fn acquire() -> io::Result<Self> {
        // Without a tty there is nothing to switch; crossterm still reads
        // from /dev/tty when one exists.
        if !io::stdin().is_terminal() {
            debug!("stdin is not a terminal, leaving input mode untouched");
            return Ok(Self { raw: false });
        }
        terminal::enable_raw_mode()?;
        Ok(Self { raw: true })
    }
}

impl Drop for RawModeSession {
    fn drop(&mut self) {
        if self.raw {
            if let Err(e) = terminal::disable_raw_mode() {
                error!("failed to restore terminal settings: {}", e);
            }
        }
    }
}

#[async_trait]
impl KeySource for RawModeSession {
    async fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<char>> {
        tokio::task::spawn_blocking(move || read_key(timeout))
            .await
            .map_err(io::Error::other)?
    }
}

fn read_key(timeout: Duration) -> io::Result<Option<char>> {
    if !event::poll(timeout)? {
        return Ok(None);
    }
    match event::read()? {
        Event::Key(key) => key_to_char(key),
        _ => Ok(None),
    }
}

fn key_to_char(key: KeyEvent) -> io::Result<Option<char>> {
    if key.kind != KeyEventKind::Press {
        return Ok(None);
    }
    // Raw mode swallows SIGINT; surface Ctrl-C as an interruption instead.
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        warn!("interrupted from keyboard");
        return Err(io::Error::new(io::ErrorKind::Interrupted, "ctrl-c pressed"));
    }
    Ok(match key.code {
        KeyCode::Char(c) => Some(c),
        KeyCode::Enter => Some('\n'),
        _ => None,
    })
}
