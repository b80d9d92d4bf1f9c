//! Terminal I/O adapter: raw-mode acquisition and window size queries.

use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use std::io::{self, Stdin};
use std::os::fd::{AsFd, AsRawFd};
use tracing::{debug, warn};

nix::ioctl_read_bad!(window_size, libc::TIOCGWINSZ, libc::winsize);

/// Width assumed when the output is not a terminal.
pub const DEFAULT_WIDTH: usize = 80;

/// Raw (non-canonical, non-echoing) mode held for as long as the guard lives.
///
/// The saved configuration is restored in `Drop`, so every exit path of a line read
/// (return, `?`, panic unwinding) puts the terminal back the way it was.
pub struct RawMode {
    stdin: Stdin,
    saved: Termios,
}

impl RawMode {
    /// Switch standard input to raw mode.
    ///
    /// Only canonical input and echo are turned off; signal generation stays enabled so the
    /// shell's own dispositions decide what Ctrl+C and Ctrl+Z do.
    pub fn enable() -> nix::Result<Self> {
        let stdin = io::stdin();
        let saved = termios::tcgetattr(stdin.as_fd())?;

        let mut raw = saved.clone();
        raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw)?;

        debug!("terminal switched to raw mode");
        Ok(Self { stdin, saved })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = termios::tcsetattr(self.stdin.as_fd(), SetArg::TCSANOW, &self.saved) {
            warn!("failed to restore terminal mode: {}", e);
        } else {
            debug!("terminal mode restored");
        }
    }
}

/// Current width of the terminal attached to stdout, in columns.
pub fn width() -> Option<usize> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: `ws` is a valid, writable winsize for the duration of the call.
    let res = unsafe { window_size(io::stdout().as_raw_fd(), &mut ws) };
    match res {
        Ok(_) if ws.ws_col > 0 => Some(ws.ws_col as usize),
        _ => None,
    }
}
