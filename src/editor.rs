//! Interactive line editor: raw keystrokes in, one finished line out.
//!
//! The editor is split in three layers so each can be tested on its own:
//! [`KeyDecoder`] turns bytes into [`Key`]s, `EditSession` applies keys to the buffer,
//! and [`LineEditor`] wires both to a terminal (or any `Read`/`Write` pair).

use crate::complete::Completer;
use crate::terminal::{self, RawMode};
use std::io::{self, Read, Write};
use tracing::debug;

const BELL: &[u8] = b"\x07";
const CLEAR_LINE: &str = "\x1b[2K\r";
const SUFFIX_STYLE: &str = "\x1b[37m\x1b[1m";
const RESET_STYLE: &str = "\x1b[0m";

/// A decoded keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Tab,
    Enter,
    Backspace,
    Up,
    Down,
    Left,
    Right,
    /// Ctrl+D.
    EndOfInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DecodeState {
    #[default]
    Normal,
    Escape,
    EscapeBracket,
    Utf8 {
        needed: usize,
    },
}

/// Byte-at-a-time decoder: NORMAL -> ESCAPE -> ESCAPE_BRACKET -> dispatch.
///
/// Sequences it does not understand (function keys, Alt+key, `ESC [ 3 ~`) are swallowed
/// whole rather than leaking their bytes into the buffer.
#[derive(Debug, Default)]
pub struct KeyDecoder {
    state: DecodeState,
    pending: Vec<u8>,
}

impl KeyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one input byte; returns a key once a complete one has been seen.
    pub fn feed(&mut self, byte: u8) -> Option<Key> {
        match self.state {
            DecodeState::Normal => self.feed_normal(byte),
            DecodeState::Escape => {
                self.state = match byte {
                    b'[' | b'O' => DecodeState::EscapeBracket,
                    _ => DecodeState::Normal,
                };
                None
            }
            DecodeState::EscapeBracket => match byte {
                b'0'..=b'9' | b';' => None,
                _ => {
                    self.state = DecodeState::Normal;
                    match byte {
                        b'A' => Some(Key::Up),
                        b'B' => Some(Key::Down),
                        b'C' => Some(Key::Right),
                        b'D' => Some(Key::Left),
                        _ => None,
                    }
                }
            },
            DecodeState::Utf8 { needed } => {
                if byte & 0xC0 != 0x80 {
                    self.reset();
                    return self.feed_normal(byte);
                }
                self.pending.push(byte);
                if needed > 1 {
                    self.state = DecodeState::Utf8 { needed: needed - 1 };
                    return None;
                }
                let key = std::str::from_utf8(&self.pending)
                    .ok()
                    .and_then(|s| s.chars().next())
                    .map(Key::Char);
                self.reset();
                key
            }
        }
    }

    fn feed_normal(&mut self, byte: u8) -> Option<Key> {
        match byte {
            b'\t' => Some(Key::Tab),
            b'\n' | b'\r' => Some(Key::Enter),
            0x7f | 0x08 => Some(Key::Backspace),
            0x04 => Some(Key::EndOfInput),
            0x1b => {
                self.state = DecodeState::Escape;
                None
            }
            0x20..=0x7e => Some(Key::Char(byte as char)),
            0xC0..=0xF7 => {
                let needed = match byte {
                    0xC0..=0xDF => 1,
                    0xE0..=0xEF => 2,
                    _ => 3,
                };
                self.pending.clear();
                self.pending.push(byte);
                self.state = DecodeState::Utf8 { needed };
                None
            }
            _ => None,
        }
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.state = DecodeState::Normal;
    }
}

/// Result of one line read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A finished line, possibly empty.
    Line(String),
    /// The input stream closed (or Ctrl+D on an empty line).
    Eof,
}

/// Completion cycling state. Built on the first Tab, dropped when an edit makes it stale.
#[derive(Debug)]
struct ActiveCompletion {
    /// Buffer as it was when the set was built.
    base: Vec<char>,
    /// Start of the completed word in `base`, in characters.
    word_start: usize,
    /// Cursor position when Tab was pressed; text before it was typed by the user.
    prefix_end: usize,
    candidates: Vec<String>,
    index: usize,
}

enum Action {
    Redraw,
    Bell,
    Nothing,
    Submit,
    Eof,
}

/// Editing state of a single line read.
struct EditSession {
    line: Vec<char>,
    cursor: usize,
    capacity: usize,
    history_index: usize,
    completion: Option<ActiveCompletion>,
}

impl EditSession {
    fn new(capacity: usize, history_len: usize) -> Self {
        Self {
            line: Vec::new(),
            cursor: 0,
            capacity: capacity.max(1),
            history_index: history_len,
            completion: None,
        }
    }

    fn max_len(&self) -> usize {
        self.capacity - 1
    }

    fn text(&self) -> String {
        self.line.iter().collect()
    }

    fn handle(&mut self, key: Key, history: &[String], completer: &dyn Completer) -> Action {
        match key {
            Key::Char(c) => {
                if self.line.len() >= self.max_len() {
                    return Action::Bell;
                }
                self.line.insert(self.cursor, c);
                self.cursor += 1;
                if self
                    .completion
                    .as_ref()
                    .is_some_and(|active| self.cursor > active.prefix_end)
                {
                    self.completion = None;
                }
                Action::Redraw
            }
            Key::Backspace => {
                if self.cursor == 0 {
                    return Action::Nothing;
                }
                self.cursor -= 1;
                self.line.remove(self.cursor);
                if self
                    .completion
                    .as_ref()
                    .is_some_and(|active| self.cursor < active.prefix_end)
                {
                    self.completion = None;
                }
                Action::Redraw
            }
            Key::Enter => Action::Submit,
            Key::EndOfInput if self.line.is_empty() => Action::Eof,
            Key::EndOfInput => Action::Nothing,
            Key::Tab => {
                if self.completion.is_some() {
                    self.cycle(1);
                    return Action::Redraw;
                }
                self.start_completion(completer)
            }
            Key::Up => {
                if self.history_index == 0 {
                    return Action::Nothing;
                }
                self.history_index -= 1;
                self.load(&history[self.history_index]);
                Action::Redraw
            }
            Key::Down => {
                if self.history_index + 1 < history.len() {
                    self.history_index += 1;
                    self.load(&history[self.history_index]);
                } else {
                    self.history_index = history.len();
                    self.load("");
                }
                Action::Redraw
            }
            Key::Left => {
                if self.completion.is_some() {
                    self.cycle(-1);
                } else if self.cursor > 0 {
                    self.cursor -= 1;
                }
                Action::Redraw
            }
            Key::Right => {
                if self.completion.is_some() {
                    self.cycle(1);
                } else if self.cursor < self.line.len() {
                    self.cursor += 1;
                }
                Action::Redraw
            }
        }
    }

    fn start_completion(&mut self, completer: &dyn Completer) -> Action {
        let text = self.text();
        let byte_cursor: usize = self.line[..self.cursor].iter().map(|c| c.len_utf8()).sum();
        let found = completer.complete(&text, byte_cursor);
        if found.is_empty() {
            return Action::Bell;
        }

        let word_start = text[..found.word_start].chars().count();
        self.completion = Some(ActiveCompletion {
            base: self.line.clone(),
            word_start,
            prefix_end: self.cursor,
            candidates: found.candidates,
            index: 0,
        });
        self.apply_candidate();
        Action::Redraw
    }

    fn cycle(&mut self, step: isize) {
        if let Some(active) = self.completion.as_mut() {
            let n = active.candidates.len() as isize;
            active.index = (active.index as isize + step).rem_euclid(n) as usize;
        }
        self.apply_candidate();
    }

    fn apply_candidate(&mut self) {
        let Some(active) = self.completion.as_ref() else {
            return;
        };
        let candidate: Vec<char> = active.candidates[active.index].chars().collect();

        let mut line: Vec<char> = active.base[..active.word_start].to_vec();
        line.extend_from_slice(&candidate);
        let cursor = line.len();
        line.extend_from_slice(&active.base[active.prefix_end..]);
        line.truncate(self.max_len());

        self.cursor = cursor.min(line.len());
        self.line = line;
    }

    fn load(&mut self, text: &str) {
        self.line = text.chars().take(self.max_len()).collect();
        self.cursor = self.line.len();
        self.completion = None;
    }

    /// Range of the buffer drawn as the not-yet-typed part of a completion.
    fn suggested_range(&self) -> (usize, usize) {
        match &self.completion {
            Some(active) => (active.prefix_end.min(self.cursor), self.cursor),
            None => (self.cursor, self.cursor),
        }
    }
}

/// Redraw the prompt and the visible part of the buffer.
///
/// Lines wider than the terminal scroll horizontally so the cursor always stays on screen.
fn render<W: Write>(
    out: &mut W,
    prompt: &str,
    session: &EditSession,
    width: usize,
) -> io::Result<()> {
    let avail = width
        .saturating_sub(prompt.chars().count() + 1)
        .max(1);
    let start = session.cursor.saturating_sub(avail - 1);
    let end = (start + avail).min(session.line.len());
    let (hl_from, hl_to) = session.suggested_range();

    let mut frame = String::with_capacity(prompt.len() + avail + 16);
    frame.push_str(CLEAR_LINE);
    frame.push_str(prompt);
    for (i, c) in session.line[start..end].iter().enumerate() {
        let pos = start + i;
        if pos == hl_from && hl_from < hl_to {
            frame.push_str(SUFFIX_STYLE);
        }
        frame.push(*c);
        if pos + 1 == hl_to && hl_from < hl_to {
            frame.push_str(RESET_STYLE);
        }
    }
    let back = end - session.cursor;
    if back > 0 {
        frame.push_str(&format!("\x1b[{}D", back));
    }

    out.write_all(frame.as_bytes())?;
    out.flush()
}

/// Reads lines from the terminal with history recall and Tab completion.
pub struct LineEditor<C: Completer> {
    completer: C,
    capacity: usize,
}

impl<C: Completer> LineEditor<C> {
    /// `capacity` bounds the buffer: a line holds at most `capacity - 1` characters.
    pub fn new(completer: C, capacity: usize) -> Self {
        Self {
            completer,
            capacity,
        }
    }

    /// Read one line from stdin, holding the terminal in raw mode until it is finished.
    ///
    /// `history` is navigated with Up/Down, oldest entry first.
    pub fn read_line(&self, prompt: &str, history: &[String]) -> io::Result<ReadOutcome> {
        let _raw = match RawMode::enable() {
            Ok(guard) => Some(guard),
            Err(e) => {
                debug!("raw mode unavailable, reading cooked input: {}", e);
                None
            }
        };
        let width = terminal::width().unwrap_or(terminal::DEFAULT_WIDTH);
        let stdin = io::stdin();
        let mut input = stdin.lock();
        self.edit(&mut input, &mut io::stdout(), prompt, history, width)
    }

    /// The editing loop over arbitrary streams.
    pub fn edit<R: Read, W: Write>(
        &self,
        input: &mut R,
        output: &mut W,
        prompt: &str,
        history: &[String],
        width: usize,
    ) -> io::Result<ReadOutcome> {
        let mut session = EditSession::new(self.capacity, history.len());
        let mut decoder = KeyDecoder::new();
        render(output, prompt, &session, width)?;

        let mut byte = [0u8; 1];
        loop {
            let n = match input.read(&mut byte) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                output.write_all(b"\n")?;
                output.flush()?;
                return Ok(if session.line.is_empty() {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Line(session.text())
                });
            }

            let Some(key) = decoder.feed(byte[0]) else {
                continue;
            };
            match session.handle(key, history, &self.completer) {
                Action::Redraw => render(output, prompt, &session, width)?,
                Action::Bell => {
                    output.write_all(BELL)?;
                    output.flush()?;
                }
                Action::Nothing => {}
                Action::Submit => {
                    output.write_all(b"\n")?;
                    output.flush()?;
                    return Ok(ReadOutcome::Line(session.text()));
                }
                Action::Eof => {
                    output.write_all(b"\n")?;
                    output.flush()?;
                    return Ok(ReadOutcome::Eof);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complete::Completions;
    use std::io::Cursor;

    struct FixedCompleter(Vec<&'static str>);

    impl Completer for FixedCompleter {
        fn complete(&self, buffer: &str, cursor: usize) -> Completions {
            let prefix = &buffer[..cursor];
            let word_start = prefix.rfind(' ').map(|i| i + 1).unwrap_or(0);
            let word = &prefix[word_start..];
            Completions {
                word_start,
                candidates: self
                    .0
                    .iter()
                    .filter(|c| c.starts_with(word))
                    .map(|c| c.to_string())
                    .collect(),
            }
        }
    }

    fn run_with(input: &[u8], history: &[&str], capacity: usize) -> (ReadOutcome, Vec<u8>) {
        let editor = LineEditor::new(FixedCompleter(vec!["alpha", "alpine"]), capacity);
        let history: Vec<String> = history.iter().map(|s| s.to_string()).collect();
        let mut out = Vec::new();
        let res = editor
            .edit(&mut Cursor::new(input.to_vec()), &mut out, "> ", &history, 80)
            .unwrap();
        (res, out)
    }

    fn run(input: &[u8]) -> ReadOutcome {
        run_with(input, &[], 256).0
    }

    fn line(s: &str) -> ReadOutcome {
        ReadOutcome::Line(s.to_string())
    }

    #[test]
    fn test_decoder_arrow_sequences() {
        let mut d = KeyDecoder::new();
        assert_eq!(d.feed(0x1b), None);
        assert_eq!(d.feed(b'['), None);
        assert_eq!(d.feed(b'A'), Some(Key::Up));

        let keys: Vec<Option<Key>> = b"\x1bOB".iter().map(|b| d.feed(*b)).collect();
        assert_eq!(keys, vec![None, None, Some(Key::Down)]);

        assert_eq!(b"\x1b[C".iter().filter_map(|b| d.feed(*b)).last(), Some(Key::Right));
        assert_eq!(b"\x1b[D".iter().filter_map(|b| d.feed(*b)).last(), Some(Key::Left));
    }

    #[test]
    fn test_decoder_swallows_unknown_sequences() {
        let mut d = KeyDecoder::new();
        let keys: Vec<Key> = b"\x1b[3~x".iter().filter_map(|b| d.feed(*b)).collect();
        assert_eq!(keys, vec![Key::Char('x')]);

        let keys: Vec<Key> = b"\x1bqy".iter().filter_map(|b| d.feed(*b)).collect();
        assert_eq!(keys, vec![Key::Char('y')]);
    }

    #[test]
    fn test_decoder_control_and_utf8() {
        let mut d = KeyDecoder::new();
        assert_eq!(d.feed(b'\t'), Some(Key::Tab));
        assert_eq!(d.feed(b'\r'), Some(Key::Enter));
        assert_eq!(d.feed(0x7f), Some(Key::Backspace));
        assert_eq!(d.feed(0x04), Some(Key::EndOfInput));
        assert_eq!(d.feed(0x01), None);

        let keys: Vec<Key> = "é".bytes().filter_map(|b| d.feed(b)).collect();
        assert_eq!(keys, vec![Key::Char('é')]);
    }

    #[test]
    fn test_plain_line_and_blank_line_and_eof_are_distinct() {
        assert_eq!(run(b"ls -l\n"), line("ls -l"));
        assert_eq!(run(b"\n"), line(""));
        assert_eq!(run(b""), ReadOutcome::Eof);
        assert_eq!(run(b"\x04"), ReadOutcome::Eof);
    }

    #[test]
    fn test_ctrl_d_with_text_is_ignored_and_closed_stream_returns_text() {
        assert_eq!(run(b"ab\x04\n"), line("ab"));
        assert_eq!(run(b"partial"), line("partial"));
    }

    #[test]
    fn test_backspace_and_cursor_movement() {
        assert_eq!(run(b"lss\x7f\n"), line("ls"));
        assert_eq!(run(b"ac\x1b[Db\n"), line("abc"));
        assert_eq!(run(b"ab\x1b[D\x1b[D\x1b[D\x1b[C\x1b[C\x1b[Cc\n"), line("abc"));
        assert_eq!(run(b"\x7f\x7fx\n"), line("x"));
    }

    #[test]
    fn test_history_navigation() {
        let hist = ["first", "second"];
        assert_eq!(run_with(b"\x1b[A\n", &hist, 256).0, line("second"));
        assert_eq!(run_with(b"\x1b[A\x1b[A\x1b[A\n", &hist, 256).0, line("first"));
        assert_eq!(run_with(b"\x1b[A\x1b[A\x1b[B\n", &hist, 256).0, line("second"));
        assert_eq!(run_with(b"\x1b[A\x1b[B\n", &hist, 256).0, line(""));
        assert_eq!(run_with(b"typed\x1b[B\n", &hist, 256).0, line(""));
        assert_eq!(run_with(b"\x1b[A\n", &[], 256).0, line(""));
    }

    #[test]
    fn test_tab_builds_and_cycles_completions() {
        assert_eq!(run(b"al\t\n"), line("alpha"));
        assert_eq!(run(b"al\t\t\n"), line("alpine"));
        assert_eq!(run(b"al\t\t\t\n"), line("alpha"));
        assert_eq!(run(b"al\t\x1b[C\n"), line("alpine"));
        assert_eq!(run(b"al\t\x1b[D\n"), line("alpine"));
    }

    #[test]
    fn test_completion_replaces_only_the_current_word() {
        assert_eq!(run(b"cat alp\t\n"), line("cat alpha"));
    }

    #[test]
    fn test_empty_completion_rings_bell_and_keeps_buffer() {
        let (res, out) = run_with(b"zz\t\n", &[], 256);
        assert_eq!(res, line("zz"));
        assert!(out.contains(&0x07));
    }

    #[test]
    fn test_insert_after_completion_discards_the_set() {
        assert_eq!(run(b"al\tX\t\n"), line("alphaX"));
    }

    #[test]
    fn test_backspace_inside_suggestion_keeps_the_set() {
        assert_eq!(run(b"al\t\x7f\t\n"), line("alpine"));
    }

    #[test]
    fn test_backspace_past_prefix_discards_the_set() {
        assert_eq!(run(b"al\t\x7f\x7f\x7f\x7f\t\n"), line("alpha"));
    }

    #[test]
    fn test_history_recall_discards_completion() {
        let hist = ["echo hi"];
        assert_eq!(run_with(b"al\t\x1b[A\x1b[C\n", &hist, 256).0, line("echo hi"));
    }

    #[test]
    fn test_capacity_bounds_the_buffer() {
        let (res, out) = run_with(b"abcdef\n", &[], 4);
        assert_eq!(res, line("abc"));
        assert!(out.contains(&0x07));

        assert_eq!(run_with(b"\x1b[A\n", &["longer entry"], 5).0, line("long"));
    }

    #[test]
    fn test_suggested_suffix_is_highlighted() {
        let (_, out) = run_with(b"al\t\n", &[], 256);
        let shown = String::from_utf8(out).unwrap();
        assert!(shown.contains(&format!("al{}pha{}", SUFFIX_STYLE, RESET_STYLE)));
    }

    #[test]
    fn test_render_scrolls_long_lines() {
        let mut session = EditSession::new(256, 0);
        session.line = "abcdefghijklmnopqrstuvwxyz".chars().collect();
        session.cursor = session.line.len();

        let mut out = Vec::new();
        render(&mut out, "> ", &session, 10).unwrap();
        let shown = String::from_utf8(out).unwrap();

        // 10 columns, 2 for the prompt, 1 kept free: 7 columns, the last one under the cursor.
        assert!(shown.ends_with("> uvwxyz"));
    }
}
