//! Lexical analysis (tokenization) of a command line.
//!
//! Quoting is deliberately shallow: every double-quote character is dropped and does not
//! protect whitespace, so `echo "a b"` yields the two words `a` and `b`.

/// Represents a token resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A run of characters that are not whitespace or operators.
    Word(String),
    /// The pipe operator, `|`.
    PipeOp,
    /// Input redirection symbol, `<`.
    RedirectIn,
    /// Output redirection symbol, `>`.
    RedirectOut,
    /// Append redirection symbol, `>>`.
    RedirectAppend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
}

impl LexingFSM {
    /// Creates a new instance of the lexical analysis Finite State Machine.
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
        }
    }

    /// Performs lexical analysis on the input string and returns a vector of tokens.
    fn make_tokens(&mut self) -> Vec<Token> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match ch {
                '"' => {}
                c if c.is_whitespace() => self.finish_word(&mut out),
                '|' => {
                    self.finish_word(&mut out);
                    out.push(Token::PipeOp);
                }
                '<' => {
                    self.finish_word(&mut out);
                    out.push(Token::RedirectIn);
                }
                '>' => {
                    self.finish_word(&mut out);
                    if self.peek_char() == Some('>') {
                        self.read_char();
                        out.push(Token::RedirectAppend);
                    } else {
                        out.push(Token::RedirectOut);
                    }
                }
                c => {
                    self.buffer.push(c);
                    self.state = LexingState::ReadingWord;
                }
            }
        }

        self.finish_word(&mut out);
        out
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn finish_word(&mut self, out: &mut Vec<Token>) {
        if self.state == LexingState::ReadingWord {
            out.push(Token::Word(std::mem::take(&mut self.buffer)));
            self.state = LexingState::Start;
        }
    }
}

/// Split a command line into words and operators.
///
/// Operators need no surrounding whitespace: `cat<in.txt|wc>>log` tokenizes the same as
/// `cat < in.txt | wc >> log`.
pub fn split_into_tokens(line: &str) -> Vec<Token> {
    let mut lexer = LexingFSM::new(line);
    lexer.make_tokens()
}
