use crate::exec::ReapPolicy;

/// Tunables for an interactive session.
///
/// There are no command-line flags; the binary always runs with [`ShellConfig::default`].
/// Tests build smaller configurations to exercise the capacity limits.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Fixed prompt printed before every line.
    pub prompt: String,
    /// Capacity of the line buffer; an edited line holds at most `line_capacity - 1` characters.
    pub line_capacity: usize,
    /// Number of history entries retained before the oldest is overwritten.
    pub history_capacity: usize,
    /// How many entries `history` prints when no count is given.
    pub history_display: usize,
    /// Maximum number of pending delayed commands.
    pub delay_capacity: usize,
    /// Child-termination disposition installed at startup.
    pub reap_policy: ReapPolicy,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: "norseish> ".to_string(),
            line_capacity: 256,
            history_capacity: 100,
            history_display: 10,
            delay_capacity: 100,
            reap_policy: ReapPolicy::Synchronous,
        }
    }
}
