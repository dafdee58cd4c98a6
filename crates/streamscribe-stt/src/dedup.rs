use std::collections::VecDeque;

/// Token-tail deduplicator.
///
/// Some ASR backends repeat a few leading tokens from overlapped audio
/// even after timestamp-based trimming has run. This guard keeps a
/// small rolling tail of previously emitted tokens and strips a
/// candidate's prefix when it repeats that tail. It only ever edits
/// text; timestamps are left alone.
pub struct TailDeduplicator {
    recent: VecDeque<String>,
    max_tail: usize,
}

impl TailDeduplicator {
    pub fn new(max_tail: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(max_tail),
            max_tail,
        }
    }

    /// Strip a repeated prefix from `text`, then record its tokens as
    /// the new tail. Returns the surviving text, possibly empty.
    pub fn apply(&mut self, text: &str) -> String {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.is_empty() {
            return String::new();
        }

        let matched = self.matched_prefix_len(&tokens);
        let survivors = &tokens[matched..];
        let result = survivors.join(" ");

        for tok in survivors {
            if self.recent.len() == self.max_tail {
                self.recent.pop_front();
            }
            self.recent.push_back(normalize(tok));
        }

        result
    }

    /// Longest prefix of `tokens` that matches a suffix of the recent
    /// tail, comparing case-insensitively and ignoring punctuation.
    fn matched_prefix_len(&self, tokens: &[&str]) -> usize {
        let tail: Vec<&String> = self.recent.iter().collect();
        let max_check = tokens.len().min(tail.len());

        // Longest match wins so a fully repeated phrase disappears.
        for len in (1..=max_check).rev() {
            let tail_suffix = &tail[tail.len() - len..];
            let prefix = &tokens[..len];
            if tail_suffix
                .iter()
                .zip(prefix.iter())
                .all(|(a, b)| **a == normalize(b))
            {
                return len;
            }
        }
        0
    }

    pub fn reset(&mut self) {
        self.recent.clear();
    }
}

impl Default for TailDeduplicator {
    fn default() -> Self {
        Self::new(12)
    }
}

fn normalize(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '\'')
        .collect::<String>()
        .to_lowercase()
}
