//! The Stream Filter (C2)
//!
//! Some backends emit hidden chain-of-thought wrapped in `<think>...</think>`.
//! `ThinkTagFilter` strips these spans out of a byte stream without corrupting
//! adjacent visible text, even when the opening or closing marker lands split
//! across two chunks. It never reorders bytes and never emits a byte twice.
//!
//! Grounded on the buffering discipline of a monotonic gate over a chunked
//! stream: hold back only the bytes that could still turn into a match, and
//! release everything else immediately.

const OPEN: &[u8] = b"<think>";
const CLOSE: &[u8] = b"</think>";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Outside,
    Inside,
}

/// Stateful filter for one stream. Feed it chunks in arrival order via
/// [`push`](Self::push), call [`flush`](Self::flush) once at stream end.
pub struct ThinkTagFilter {
    buf: Vec<u8>,
    state: State,
}

impl ThinkTagFilter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            state: State::Outside,
        }
    }

    /// Feed the next chunk of backend output, returning the bytes that are
    /// now safe to hand to the caller.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            match self.state {
                State::Inside => match find(&self.buf, CLOSE) {
                    Some(pos) => {
                        self.buf.drain(..pos + CLOSE.len());
                        self.state = State::Outside;
                    }
                    None => return out,
                },
                State::Outside => match find(&self.buf, OPEN) {
                    Some(pos) => {
                        out.extend_from_slice(&self.buf[..pos]);
                        self.buf.drain(..pos + OPEN.len());
                        self.state = State::Inside;
                    }
                    None => {
                        let overlap = longest_suffix_prefix_overlap(&self.buf, OPEN);
                        let emit_len = self.buf.len() - overlap;
                        out.extend_from_slice(&self.buf[..emit_len]);
                        self.buf.drain(..emit_len);
                        return out;
                    }
                },
            }
        }
    }

    /// Convenience wrapper for text input/output. Invalid UTF-8 produced by a
    /// mid-character split is replaced per `String::from_utf8_lossy`.
    pub fn push_str(&mut self, chunk: &str) -> String {
        String::from_utf8_lossy(&self.push(chunk.as_bytes())).into_owned()
    }

    /// Signal end of stream. Emits any buffered text that is not a possible
    /// prefix of `<think>`; an unclosed opening marker suppresses the
    /// remainder of the stream rather than leaking a partial tag.
    pub fn flush(&mut self) -> Vec<u8> {
        match self.state {
            State::Outside => {
                // `push` only ever retains a suffix that is itself a
                // possible prefix of `<think>` while staying Outside, so the
                // whole buffer must be discarded rather than emitted.
                let overlap = longest_suffix_prefix_overlap(&self.buf, OPEN);
                if overlap == self.buf.len() {
                    self.buf.clear();
                    Vec::new()
                } else {
                    std::mem::take(&mut self.buf)
                }
            }
            State::Inside => {
                self.buf.clear();
                Vec::new()
            }
        }
    }

    pub fn flush_str(&mut self) -> String {
        String::from_utf8_lossy(&self.flush()).into_owned()
    }
}

impl Default for ThinkTagFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Longest suffix of `buf` that is also a (strict, non-empty) prefix of
/// `pattern`. Bounded by `pattern.len() - 1` since a full match would already
/// have been found by `find`.
fn longest_suffix_prefix_overlap(buf: &[u8], pattern: &[u8]) -> usize {
    let upper = (pattern.len() - 1).min(buf.len());
    for len in (1..=upper).rev() {
        let suffix = &buf[buf.len() - len..];
        if pattern.starts_with(suffix) {
            return len;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunks: &[&str]) -> String {
        let mut filter = ThinkTagFilter::new();
        let mut out = String::new();
        for chunk in chunks {
            out.push_str(&filter.push_str(chunk));
        }
        out.push_str(&filter.flush_str());
        out
    }

    #[test]
    fn passes_through_plain_text() {
        assert_eq!(run(&["hello ", "world"]), "hello world");
    }

    #[test]
    fn strips_a_tag_within_one_chunk() {
        assert_eq!(
            run(&["before <think>secret reasoning</think> after"]),
            "before  after"
        );
    }

    #[test]
    fn strips_a_tag_whose_opening_marker_spans_chunks() {
        assert_eq!(run(&["keep <thi", "nk>hidden</think> more"]), "keep  more");
    }

    #[test]
    fn strips_a_tag_whose_closing_marker_spans_chunks() {
        assert_eq!(run(&["keep <think>hidden</thi", "nk> more"]), "keep  more");
    }

    #[test]
    fn does_not_emit_a_false_positive_prefix_byte_by_byte() {
        // Feed "<think>" one byte at a time; nothing should leak before the
        // tag is confirmed complete or broken.
        let mut filter = ThinkTagFilter::new();
        let mut out = String::new();
        for byte in "x<think".chars() {
            out.push_str(&filter.push_str(&byte.to_string()));
        }
        // "<think" alone is a prefix of the opening tag and must stay buffered.
        assert_eq!(out, "x");
        out.push_str(&filter.push_str(">body</think>y"));
        assert_eq!(out, "xy");
    }

    #[test]
    fn unclosed_opening_marker_suppresses_rest_of_stream_on_flush() {
        assert_eq!(run(&["visible <think>never closes"]), "visible ");
    }

    #[test]
    fn flush_emits_a_trailing_partial_prefix_is_not_possible() {
        // Buffer ends up holding plain text that merely resembles nothing in
        // particular; flush must release it rather than discard it.
        assert_eq!(run(&["just some text"]), "just some text");
    }

    #[test]
    fn flush_discards_a_retained_outside_partial_prefix() {
        let mut filter = ThinkTagFilter::new();
        let mut out = String::new();
        out.push_str(&filter.push_str("Start <thi"));
        assert_eq!(out, "Start ");
        assert_eq!(filter.flush_str(), "");
    }

    #[test]
    fn handles_multiple_think_spans_in_sequence() {
        assert_eq!(
            run(&["a<think>one</think>b<think>two</think>c"]),
            "abc"
        );
    }

    #[test]
    fn preserves_text_that_starts_like_a_tag_but_is_not_one() {
        assert_eq!(run(&["<thinking about it> not a tag"]), "<thinking about it> not a tag");
    }
}
