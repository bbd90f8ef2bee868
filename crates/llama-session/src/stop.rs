//! Stop markers and the generated-text accumulator.
//!
//! Prompts are chat transcripts, so a model may run on into a simulated
//! next turn. Two marker lists guard against that:
//!
//! * [`STOP_MARKERS`] are checked after every token and end generation.
//! * [`SANITIZE_MARKERS`] are applied once to the whole output and also
//!   catch the bare `<|` opener of any special marker.

/// Markers that end generation as soon as they appear.
pub const STOP_MARKERS: &[&str] = &[
    "<|eot_id|>",
    "<|start_header_id|>",
    "User:",
    "user:",
    "Assistant:",
    "assistant:",
];

/// Markers the final text is truncated at.
pub const SANITIZE_MARKERS: &[&str] = &[
    "<|eot_id|>",
    "<|start_header_id|>",
    "User:",
    "user:",
    "Assistant:",
    "assistant:",
    "<|",
];

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn longest(markers: &[&str]) -> usize {
    markers.iter().map(|m| m.len()).max().unwrap_or(0)
}

/// First stop marker in the part of `text` that could involve bytes at or
/// after `from`.
pub fn find_stop_marker(text: &[u8], from: usize) -> Option<&'static str> {
    let start = from.saturating_sub(longest(STOP_MARKERS) - 1);
    let window = &text[start.min(text.len())..];
    STOP_MARKERS
        .iter()
        .filter_map(|m| find(window, m.as_bytes()).map(|at| (at, *m)))
        .min_by_key(|(at, _)| *at)
        .map(|(_, m)| m)
}

/// Byte offset of the earliest sanitization marker, or `text.len()`.
pub fn sanitize_cut(text: &[u8]) -> usize {
    SANITIZE_MARKERS
        .iter()
        .filter_map(|m| find(text, m.as_bytes()))
        .min()
        .unwrap_or(text.len())
}

/// Truncate `text` at its earliest sanitization marker.
pub fn sanitize(text: &str) -> &str {
    &text[..sanitize_cut(text.as_bytes())]
}

/// Length of the longest suffix of `text` that is a proper prefix of some
/// marker, i.e. bytes that may still turn into a marker.
fn partial_marker_len(text: &[u8]) -> usize {
    let max = longest(SANITIZE_MARKERS).min(text.len() + 1);
    (1..max)
        .rev()
        .find(|&n| {
            let tail = &text[text.len() - n..];
            SANITIZE_MARKERS
                .iter()
                .any(|m| m.len() > n && m.as_bytes().starts_with(tail))
        })
        .unwrap_or(0)
}

/// End of the longest prefix of `text` that does not stop inside a UTF-8
/// sequence. Invalid bytes count as complete (they decode to U+FFFD).
fn complete_utf8_len(text: &[u8]) -> usize {
    let mut at = 0;
    loop {
        match std::str::from_utf8(&text[at..]) {
            Ok(_) => return text.len(),
            Err(e) => match e.error_len() {
                Some(bad) => at += e.valid_up_to() + bad,
                None => return at + e.valid_up_to(),
            },
        }
    }
}

/// Outcome of [`Accumulator::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Append {
    /// Keep going; deliver the text, if any, to the caller.
    Continue(Option<String>),
    /// A stop marker appeared; nothing from this piece is delivered.
    Stop(&'static str),
}

/// Append-only buffer of generated bytes.
///
/// Tracks how much has been handed to the caller. Text is released only
/// once it is complete UTF-8, cannot still grow into a marker, and lies
/// before any sanitization marker, so the delivered text is always a
/// prefix of [`Accumulator::final_text`].
///
/// Markers match anywhere, including mid-word, so a piece ending in `<`,
/// `u`, `U`, `a` or `A` keeps that tail back until the next piece rules the
/// marker out. The lag is at most one piece and at most
/// `longest marker - 1` bytes. Anything still held when generation ends
/// naturally is flushed by the caller through [`Accumulator::unreleased`].
#[derive(Debug, Default)]
pub struct Accumulator {
    bytes: Vec<u8>,
    released_bytes: usize,
    released_text: usize,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn push(&mut self, piece: &[u8]) -> Append {
        let from = self.bytes.len();
        self.bytes.extend_from_slice(piece);

        if let Some(marker) = find_stop_marker(&self.bytes, from) {
            return Append::Stop(marker);
        }
        Append::Continue(self.release())
    }

    fn release(&mut self) -> Option<String> {
        let cut = sanitize_cut(&self.bytes);
        let mut end = cut;
        if cut == self.bytes.len() {
            end -= partial_marker_len(&self.bytes);
        }
        let end = complete_utf8_len(&self.bytes[..end]);
        if end <= self.released_bytes {
            return None;
        }

        let text = String::from_utf8_lossy(&self.bytes[self.released_bytes..end]).into_owned();
        self.released_bytes = end;
        self.released_text += text.len();
        Some(text)
    }

    /// Whole output truncated at the earliest sanitization marker.
    pub fn final_text(&self) -> String {
        let cut = sanitize_cut(&self.bytes);
        String::from_utf8_lossy(&self.bytes[..cut]).into_owned()
    }

    /// The part of `final_text` not yet delivered.
    pub fn unreleased<'a>(&self, final_text: &'a str) -> &'a str {
        final_text.get(self.released_text..).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn released(acc: &mut Accumulator, pieces: &[&str]) -> (Vec<String>, Option<&'static str>) {
        let mut out = Vec::new();
        for p in pieces {
            match acc.push(p.as_bytes()) {
                Append::Continue(Some(t)) => out.push(t),
                Append::Continue(None) => {}
                Append::Stop(m) => return (out, Some(m)),
            }
        }
        (out, None)
    }

    #[test]
    fn marker_in_new_piece_stops() {
        let mut acc = Accumulator::new();
        let (out, stop) = released(&mut acc, &["Hello", " there", "<|eot_id|>", "ignored"]);
        assert_eq!(out, vec!["Hello", " there"]);
        assert_eq!(stop, Some("<|eot_id|>"));
        assert_eq!(acc.final_text(), "Hello there");
    }

    #[test]
    fn marker_split_across_pieces_is_detected() {
        let mut acc = Accumulator::new();
        let (out, stop) = released(&mut acc, &["Sure.\n", "Us", "er", ": next"]);
        assert_eq!(stop, Some("User:"));
        assert_eq!(out.concat(), "Sure.\n");
        assert_eq!(acc.final_text(), "Sure.\n");
    }

    #[test]
    fn possible_marker_prefix_is_held_back() {
        let mut acc = Accumulator::new();
        assert_eq!(acc.push(b"Hi <"), Append::Continue(Some("Hi ".into())));
        assert_eq!(acc.push(b"3"), Append::Continue(Some("<3".into())));
    }

    #[test]
    fn bare_opener_truncates_only_at_the_end() {
        let mut acc = Accumulator::new();
        let (out, stop) = released(&mut acc, &["a", "<|im_end|>", "b"]);
        assert_eq!(stop, None);
        assert_eq!(out.concat(), "a");
        assert_eq!(acc.final_text(), "a");
        assert_eq!(acc.unreleased(&acc.final_text()), "");
    }

    #[test]
    fn held_tail_is_released_by_the_next_piece() {
        let mut acc = Accumulator::new();
        let (out, stop) = released(&mut acc, &["The data", " is", " a", " tuple"]);
        assert_eq!(stop, None);
        assert_eq!(out, vec!["The dat", "a is", " ", "a tuple"]);
        assert_eq!(acc.unreleased(&acc.final_text()), "");
    }

    #[test]
    fn mid_word_marker_start_cannot_be_released_early() {
        // "data" + "ssistant:" contains "assistant:" starting at the last "a".
        let mut acc = Accumulator::new();
        let (out, stop) = released(&mut acc, &["The data", "ssistant: next"]);
        assert_eq!(stop, Some("assistant:"));
        assert_eq!(out.concat(), "The dat");
        assert_eq!(acc.final_text(), "The dat");
    }

    #[test]
    fn multibyte_character_split_across_tokens() {
        let mut acc = Accumulator::new();
        let snowman = "☃".as_bytes();
        assert_eq!(acc.push(&snowman[..1]), Append::Continue(None));
        assert_eq!(acc.push(&snowman[1..2]), Append::Continue(None));
        assert_eq!(acc.push(&snowman[2..]), Append::Continue(Some("☃".into())));
        assert_eq!(acc.final_text(), "☃");
    }

    #[test]
    fn invalid_bytes_do_not_block_release() {
        let mut acc = Accumulator::new();
        assert_eq!(
            acc.push(&[b'a', 0xFF, b'b']),
            Append::Continue(Some("a\u{FFFD}b".into()))
        );
    }

    #[test]
    fn unreleased_tail_is_flushable() {
        let mut acc = Accumulator::new();
        let (out, _) = released(&mut acc, &["done. U"]);
        assert_eq!(out.concat(), "done. ");
        let text = acc.final_text();
        assert_eq!(acc.unreleased(&text), "U");
    }

    #[test]
    fn lowercase_role_markers() {
        assert_eq!(find_stop_marker(b"ok assistant: hi", 0), Some("assistant:"));
        assert_eq!(find_stop_marker(b"ok user: hi", 0), Some("user:"));
        assert_eq!(find_stop_marker(b"no markers", 0), None);
    }

    #[test]
    fn incremental_window_only_covers_new_bytes() {
        let text = b"User: old turn, fresh text";
        assert_eq!(find_stop_marker(text, text.len() - 4), None);
    }

    #[test]
    fn sanitize_cuts_at_earliest_marker() {
        assert_eq!(sanitize("x Assistant: y User: z"), "x ");
        assert_eq!(sanitize("plain"), "plain");
        assert_eq!(sanitize("a<|start_header_id|>b"), "a");
    }
}
