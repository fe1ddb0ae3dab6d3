//! Incremental `<thinking>` tag parser
//!
//! Some providers inline their reasoning into the text stream as
//! `<thinking>...</thinking>` followed by the visible answer. The closing
//! marker only ends reasoning when it is followed by a blank line, or when
//! it is the very last thing in the stream. A marker inside a backtick span
//! on a single line, or followed by anything else, is part of the reasoning
//! text. A lone backtick with no partner later on the line quotes nothing.

const OPEN: &str = "<thinking>";
const CLOSE: &str = "</thinking>";
const SEPARATORS: [&str; 2] = ["\n\n", "\r\n\r\n"];

/// Kind of a parsed span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Content inside a reasoning block
    Thinking,
    /// Visible answer text
    Text,
}

/// A resolved span of the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub content: String,
}

impl Segment {
    pub fn thinking(content: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Thinking,
            content: content.into(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Text,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Outside a reasoning block, looking for the opening marker
    Visible,
    /// Inside a reasoning block
    Reasoning {
        /// Bytes of the pending buffer already known not to close the block
        scanned: usize,
    },
}

/// What a closing marker candidate turned out to be
enum Closing {
    /// Real delimiter; the number of separator bytes to consume after it
    Delimiter(usize),
    /// Followed by other text
    Literal,
    /// Not enough input yet to tell
    Undecided,
}

/// Streaming splitter of reasoning and visible text
#[derive(Debug, Clone)]
pub struct ThinkingTagParser {
    pending: String,
    mode: Mode,
}

impl Default for ThinkingTagParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ThinkingTagParser {
    pub const fn new() -> Self {
        Self {
            pending: String::new(),
            mode: Mode::Visible,
        }
    }

    /// Whether the parser is inside an unterminated reasoning block
    pub const fn in_reasoning(&self) -> bool {
        matches!(self.mode, Mode::Reasoning { .. })
    }

    /// Append text and return every segment that can no longer change
    pub fn feed(&mut self, text: &str) -> Vec<Segment> {
        self.pending.push_str(text);
        self.drain(false)
    }

    /// Resolve whatever is left at end of stream
    pub fn finish(&mut self) -> Vec<Segment> {
        let segments = self.drain(true);
        self.mode = Mode::Visible;
        segments
    }

    /// Parse a complete text in one go
    pub fn parse_complete(text: &str) -> Vec<Segment> {
        let mut parser = Self::new();
        let mut segments = parser.feed(text);
        segments.extend(parser.finish());
        segments
    }

    fn drain(&mut self, at_end: bool) -> Vec<Segment> {
        let mut segments = Vec::new();

        loop {
            let progressed = match self.mode {
                Mode::Visible => self.drain_visible(at_end, &mut segments),
                Mode::Reasoning { scanned } => self.drain_reasoning(scanned, at_end, &mut segments),
            };

            if !progressed {
                return segments;
            }
        }
    }

    /// Returns true when an opening marker switched the parser into reasoning
    fn drain_visible(&mut self, at_end: bool, segments: &mut Vec<Segment>) -> bool {
        if let Some(start) = self.pending.find(OPEN) {
            if start > 0 {
                segments.push(Segment::text(&self.pending[..start]));
            }
            self.pending.drain(..start + OPEN.len());
            self.mode = Mode::Reasoning { scanned: 0 };
            return true;
        }

        let held = if at_end { 0 } else { partial_marker_len(&self.pending, OPEN) };
        let release = self.pending.len() - held;
        if release > 0 {
            segments.push(Segment::text(&self.pending[..release]));
            self.pending.drain(..release);
        }

        false
    }

    /// Returns true when a closing delimiter switched the parser back to visible text
    fn drain_reasoning(&mut self, mut pos: usize, at_end: bool, segments: &mut Vec<Segment>) -> bool {
        let bytes = self.pending.as_bytes();

        while pos < bytes.len() {
            if bytes[pos] != b'<' {
                pos += 1;
                continue;
            }

            let rest = &bytes[pos..];
            if rest.len() < CLOSE.len() && CLOSE.as_bytes().starts_with(rest) && !at_end {
                self.mode = Mode::Reasoning { scanned: pos };
                return false;
            }

            if !rest.starts_with(CLOSE.as_bytes()) {
                pos += 1;
                continue;
            }

            let after = &self.pending[pos + CLOSE.len()..];
            let closing = if opens_backtick_span(&self.pending[..pos]) {
                match quote_closes(after, at_end) {
                    Some(true) => Closing::Literal,
                    Some(false) => classify_closing(after, at_end),
                    None => Closing::Undecided,
                }
            } else {
                classify_closing(after, at_end)
            };

            match closing {
                Closing::Delimiter(separator) => {
                    segments.push(Segment::thinking(&self.pending[..pos]));
                    self.pending.drain(..pos + CLOSE.len() + separator);
                    self.mode = Mode::Visible;
                    return true;
                }
                Closing::Undecided => {
                    self.mode = Mode::Reasoning { scanned: pos };
                    return false;
                }
                Closing::Literal => pos += CLOSE.len(),
            }
        }

        if at_end {
            segments.push(Segment::thinking(std::mem::take(&mut self.pending)));
            self.mode = Mode::Visible;
        } else {
            self.mode = Mode::Reasoning { scanned: pos };
        }

        false
    }
}

/// Whether the current line of `before` leaves a backtick span open
fn opens_backtick_span(before: &str) -> bool {
    let line = before.rsplit('\n').next().unwrap_or_default();
    line.bytes().filter(|byte| *byte == b'`').count() % 2 == 1
}

/// Whether a closing backtick follows on the same line
///
/// `None` while neither a backtick nor a line break has arrived yet.
fn quote_closes(after: &str, at_end: bool) -> Option<bool> {
    match after.bytes().find(|byte| matches!(byte, b'`' | b'\n')) {
        Some(byte) => Some(byte == b'`'),
        None if at_end => Some(false),
        None => None,
    }
}

fn classify_closing(after: &str, at_end: bool) -> Closing {
    if let Some(separator) = SEPARATORS.iter().find(|separator| after.starts_with(**separator)) {
        return Closing::Delimiter(separator.len());
    }

    let could_become_separator = SEPARATORS.iter().any(|separator| separator.starts_with(after));

    match (could_become_separator, at_end) {
        // Only line breaks (or nothing) follow the marker at end of stream
        (true, true) => Closing::Delimiter(after.len()),
        (true, false) => Closing::Undecided,
        (false, _) => Closing::Literal,
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `marker`
fn partial_marker_len(text: &str, marker: &str) -> usize {
    (1..marker.len())
        .rev()
        .find(|len| text.ends_with(&marker[..*len]))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rebuild(segments: &[Segment]) -> String {
        segments.iter().map(|segment| segment.content.as_str()).collect()
    }

    #[test]
    fn thinking_then_blank_line_then_text() {
        let segments = ThinkingTagParser::parse_complete("<thinking>a</thinking>\n\nhello");
        assert_eq!(segments, vec![Segment::thinking("a"), Segment::text("hello")]);
    }

    #[test]
    fn quoted_marker_stays_inside_reasoning() {
        let segments = ThinkingTagParser::parse_complete("<thinking>about `</thinking>` tag</thinking>\n\nhi");
        assert_eq!(
            segments,
            vec![Segment::thinking("about `</thinking>` tag"), Segment::text("hi")]
        );
    }

    #[test]
    fn lone_backtick_does_not_quote_the_delimiter() {
        let segments = ThinkingTagParser::parse_complete("<thinking>press the ` key</thinking>\n\nThe answer is 4.");
        assert_eq!(
            segments,
            vec![Segment::thinking("press the ` key"), Segment::text("The answer is 4.")]
        );
    }

    #[test]
    fn lone_backtick_streamed_byte_at_a_time() {
        let input = "<thinking>press the ` key</thinking>\n\nok";
        let mut parser = ThinkingTagParser::new();
        let mut streamed = Vec::new();
        for ch in input.chars() {
            streamed.extend(parser.feed(&ch.to_string()));
        }
        streamed.extend(parser.finish());

        assert_eq!(streamed.first(), Some(&Segment::thinking("press the ` key")));
        assert_eq!(rebuild(&streamed[1..]), "ok");
    }

    #[test]
    fn marker_followed_by_text_is_literal() {
        let segments = ThinkingTagParser::parse_complete("<thinking>a</thinking>hello");
        assert_eq!(segments, vec![Segment::thinking("a</thinking>hello")]);
    }

    #[test]
    fn marker_at_end_of_buffer_closes() {
        let segments = ThinkingTagParser::parse_complete("<thinking>a</thinking>");
        assert_eq!(segments, vec![Segment::thinking("a")]);
    }

    #[test]
    fn crlf_blank_line_is_a_separator() {
        let segments = ThinkingTagParser::parse_complete("<thinking>a</thinking>\r\n\r\nb");
        assert_eq!(segments, vec![Segment::thinking("a"), Segment::text("b")]);
    }

    #[test]
    fn plain_text_is_one_visible_segment() {
        let segments = ThinkingTagParser::parse_complete("just an answer");
        assert_eq!(segments, vec![Segment::text("just an answer")]);
    }

    #[test]
    fn text_before_opening_marker_is_visible() {
        let segments = ThinkingTagParser::parse_complete("intro <thinking>x</thinking>\n\nrest");
        assert_eq!(
            segments,
            vec![Segment::text("intro "), Segment::thinking("x"), Segment::text("rest")]
        );
    }

    #[test]
    fn unterminated_reasoning_is_held_until_finish() {
        let mut parser = ThinkingTagParser::new();
        assert!(parser.feed("<thinking>still going").is_empty());
        assert!(parser.in_reasoning());
        assert_eq!(parser.finish(), vec![Segment::thinking("still going")]);
    }

    #[test]
    fn split_opening_marker_is_held_back() {
        let mut parser = ThinkingTagParser::new();
        assert_eq!(parser.feed("hi <thi"), vec![Segment::text("hi ")]);
        assert!(parser.feed("nking>r").is_empty());
        assert!(parser.feed("</think").is_empty());
        assert!(parser.feed("ing>\n").is_empty());
        assert_eq!(parser.feed("\nout"), vec![Segment::thinking("r"), Segment::text("out")]);
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn visible_text_is_released_eagerly() {
        let mut parser = ThinkingTagParser::new();
        assert_eq!(parser.feed("hello"), vec![Segment::text("hello")]);
        assert_eq!(parser.feed(" world <"), vec![Segment::text(" world ")]);
        assert_eq!(parser.finish(), vec![Segment::text("<")]);
    }

    #[test]
    fn byte_at_a_time_matches_whole_parse() {
        let input = "pre<thinking>a `</thinking>` b</thinking>x</thinking>\n\npost <b>";
        let whole = ThinkingTagParser::parse_complete(input);

        let mut parser = ThinkingTagParser::new();
        let mut streamed = Vec::new();
        for ch in input.chars() {
            streamed.extend(parser.feed(&ch.to_string()));
        }
        streamed.extend(parser.finish());

        let merge = |segments: Vec<Segment>| {
            segments.into_iter().fold(Vec::<Segment>::new(), |mut acc, segment| {
                match acc.last_mut() {
                    Some(last) if last.kind == segment.kind => last.content.push_str(&segment.content),
                    _ => acc.push(segment),
                }
                acc
            })
        };

        assert_eq!(merge(streamed), merge(whole.clone()));
        assert_eq!(
            whole,
            vec![
                Segment::text("pre"),
                Segment::thinking("a `</thinking>` b</thinking>x"),
                Segment::text("post <b>"),
            ]
        );
    }

    #[test]
    fn segments_partition_the_source() {
        let input = "A<thinking>b</thinking>c</thinking>\n\nd";
        let segments = ThinkingTagParser::parse_complete(input);
        assert_eq!(
            segments,
            vec![Segment::text("A"), Segment::thinking("b</thinking>c"), Segment::text("d")]
        );

        let without_markers = input.replacen(OPEN, "", 1).replacen("</thinking>\n\n", "", 1);
        assert_eq!(rebuild(&segments), without_markers);
    }
}
