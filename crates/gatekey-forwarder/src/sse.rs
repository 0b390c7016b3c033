use bytes::Bytes;

/// One decoded `data:` payload; multi-line `data:` fields are joined with `\n`
/// per the SSE spec. `event:` lines are tracked but unused by either upstream
/// family — both speak the data-only SSE dialect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub data: String,
}

/// Incremental line-buffered SSE decoder fed raw bytes off the upstream
/// response body as they arrive.
///
/// Buffers undecoded bytes rather than decoding each chunk in isolation: a
/// TCP read can split a multi-byte UTF-8 sequence (routine for CJK/emoji
/// content in a model's output) across two chunks, and decoding a lone
/// truncated chunk would either drop it or corrupt the following one. `\n`
/// is an ASCII byte that never occurs as part of a UTF-8 continuation or
/// lead byte, so splitting into lines on the raw bytes *before* decoding is
/// always safe, even when a chunk boundary lands mid-codepoint.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
    saw_any_field: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            line_bytes.pop(); // drop the '\n'
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.pop();
            }
            let line = decode_line(line_bytes);
            self.process_line(&line, &mut frames);
        }

        frames
    }

    /// Flushes a trailing, unterminated frame at stream EOF.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if !self.buffer.is_empty() {
            let mut line_bytes = std::mem::take(&mut self.buffer);
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.pop();
            }
            let line = decode_line(line_bytes);
            self.process_line(&line, &mut frames);
        }
        self.finish_frame(&mut frames);
        frames
    }

    fn process_line(&mut self, line: &str, frames: &mut Vec<SseFrame>) {
        if line.is_empty() {
            self.finish_frame(frames);
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            self.data_lines.push(value.trim_start().to_string());
            self.saw_any_field = true;
            return;
        }
        if line == "data" {
            self.data_lines.push(String::new());
            self.saw_any_field = true;
            return;
        }
        // Any other field (event:, id:, retry:) is accepted but ignored.
        self.saw_any_field = true;
    }

    fn finish_frame(&mut self, frames: &mut Vec<SseFrame>) {
        if !self.saw_any_field {
            return;
        }
        frames.push(SseFrame {
            data: self.data_lines.join("\n"),
        });
        self.data_lines.clear();
        self.saw_any_field = false;
    }
}

/// A complete line's bytes are only split from the buffer at `\n` boundaries,
/// which never land inside a UTF-8 sequence, so this should always succeed;
/// `from_utf8_lossy` is a defensive fallback, not the expected path.
fn decode_line(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_frames_on_blank_line() {
        let mut parser = SseParser::new();
        let frames = parser.push_bytes(&Bytes::from_static(
            b"data: {\"a\":1}\n\ndata: {\"a\":2}\n\n",
        ));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert_eq!(frames[1].data, "{\"a\":2}");
    }

    #[test]
    fn joins_multi_line_data_fields() {
        let mut parser = SseParser::new();
        let frames = parser.push_bytes(&Bytes::from_static(b"data: line1\ndata: line2\n\n"));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "line1\nline2");
    }

    #[test]
    fn buffers_across_chunk_boundaries() {
        let mut parser = SseParser::new();
        assert!(parser.push_bytes(&Bytes::from_static(b"data: parti")).is_empty());
        let frames = parser.push_bytes(&Bytes::from_static(b"al\n\n"));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "partial");
    }

    #[test]
    fn finish_flushes_trailing_unterminated_frame() {
        let mut parser = SseParser::new();
        assert!(parser.push_bytes(&Bytes::from_static(b"data: trailing")).is_empty());
        let frames = parser.finish();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "trailing");
    }

    #[test]
    fn done_sentinel_passes_through_as_ordinary_data() {
        let mut parser = SseParser::new();
        let frames = parser.push_bytes(&Bytes::from_static(b"data: [DONE]\n\n"));
        assert_eq!(frames[0].data, "[DONE]");
    }

    #[test]
    fn survives_multibyte_utf8_sequence_split_across_chunks() {
        let mut parser = SseParser::new();
        let full = "data: hi \u{1f642}\n\n".as_bytes().to_vec();
        // Split two bytes before the end, landing inside the 4-byte emoji.
        let split_at = full.len() - 2;
        let (first, second) = full.split_at(split_at);

        assert!(parser.push_bytes(&Bytes::copy_from_slice(first)).is_empty());
        let frames = parser.push_bytes(&Bytes::copy_from_slice(second));

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "hi \u{1f642}");
    }
}
