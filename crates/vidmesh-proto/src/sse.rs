//! Server-Sent-Events text framing.
//!
//! All three push channels (chunks, catalog snapshots, connectivity tokens)
//! and the catalog-refresh response body use the same `data: <payload>` line
//! framing.  `SseDecoder` is incremental — network reads may split a frame at
//! any byte — while [`parse_records`] handles a complete response body.

/// Incremental decoder for an SSE byte stream.
///
/// Feed it raw network chunks; it yields the `data` payload of each complete
/// event.  Multi-line `data:` fields within one event are joined with `\n`
/// per the SSE spec.  Comment lines (`:`) and unknown fields are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume raw bytes, returning the payloads of every event completed by
    /// this read, in wire order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..pos]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                // Blank line terminates the event
                if !self.data_lines.is_empty() {
                    out.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines
                    .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
            // `event:`, `id:`, `retry:` and comments are irrelevant here
        }

        out
    }

    /// Flush a trailing event that was never terminated by a blank line.
    /// Call when the stream closes.
    pub fn finish(&mut self) -> Option<String> {
        // A dangling partial line still counts as data if prefixed correctly
        if !self.buf.is_empty() {
            let line = String::from_utf8_lossy(&std::mem::take(&mut self.buf)).to_string();
            if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines
                    .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
        if self.data_lines.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data_lines).join("\n"))
        }
    }
}

/// Extract the `data:` payloads from a complete SSE response body.
///
/// Used for the catalog-refresh response: each record is one payload.  A body
/// with no `data:` lines yields an empty list, which is an empty catalog and
/// not an error.
pub fn parse_records(body: &str) -> Vec<String> {
    let mut decoder = SseDecoder::new();
    let mut records = decoder.feed(body.as_bytes());
    if let Some(last) = decoder.finish() {
        records.push(last);
    }
    records
}
