//! Incremental Server-Sent Events parser.
//!
//! Feeds raw response-body text into a growing buffer and yields complete
//! frames at blank-line boundaries. Fields follow the EventSource wire
//! format: `event:`, `data:` (multi-line, joined with `\n`), and `id:`.

/// One SSE frame. `data` is `None` when the frame carried no data lines at
/// all; such frames still surface so their `id` can be recorded for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: Option<String>,
    pub id: Option<String>,
}

/// Incremental parser; bytes may arrive split at arbitrary chunk boundaries.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text and return any frames completed by it.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.find("\n\n") {
            let block = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);

            if let Some(frame) = Self::parse_block(&block) {
                frames.push(frame);
            }
        }

        frames
    }

    fn parse_block(block: &str) -> Option<SseFrame> {
        let mut event = None;
        let mut id = None;
        let mut data_lines: Vec<String> = Vec::new();
        let mut saw_data = false;

        for line in block.lines() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.starts_with(':') {
                continue;
            }

            if let Some((field, value)) = line.split_once(':') {
                let value = value.strip_prefix(' ').unwrap_or(value);
                match field {
                    "event" => event = Some(value.to_string()),
                    "data" => {
                        saw_data = true;
                        data_lines.push(value.to_string());
                    }
                    "id" => id = Some(value.to_string()),
                    _ => {}
                }
            } else if line == "data" {
                saw_data = true;
                data_lines.push(String::new());
            }
        }

        if event.is_none() && id.is_none() && !saw_data {
            return None;
        }

        Some(SseFrame {
            event,
            data: saw_data.then(|| data_lines.join("\n")),
            id,
        })
    }
}
