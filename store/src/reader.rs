use crate::csv_rows::{decode_record, quotes_balanced};
use crate::error::StoreError;
use bytes::Bytes;
use object_store::ObjectStore;
use object_store::path::Path;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::debug;

const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug)]
pub struct ReaderOptions {
    /// Bytes fetched per ranged request.
    pub chunk_size: usize,
    /// Upper bound on the characters of line data handed out. `None` reads everything.
    pub max_read_size: Option<usize>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_read_size: None,
        }
    }
}

impl ReaderOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_max_read_size(mut self, max_read_size: usize) -> Self {
        self.max_read_size = Some(max_read_size);
        self
    }
}

/// Forward-only reader over one stored object.
pub struct Reader {
    store: Arc<dyn ObjectStore>,
    location: Path,
    size: usize,
    offset: usize,
    options: ReaderOptions,
    // Bytes of a UTF-8 sequence cut by the chunk boundary
    carry: Vec<u8>,
    pending: String,
    lines: VecDeque<String>,
    consumed_chars: usize,
    exhausted: bool,
    truncated: bool,
}

impl Reader {
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        key: &str,
        options: ReaderOptions,
    ) -> Result<Self, StoreError> {
        let location = Path::from(key);
        let meta = match store.head(&location).await {
            Ok(meta) => meta,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StoreError::NotFound(key.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            store,
            location,
            size: meta.size,
            offset: 0,
            options,
            carry: Vec::new(),
            pending: String::new(),
            lines: VecDeque::new(),
            consumed_chars: 0,
            exhausted: false,
            truncated: false,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the object was cut off at `max_read_size`.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    fn retry_strategy() -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(20).map(jitter).take(3)
    }

    fn is_transient(err: &object_store::Error) -> bool {
        matches!(err, object_store::Error::Generic { .. })
    }

    /// Fetch the next raw chunk of at most `chunk_size` bytes. Empty at end of object.
    pub async fn read(&mut self) -> Result<Bytes, StoreError> {
        if self.offset >= self.size {
            return Ok(Bytes::new());
        }
        let end = (self.offset + self.options.chunk_size).min(self.size);
        let range = self.offset..end;

        let store = &self.store;
        let location = &self.location;
        let chunk = RetryIf::spawn(
            Self::retry_strategy(),
            || store.get_range(location, range.clone()),
            Self::is_transient,
        )
        .await?;

        self.offset += chunk.len();
        Ok(chunk)
    }

    fn push_text(&mut self, text: &str) {
        for piece in text.split_inclusive('\n') {
            match piece.strip_suffix('\n') {
                Some(line) => {
                    self.pending.push_str(line);
                    self.lines.push_back(std::mem::take(&mut self.pending));
                }
                None => self.pending.push_str(piece),
            }
        }
    }

    fn truncate(&mut self) {
        debug!(
            "Truncating {} after {} characters",
            self.location, self.consumed_chars
        );
        self.pending.clear();
        self.carry.clear();
        self.truncated = true;
        self.exhausted = true;
    }

    async fn fill(&mut self) -> Result<(), StoreError> {
        if let Some(max) = self.options.max_read_size {
            if self.consumed_chars >= max && self.offset < self.size {
                self.truncate();
                return Ok(());
            }
        }

        let chunk = self.read().await?;
        if chunk.is_empty() {
            self.exhausted = true;
            if !self.carry.is_empty() {
                let tail = String::from_utf8_lossy(&std::mem::take(&mut self.carry)).into_owned();
                self.pending.push_str(&tail);
            }
            if !self.pending.is_empty() {
                self.lines.push_back(std::mem::take(&mut self.pending));
            }
            return Ok(());
        }

        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(&chunk);
        let cut = incomplete_tail_start(&bytes);
        self.carry = bytes.split_off(cut);
        let mut text = String::from_utf8_lossy(&bytes).into_owned();

        let chars = text.chars().count();
        if let Some(max) = self.options.max_read_size {
            let budget = max.saturating_sub(self.consumed_chars);
            if chars > budget {
                let end = text
                    .char_indices()
                    .nth(budget)
                    .map_or(text.len(), |(idx, _)| idx);
                text.truncate(end);
                self.consumed_chars += budget;
                self.push_text(&text);
                self.truncate();
                return Ok(());
            }
        }
        self.consumed_chars += chars;
        self.push_text(&text);
        Ok(())
    }

    /// Next line without its terminator, or `None` once the object (or the read budget) is exhausted.
    pub async fn read_line(&mut self) -> Result<Option<String>, StoreError> {
        let mut line = self.read_raw_line().await?;
        if let Some(line) = line.as_mut() {
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(line)
    }

    /// Next line with only the `\n` removed. A `\r` before it is part of the line.
    async fn read_raw_line(&mut self) -> Result<Option<String>, StoreError> {
        loop {
            if let Some(line) = self.lines.pop_front() {
                return Ok(Some(line));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fill().await?;
        }
    }

    pub async fn read_lines(&mut self, n: usize) -> Result<Vec<String>, StoreError> {
        let mut lines = Vec::with_capacity(n.min(1024));
        while lines.len() < n {
            match self.read_line().await? {
                Some(line) => lines.push(line),
                None => break,
            }
        }
        Ok(lines)
    }

    /// Iterate CSV records, re-joining records whose quoted fields span several lines.
    pub fn get_csv_iter(&mut self, max_rows: Option<usize>) -> CsvRecords<'_> {
        CsvRecords {
            reader: self,
            remaining: max_rows,
        }
    }

    pub async fn read_csv(
        &mut self,
        max_rows: Option<usize>,
    ) -> Result<Vec<Vec<String>>, StoreError> {
        let mut records = self.get_csv_iter(max_rows);
        let mut rows = Vec::new();
        while let Some(row) = records.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Start of a trailing UTF-8 sequence that needs bytes from the next chunk, or `bytes.len()`.
fn incomplete_tail_start(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}

pub struct CsvRecords<'a> {
    reader: &'a mut Reader,
    remaining: Option<usize>,
}

impl CsvRecords<'_> {
    fn take_one(&mut self) {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
    }

    pub async fn next(&mut self) -> Result<Option<Vec<String>>, StoreError> {
        if self.remaining == Some(0) {
            return Ok(None);
        }

        let mut record = String::new();
        let mut started = false;
        loop {
            match self.reader.read_raw_line().await? {
                Some(line) => {
                    if started {
                        record.push('\n');
                    }
                    record.push_str(&line);
                    started = true;
                    if !quotes_balanced(&record) {
                        continue;
                    }
                    if let Some(row) = decode_record(&record)? {
                        self.take_one();
                        return Ok(Some(row));
                    }
                    // Blank line between records
                    record.clear();
                    started = false;
                }
                None if started && !self.reader.is_truncated() => {
                    let row = decode_record(&record)?;
                    if row.is_some() {
                        self.take_one();
                    }
                    return Ok(row);
                }
                None => return Ok(None),
            }
        }
    }
}
