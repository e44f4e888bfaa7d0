use crate::error::StoreError;

/// Encode one CSV record terminated by `\n`.
pub fn encode_record<I, T>(fields: I) -> Result<Vec<u8>, StoreError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|e| StoreError::Csv(e.into_error().into()))
}

/// Parse the single record contained in `text`. Blank input holds no record.
pub(crate) fn decode_record(text: &str) -> Result<Option<Vec<String>>, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    match reader.records().next() {
        Some(record) => Ok(Some(record?.iter().map(str::to_owned).collect())),
        None => Ok(None),
    }
}

/// Whether `text` closes every quote it opens. Escaped quotes (`""`) keep the parity.
pub(crate) fn quotes_balanced(text: &str) -> bool {
    text.bytes().filter(|b| *b == b'"').count() % 2 == 0
}
