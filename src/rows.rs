//! Incremental CSV row stream.
//!
//! [`RowStream`] reads one record at a time, drops blank rows, peels off the
//! optional `# header` directive row and the column header, and checks the
//! arity of every data row against the header.

use std::io::Read;

use encoding_rs::Encoding;
use log::debug;

use crate::error::{PopulateError, Result};
use crate::io_utils;

/// First-cell prefix of an explicit type directive row.
pub const HEADER_DIRECTIVE_SENTINEL: &str = "# header";

/// A data row with its 1-based index among non-blank data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub index: usize,
    pub fields: Vec<String>,
}

impl RawRow {
    pub fn field(&self, column: usize) -> &str {
        self.fields.get(column).map(String::as_str).unwrap_or("")
    }
}

/// Header rows consumed before the first data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preamble {
    /// Type tokens of a `# header` row, if the file starts with one.
    pub directive: Option<Vec<String>>,
    pub headers: Vec<String>,
}

pub struct RowStream<R: Read> {
    reader: csv::Reader<R>,
    encoding: &'static Encoding,
    record: csv::ByteRecord,
    width: Option<usize>,
    emitted: usize,
    skipped_blank: usize,
    first_record: bool,
}

impl<R: Read> RowStream<R> {
    pub fn new(reader: csv::Reader<R>, encoding: &'static Encoding) -> Self {
        Self {
            reader,
            encoding,
            record: csv::ByteRecord::new(),
            width: None,
            emitted: 0,
            skipped_blank: 0,
            first_record: true,
        }
    }

    /// Reads the optional directive row and the column header.
    pub fn read_preamble(&mut self) -> Result<Preamble> {
        let first = self.next_non_blank()?.ok_or(PopulateError::EmptyInput)?;
        let (directive, headers) = match directive_tokens(&first) {
            Some(tokens) => {
                debug!("Found header directive: {tokens:?}");
                let headers = self.next_non_blank()?.ok_or(PopulateError::EmptyInput)?;
                (Some(tokens), headers)
            }
            None => (None, first),
        };
        self.width = Some(headers.len());
        Ok(Preamble { directive, headers })
    }

    /// Next data row, or `None` at end of input.
    pub fn next_row(&mut self) -> Result<Option<RawRow>> {
        let Some(fields) = self.next_non_blank()? else {
            return Ok(None);
        };
        self.emitted += 1;
        if let Some(expected) = self.width
            && fields.len() != expected
        {
            return Err(PopulateError::MalformedRow {
                row: self.emitted,
                expected,
                found: fields.len(),
            });
        }
        Ok(Some(RawRow {
            index: self.emitted,
            fields,
        }))
    }

    pub fn rows_read(&self) -> usize {
        self.emitted
    }

    pub fn blank_rows_skipped(&self) -> usize {
        self.skipped_blank
    }

    fn next_non_blank(&mut self) -> Result<Option<Vec<String>>> {
        while self.reader.read_byte_record(&mut self.record)? {
            let mut fields = io_utils::decode_record(&self.record, self.encoding)?;
            if self.first_record {
                io_utils::strip_bom(&mut fields);
                self.first_record = false;
            }
            if is_blank(&fields) {
                self.skipped_blank += 1;
                continue;
            }
            return Ok(Some(fields));
        }
        Ok(None)
    }
}

impl<R: Read> Iterator for RowStream<R> {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

fn is_blank(fields: &[String]) -> bool {
    fields.iter().all(|f| f.trim().is_empty())
}

/// Type tokens carried by a directive row, `None` for ordinary rows.
pub fn directive_tokens(row: &[String]) -> Option<Vec<String>> {
    let first = row.first()?.trim_start();
    let rest = first.strip_prefix(HEADER_DIRECTIVE_SENTINEL)?;
    let mut tokens = Vec::with_capacity(row.len());
    tokens.push(rest.trim().to_string());
    tokens.extend(row[1..].iter().map(|t| t.trim().to_string()));
    Some(tokens)
}
