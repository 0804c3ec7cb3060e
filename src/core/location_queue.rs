use crate::domain::model::{LocationKey, SkippedRow};
use crate::utils::error::Result;
use std::collections::HashSet;
use std::io::Read;

/// Ordered, duplicate-free sequence of location keys read from the input.
#[derive(Debug, Clone, Default)]
pub struct LocationQueue {
    keys: Vec<LocationKey>,
    skipped: Vec<SkippedRow>,
    duplicates: usize,
}

impl LocationQueue {
    /// Builds the queue from `(line, fields)` rows, keeping first occurrences only.
    pub fn from_rows<I, R, F>(rows: I) -> Self
    where
        I: IntoIterator<Item = (u64, R)>,
        R: IntoIterator<Item = F>,
        F: AsRef<str>,
    {
        let mut queue = Self::default();
        let mut seen = HashSet::new();

        for (line, row) in rows {
            let fields: Vec<F> = row.into_iter().collect();
            let fields: Vec<&str> = fields.iter().map(|f| f.as_ref()).collect();
            queue.push_row(&mut seen, line, &fields);
        }

        queue
    }

    /// Reads CSV input with a header row: `country,country_code,region,region_code[,city]`.
    pub fn from_csv<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        // 標題列本身讀不到就沒辦法繼續
        csv_reader.headers()?;

        let mut queue = Self::default();
        let mut seen = HashSet::new();
        let mut last_line = 1;

        for result in csv_reader.records() {
            match result {
                Ok(record) => {
                    let line = record.position().map(|p| p.line()).unwrap_or(last_line + 1);
                    last_line = line;
                    let fields: Vec<&str> = record.iter().collect();
                    queue.push_row(&mut seen, line, &fields);
                }
                Err(e) => {
                    // 無法解碼的列（例如非 UTF-8）直接略過
                    let line = e.position().map(|p| p.line()).unwrap_or(last_line + 1);
                    last_line = line;
                    tracing::warn!("⚠️ Skipping unreadable input line {}: {}", line, e);
                    queue.skipped.push(SkippedRow {
                        line,
                        reason: format!("unreadable row: {}", e),
                    });
                }
            }
        }

        Ok(queue)
    }

    fn push_row(&mut self, seen: &mut HashSet<LocationKey>, line: u64, fields: &[&str]) {
        if fields.iter().all(|f| f.trim().is_empty()) {
            return;
        }

        match LocationKey::from_fields(fields) {
            Ok(key) => {
                if seen.insert(key.clone()) {
                    self.keys.push(key);
                } else {
                    tracing::debug!("Duplicate location on line {}: {}", line, key);
                    self.duplicates += 1;
                }
            }
            Err(reason) => {
                tracing::warn!("⚠️ Skipping input line {}: {}", line, reason);
                self.skipped.push(SkippedRow { line, reason });
            }
        }
    }

    pub fn keys(&self) -> &[LocationKey] {
        &self.keys
    }

    pub fn skipped(&self) -> &[SkippedRow] {
        &self.skipped
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
