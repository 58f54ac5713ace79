//! Builders for test uploads.

#![allow(dead_code)]

use csvflow::Record;

/// Builder for CSV upload bytes in the users format.
pub struct CsvBuilder {
    header: String,
    rows: Vec<String>,
}

impl CsvBuilder {
    pub fn new() -> Self {
        Self {
            header: "FirstName,LastName,Age,Email".to_string(),
            rows: Vec::new(),
        }
    }

    /// Replace the header line.
    pub fn header(mut self, header: &str) -> Self {
        self.header = header.to_string();
        self
    }

    /// Append one row verbatim.
    pub fn raw_row(mut self, row: &str) -> Self {
        self.rows.push(row.to_string());
        self
    }

    pub fn record(self, record: &Record) -> Self {
        let row = format!(
            "{},{},{},{}",
            record.first_name, record.last_name, record.age, record.email
        );
        self.raw_row(&row)
    }

    /// Append `count` generated users; `tag` keeps uploads distinct.
    pub fn users(mut self, tag: &str, count: usize) -> Self {
        for record in users(tag, count) {
            self = self.record(&record);
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = self.header.clone();
        out.push('\n');
        for row in &self.rows {
            out.push_str(row);
            out.push('\n');
        }
        out.into_bytes()
    }
}

impl Default for CsvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The records `CsvBuilder::users(tag, count)` writes, in file order.
pub fn users(tag: &str, count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::new(
                format!("{tag}First{i}"),
                format!("{tag}Last{i}"),
                18 + (i % 60) as i64,
                format!("{tag}.user{i}@example.com"),
            )
        })
        .collect()
}
