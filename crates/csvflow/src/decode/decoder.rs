use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};

use super::{DecodeError, Record};

/// Header names every upload must carry. Column order is free.
pub const REQUIRED_COLUMNS: [&str; 4] = ["FirstName", "LastName", "Age", "Email"];

/// Character encoding the uploaded bytes are declared to be in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "latin-1", alias = "latin1", alias = "iso-8859-1")]
    Latin1,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Latin1 => "latin-1",
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy)]
struct ColumnIndex {
    first_name: usize,
    last_name: usize,
    age: usize,
    email: usize,
}

impl ColumnIndex {
    fn resolve(headers: &StringRecord) -> Result<Self, DecodeError> {
        let position = |name: &'static str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or(DecodeError::MissingColumn(name))
        };

        Ok(Self {
            first_name: position("FirstName")?,
            last_name: position("LastName")?,
            age: position("Age")?,
            email: position("Email")?,
        })
    }

    fn extract(&self, record: &StringRecord, row: usize) -> Result<Record, DecodeError> {
        let field = |idx: usize, column: &'static str| {
            record
                .get(idx)
                .filter(|v| !v.trim().is_empty())
                .ok_or(DecodeError::MissingField { row, column })
        };

        let raw_age = field(self.age, "Age")?;
        let age = raw_age
            .trim()
            .parse::<i64>()
            .map_err(|_| DecodeError::InvalidAge {
                row,
                value: raw_age.to_string(),
            })?;

        Ok(Record {
            first_name: field(self.first_name, "FirstName")?.to_string(),
            last_name: field(self.last_name, "LastName")?.to_string(),
            age,
            email: field(self.email, "Email")?.to_string(),
        })
    }
}

/// Owns the decoded text of one upload and hands out fresh record
/// iterators over it, so the same file can be scanned more than once.
#[derive(Debug)]
pub struct Decoder {
    text: String,
    columns: ColumnIndex,
}

impl Decoder {
    /// Decodes `bytes` with the declared encoding and resolves the required
    /// header columns. Row-level problems are reported lazily by [`records`].
    ///
    /// [`records`]: Decoder::records
    pub fn new(bytes: Vec<u8>, encoding: Encoding) -> Result<Self, DecodeError> {
        let text = decode_text(bytes, encoding)?;
        let columns = {
            let mut reader = reader_for(&text);
            ColumnIndex::resolve(reader.headers()?)?
        };

        Ok(Self { text, columns })
    }

    /// Starts a new pass over the rows, from the first data row.
    pub fn records(&self) -> Records<'_> {
        Records {
            reader: reader_for(&self.text),
            columns: self.columns,
            record: StringRecord::new(),
            row: 0,
            done: false,
        }
    }

    /// Validating pass: coerces every row and returns how many there are.
    pub fn count(&self) -> Result<usize, DecodeError> {
        let mut rows = 0;
        for record in self.records() {
            record?;
            rows += 1;
        }
        Ok(rows)
    }
}

fn reader_for(text: &str) -> csv::Reader<&[u8]> {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(text.as_bytes())
}

fn decode_text(bytes: Vec<u8>, encoding: Encoding) -> Result<String, DecodeError> {
    match encoding {
        Encoding::Utf8 => {
            let mut text = String::from_utf8(bytes).map_err(|e| DecodeError::Encoding {
                encoding: encoding.name(),
                reason: e.utf8_error().to_string(),
            })?;
            if text.starts_with('\u{feff}') {
                text.drain(..'\u{feff}'.len_utf8());
            }
            Ok(text)
        }
        // Every byte maps to the code point of the same value.
        Encoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
    }
}

/// Lazy iterator over one pass of a [`Decoder`]. Stops after the first error.
pub struct Records<'a> {
    reader: csv::Reader<&'a [u8]>,
    columns: ColumnIndex,
    record: StringRecord,
    row: usize,
    done: bool,
}

impl Iterator for Records<'_> {
    type Item = Result<Record, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.reader.read_record(&mut self.record) {
            Ok(true) => {
                self.row += 1;
                let result = self.columns.extract(&self.record, self.row);
                self.done = result.is_err();
                Some(result)
            }
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(csv: &str) -> Decoder {
        Decoder::new(csv.as_bytes().to_vec(), Encoding::Utf8).unwrap()
    }

    #[test]
    fn test_decodes_rows_in_any_column_order() {
        let d = decoder("Email,Age,LastName,FirstName\nada@example.com,36,Lovelace,Ada\n");
        let records: Vec<Record> = d.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(
            records,
            vec![Record::new("Ada", "Lovelace", 36, "ada@example.com")]
        );
    }

    #[test]
    fn test_extra_columns_are_ignored() {
        let d = decoder("FirstName,LastName,Age,Email,Notes\nAlan,Turing,41,alan@example.com,x\n");
        assert_eq!(d.count().unwrap(), 1);
    }

    #[test]
    fn test_missing_column_is_rejected_up_front() {
        let err = Decoder::new(b"FirstName,LastName,Email\nA,B,c@d\n".to_vec(), Encoding::Utf8)
            .unwrap_err();
        assert!(matches!(err, DecodeError::MissingColumn("Age")));
    }

    #[test]
    fn test_invalid_age_reports_row() {
        let d = decoder("FirstName,LastName,Age,Email\nA,B,1,a@b\nC,D,old,c@d\n");
        let err = d.count().unwrap_err();
        match err {
            DecodeError::InvalidAge { row, value } => {
                assert_eq!(row, 2);
                assert_eq!(value, "old");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_short_row_is_missing_field() {
        let d = decoder("FirstName,LastName,Age,Email\nA,B,30\n");
        let err = d.records().next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MissingField {
                row: 1,
                column: "Email"
            }
        ));
    }

    #[test]
    fn test_iteration_stops_after_error() {
        let d = decoder("FirstName,LastName,Age,Email\nA,B,x,a@b\nC,D,2,c@d\n");
        let items: Vec<_> = d.records().collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn test_records_can_be_scanned_twice() {
        let d = decoder("FirstName,LastName,Age,Email\nA,B,1,a@b\nC,D,2,c@d\n");
        assert_eq!(d.count().unwrap(), 2);
        let second: Vec<Record> = d.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[1].first_name, "C");
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let mut bytes = "\u{feff}FirstName,LastName,Age,Email\n".as_bytes().to_vec();
        bytes.extend_from_slice("Zoë,Ñuñez,28,z@example.com\n".as_bytes());
        let d = Decoder::new(bytes, Encoding::Utf8).unwrap();
        let record = d.records().next().unwrap().unwrap();
        assert_eq!(record.first_name, "Zoë");
    }

    #[test]
    fn test_invalid_utf8_is_an_encoding_error() {
        let bytes = b"FirstName,LastName,Age,Email\n\xff\xfe,B,1,a@b\n".to_vec();
        let err = Decoder::new(bytes, Encoding::Utf8).unwrap_err();
        assert!(matches!(err, DecodeError::Encoding { encoding: "utf-8", .. }));
    }

    #[test]
    fn test_latin1_bytes_decode() {
        let bytes = b"FirstName,LastName,Age,Email\nJos\xe9,Garc\xeda,50,j@example.com\n".to_vec();
        let d = Decoder::new(bytes, Encoding::Latin1).unwrap();
        let record = d.records().next().unwrap().unwrap();
        assert_eq!(record.first_name, "José");
        assert_eq!(record.last_name, "García");
    }

    #[test]
    fn test_age_is_trimmed() {
        let d = decoder("FirstName,LastName,Age,Email\nA,B, 42 ,a@b\n");
        assert_eq!(d.records().next().unwrap().unwrap().age, 42);
    }

    #[test]
    fn test_header_only_file_has_no_rows() {
        assert_eq!(decoder("FirstName,LastName,Age,Email\n").count().unwrap(), 0);
    }

    #[test]
    fn test_encoding_serde_names() {
        let e: Encoding = serde_json::from_str("\"latin1\"").unwrap();
        assert_eq!(e, Encoding::Latin1);
        assert_eq!(serde_json::to_string(&Encoding::Utf8).unwrap(), "\"utf-8\"");
    }
}
