// Table I/O - read/write delimited collection files

use crate::error::Result;
use crate::record::Record;
use crate::value::{Fields, Value};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// The full contents of a collection file: header row plus records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub records: Vec<Record>,
}

impl Table {
    /// Read a collection file. Every cell comes back as `Value::String`;
    /// rows shorter than the header get empty cells for the missing columns.
    pub fn read(path: &Path, delimiter: u8) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;

        let headers = parse_headers(reader.headers()?);
        let mut records = Vec::new();

        for (line, row) in reader.records().enumerate() {
            let row = row?;
            if row.len() > headers.len() {
                log::warn!(
                    "{}: row {} has {} cells but the header has {}; extra cells ignored",
                    path.display(),
                    line + 2,
                    row.len(),
                    headers.len()
                );
            }
            let mut fields = Fields::with_capacity(headers.len());
            for (i, name) in headers.iter().enumerate() {
                let cell = row.get(i).unwrap_or("");
                fields.insert(name.clone(), Value::String(cell.to_string()));
            }
            let id = fields.get("id").map(Value::to_text).unwrap_or_default();
            records.push(Record::new(id, fields));
        }

        Ok(Table { headers, records })
    }

    /// Read only the header row.
    pub fn read_headers(path: &Path, delimiter: u8) -> Result<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        Ok(parse_headers(reader.headers()?))
    }

    /// Rewrite the whole file. Content is fully written to a temporary file
    /// in the same directory and then renamed over `path`, so readers see
    /// either the old file or the new one.
    pub fn write(&self, path: &Path, delimiter: u8) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(delimiter)
                .from_writer(tmp.as_file_mut());
            if !self.headers.is_empty() {
                writer.write_record(&self.headers)?;
            }
            for record in &self.records {
                writer.write_record(self.row(record))?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        log::debug!(
            "Rewrote {} ({} records)",
            path.display(),
            self.records.len()
        );
        Ok(())
    }

    /// Append one record under an existing header.
    pub fn append(path: &Path, delimiter: u8, headers: &[String], record: &Record) -> Result<()> {
        let needs_newline = !ends_with_newline(path)?;
        let mut file = OpenOptions::new().append(true).open(path)?;
        if needs_newline {
            file.write_all(b"\n")?;
        }
        {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(delimiter)
                .has_headers(false)
                .from_writer(&mut file);
            writer.write_record(row_for(headers, record))?;
            writer.flush()?;
        }
        file.sync_all()?;
        log::debug!("Appended record {} to {}", record.id, path.display());
        Ok(())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    /// Index of the first record with the given id.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    /// Cells of `record` in header order.
    pub fn row(&self, record: &Record) -> Vec<String> {
        row_for(&self.headers, record)
    }

    /// The record as it reads back from disk: one text cell per header
    /// column, in header order. Keys outside the header are dropped.
    pub fn stored(&self, fields: &Fields) -> Record {
        let cells: Fields = self
            .headers
            .iter()
            .map(|h| {
                let text = fields.get(h).map(Value::to_text).unwrap_or_default();
                (h.clone(), Value::String(text))
            })
            .collect();
        let id = cells.get("id").map(Value::to_text).unwrap_or_default();
        Record::new(id, cells)
    }
}

fn parse_headers(raw: &csv::StringRecord) -> Vec<String> {
    raw.iter()
        .enumerate()
        .map(|(i, h)| {
            let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
            h.trim().to_string()
        })
        .collect()
}

fn row_for(headers: &[String], record: &Record) -> Vec<String> {
    headers
        .iter()
        .map(|h| record.get(h).map(Value::to_text).unwrap_or_default())
        .collect()
}

fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        // Nothing to separate from
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_read_table() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "users.csv", "id,name,age\n1,Alice,30\n2,\"Bob, Jr.\",\n");

        let table = Table::read(&path, b',').unwrap();
        assert_eq!(table.headers, vec!["id", "name", "age"]);
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[0].id, "1");
        assert_eq!(table.records[1].get("name"), Some(&Value::from("Bob, Jr.")));
        assert_eq!(table.records[1].get("age"), Some(&Value::from("")));
    }

    #[test]
    fn test_short_rows_padded() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "t.csv", "id,a,b\n1,x\n");
        let table = Table::read(&path, b',').unwrap();
        assert_eq!(table.records[0].get("b"), Some(&Value::from("")));
    }

    #[test]
    fn test_write_then_read() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "t.csv", "id,name\n1,Alice\n");
        let mut table = Table::read(&path, b',').unwrap();
        table.records[0]
            .fields
            .insert("name".into(), Value::from("Alice \"Al\" Chen"));
        table.write(&path, b',').unwrap();

        let again = Table::read(&path, b',').unwrap();
        assert_eq!(again, table);
        // No temp files left behind
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_header_only_file() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "t.csv", "id,name\n");
        let table = Table::read(&path, b',').unwrap();
        assert!(table.records.is_empty());
        table.write(&path, b',').unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,name\n");
    }

    #[test]
    fn test_append_without_trailing_newline() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "t.csv", "id,name\n1,Alice");
        let headers = Table::read_headers(&path, b',').unwrap();

        let mut fields = Fields::new();
        fields.insert("id".into(), Value::from("2"));
        fields.insert("name".into(), Value::from("Bob"));
        Table::append(&path, b',', &headers, &Record::new("2", fields)).unwrap();

        let table = Table::read(&path, b',').unwrap();
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[1].get("name"), Some(&Value::from("Bob")));
    }

    #[test]
    fn test_stored_renders_text_in_header_order() {
        let table = Table {
            headers: vec!["id".into(), "qty".into(), "note".into()],
            records: Vec::new(),
        };
        let mut fields = Fields::new();
        fields.insert("qty".into(), Value::Integer(3));
        fields.insert("id".into(), Value::from("a1"));
        fields.insert("extra".into(), Value::Boolean(true));

        let record = table.stored(&fields);
        assert_eq!(record.id, "a1");
        let keys: Vec<&str> = record.fields.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["id", "qty", "note"]);
        assert_eq!(record.get("qty"), Some(&Value::from("3")));
        assert_eq!(record.get("note"), Some(&Value::from("")));
    }

    #[test]
    fn test_semicolon_delimiter() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "t.csv", "id;price\n1;2,5\n");
        let table = Table::read(&path, b';').unwrap();
        assert_eq!(table.records[0].get("price"), Some(&Value::from("2,5")));
    }
}
