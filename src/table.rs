//! Ticket Table
//!
//! CSV-backed tabular model for the ticket export. Input columns are passed
//! through untouched; the three classification output columns are appended
//! (or reused) on load. The whole table is serde-serializable so a checkpoint
//! can embed a full snapshot.

use std::io;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::prompt::Classification;

pub const TITLE_COLUMN: &str = "Ticket_Title";
pub const SUMMARY_COLUMN: &str = "Ticket_Summary";

pub const CATEGORY_COLUMN: &str = "New_Service_Category";
pub const REQUEST_TYPE_COLUMN: &str = "New_Service_Request_Type";
pub const PRIORITY_COLUMN: &str = "Priority";

pub const OUTPUT_COLUMNS: [&str; 3] = [CATEGORY_COLUMN, REQUEST_TYPE_COLUMN, PRIORITY_COLUMN];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TicketTable {
    pub fn from_csv_path(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::Setup(format!(
                "input file not found: {}",
                path.display()
            )));
        }
        let file = std::fs::File::open(path)
            .with_context(|| format!("could not open {}", path.display()))?;
        Self::from_csv_reader(file)
    }

    pub fn from_csv_reader<R: io::Read>(reader: R) -> AppResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().flexible(false).from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()
            .context("could not read CSV headers")?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record.context("could not read CSV record")?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        let table = Self { headers, rows };

        for required in [TITLE_COLUMN, SUMMARY_COLUMN] {
            if table.column_index(required).is_none() {
                return Err(AppError::Setup(format!(
                    "input table is missing required column '{}'",
                    required
                )));
            }
        }

        Ok(table)
    }

    /// Append any missing output columns, padding every row with nulls.
    /// Columns already present (e.g. from a checkpoint snapshot) are reused.
    pub fn ensure_output_columns(&mut self) {
        for column in OUTPUT_COLUMNS {
            if self.column_index(column).is_none() {
                self.headers.push(column.to_string());
                for row in &mut self.rows {
                    row.push(String::new());
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn cell(&self, index: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(index)?.get(col).map(String::as_str)
    }

    /// Title and summary for one row, cloned so a spawned task can own them.
    pub fn ticket(&self, index: usize) -> AppResult<(String, String)> {
        let title = self
            .cell(index, TITLE_COLUMN)
            .with_context(|| format!("row {} out of bounds", index))?
            .to_string();
        let summary = self
            .cell(index, SUMMARY_COLUMN)
            .with_context(|| format!("row {} out of bounds", index))?
            .to_string();
        Ok((title, summary))
    }

    /// Write one attempt's outcome into a row. `None` records a failed
    /// classification: all three output cells are nulled, never left
    /// half-populated.
    pub fn set_classification(&mut self, index: usize, classification: Option<&Classification>) {
        let values = match classification {
            Some(c) => [
                c.category.clone(),
                c.request_type.clone(),
                c.priority.to_string(),
            ],
            None => [String::new(), String::new(), String::new()],
        };

        for (column, value) in OUTPUT_COLUMNS.iter().zip(values) {
            if let (Some(col), Some(row)) = (self.column_index(column), self.rows.get_mut(index)) {
                row[col] = value;
            }
        }
    }

    pub fn classification_cells(&self, index: usize) -> Option<[&str; 3]> {
        Some([
            self.cell(index, CATEGORY_COLUMN)?,
            self.cell(index, REQUEST_TYPE_COLUMN)?,
            self.cell(index, PRIORITY_COLUMN)?,
        ])
    }

    pub fn write_csv_path(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("could not create {}", parent.display()))?;
            }
        }
        let file = std::fs::File::create(path)
            .with_context(|| format!("could not create {}", path.display()))?;
        self.write_csv_writer(file)
    }

    pub fn write_csv_writer<W: io::Write>(&self, writer: W) -> AppResult<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&self.headers)?;
        for row in &self.rows {
            csv_writer.write_record(row)?;
        }
        csv_writer.flush().context("could not flush CSV output")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PriorityLevel;

    const SAMPLE: &str = "\
TicketID,Ticket_Title,Ticket_Summary,Reporter
T-1,VPN down,Cannot connect to VPN,alice
T-2,New laptop,Replacement laptop needed,bob
";

    fn sample_table() -> TicketTable {
        TicketTable::from_csv_reader(SAMPLE.as_bytes()).unwrap()
    }

    #[test]
    fn test_parses_rows_and_headers() {
        let table = sample_table();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.ticket(0).unwrap(),
            ("VPN down".to_string(), "Cannot connect to VPN".to_string())
        );
    }

    #[test]
    fn test_missing_required_column_is_setup_error() {
        let result = TicketTable::from_csv_reader("TicketID,Ticket_Title\nT-1,x\n".as_bytes());
        assert!(matches!(result, Err(AppError::Setup(_))));
    }

    #[test]
    fn test_ensure_output_columns_is_idempotent() {
        let mut table = sample_table();
        table.ensure_output_columns();
        let width = table.headers().len();
        table.ensure_output_columns();
        assert_eq!(table.headers().len(), width);
        assert_eq!(table.classification_cells(0).unwrap(), ["", "", ""]);
    }

    #[test]
    fn test_set_classification_writes_all_three() {
        let mut table = sample_table();
        table.ensure_output_columns();
        let classification = Classification {
            category: "Network".to_string(),
            request_type: "VPN Issue".to_string(),
            priority: PriorityLevel::P2,
        };
        table.set_classification(0, Some(&classification));
        assert_eq!(
            table.classification_cells(0).unwrap(),
            ["Network", "VPN Issue", "P2"]
        );
    }

    #[test]
    fn test_failed_classification_nulls_all_three() {
        let mut table = sample_table();
        table.ensure_output_columns();
        let classification = Classification {
            category: "Network".to_string(),
            request_type: "VPN Issue".to_string(),
            priority: PriorityLevel::P2,
        };
        table.set_classification(1, Some(&classification));
        table.set_classification(1, None);
        assert_eq!(table.classification_cells(1).unwrap(), ["", "", ""]);
    }

    #[test]
    fn test_passthrough_columns_survive_roundtrip() {
        let mut table = sample_table();
        table.ensure_output_columns();

        let mut buf = Vec::new();
        table.write_csv_writer(&mut buf).unwrap();
        let written = String::from_utf8(buf).unwrap();

        let first_line = written.lines().next().unwrap();
        assert_eq!(
            first_line,
            "TicketID,Ticket_Title,Ticket_Summary,Reporter,\
             New_Service_Category,New_Service_Request_Type,Priority"
        );
        assert!(written.contains("T-2,New laptop,Replacement laptop needed,bob"));
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_rows() {
        let mut table = sample_table();
        table.ensure_output_columns();
        table.set_classification(
            0,
            Some(&Classification {
                category: "Network".to_string(),
                request_type: "VPN Issue".to_string(),
                priority: PriorityLevel::P1,
            }),
        );

        let json = serde_json::to_string(&table).unwrap();
        let restored: TicketTable = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(
            restored.classification_cells(0).unwrap(),
            ["Network", "VPN Issue", "P1"]
        );
    }
}
