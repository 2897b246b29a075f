//! Tabular batch import
//!
//! Header-driven CSV parsing. The header row maps columns by name (English
//! or the original Chinese labels); required columns are business id,
//! amount, sender and receiver, with an optional transaction type that
//! defaults to 1. A missing required column rejects the whole file; a bad
//! row is rejected on its own.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Default transaction type when the column is absent or blank
pub const DEFAULT_TX_TYPE: i32 = 1;

const BIZ_ID: &[&str] = &["biz_id", "bizid", "业务流水号"];
const AMOUNT: &[&str] = &["amount", "金额"];
const SENDER: &[&str] = &["sender", "付款方"];
const RECEIVER: &[&str] = &["receiver", "收款方"];
const TX_TYPE: &[&str] = &["tx_type", "txtype", "交易类型"];

/// A parsed data row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRow {
    /// 1-based line number, header is line 1
    pub row: usize,
    /// Business identifier
    pub biz_id: String,
    /// Amount, verbatim
    pub amount: String,
    /// Paying party
    pub sender: String,
    /// Receiving party
    pub receiver: String,
    /// Transaction type
    pub tx_type: i32,
}

/// A row that was not imported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRejection {
    /// 1-based line number
    pub row: usize,
    /// Business identifier, empty if the row had none
    pub biz_id: String,
    /// What was wrong
    pub reason: String,
}

/// Outcome of an import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Non-empty data rows
    pub total: usize,
    /// Rows turned into transactions
    pub success: usize,
    /// Rows rejected
    pub failed: usize,
    /// Created BizIDs
    pub success_ids: Vec<String>,
    /// Rejected rows
    pub rejected: Vec<RowRejection>,
}

impl ImportReport {
    pub(crate) fn accept(&mut self, biz_id: String) {
        self.success += 1;
        self.success_ids.push(biz_id);
    }

    pub(crate) fn reject(&mut self, rejection: RowRejection) {
        self.failed += 1;
        self.rejected.push(rejection);
    }
}

#[derive(Debug)]
struct Columns {
    biz_id: usize,
    amount: usize,
    sender: usize,
    receiver: usize,
    tx_type: Option<usize>,
}

impl Columns {
    fn from_header(header: &csv::StringRecord) -> Result<Self> {
        let names: Vec<String> = header
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
            .collect();
        let find = |aliases: &[&str]| names.iter().position(|n| aliases.contains(&n.as_str()));
        let require = |aliases: &[&str]| {
            find(aliases).ok_or_else(|| {
                Error::Validation(format!("Missing required column: {}", aliases[0]))
            })
        };

        Ok(Self {
            biz_id: require(BIZ_ID)?,
            amount: require(AMOUNT)?,
            sender: require(SENDER)?,
            receiver: require(RECEIVER)?,
            tx_type: find(TX_TYPE),
        })
    }
}

/// Parse CSV into rows and per-row rejections
pub fn parse_csv<R: Read>(reader: R) -> Result<(Vec<ImportRow>, Vec<RowRejection>)> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns = Columns::from_header(csv_reader.headers()?)?;

    let mut rows = Vec::new();
    let mut rejected = Vec::new();

    for (index, record) in csv_reader.records().enumerate() {
        let line = index + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                rejected.push(RowRejection {
                    row: line,
                    biz_id: String::new(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }

        let line = record.position().map_or(line, |p| p.line() as usize);
        match parse_record(&record, &columns, line) {
            Ok(row) => rows.push(row),
            Err(rejection) => rejected.push(rejection),
        }
    }

    if rows.is_empty() && rejected.is_empty() {
        return Err(Error::Validation("File has no data rows".to_string()));
    }

    Ok((rows, rejected))
}

fn parse_record(
    record: &csv::StringRecord,
    columns: &Columns,
    line: usize,
) -> std::result::Result<ImportRow, RowRejection> {
    let cell = |idx: usize| record.get(idx).unwrap_or_default().to_string();
    let biz_id = cell(columns.biz_id);
    let reject = |reason: String| RowRejection {
        row: line,
        biz_id: biz_id.clone(),
        reason,
    };

    for (field, idx) in [
        ("biz_id", columns.biz_id),
        ("amount", columns.amount),
        ("sender", columns.sender),
        ("receiver", columns.receiver),
    ] {
        if cell(idx).is_empty() {
            return Err(reject(format!("{} is empty", field)));
        }
    }

    let tx_type = match columns.tx_type.map(cell).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse::<i32>()
            .map_err(|_| reject(format!("invalid tx_type: {}", raw)))?,
        None => DEFAULT_TX_TYPE,
    };

    Ok(ImportRow {
        row: line,
        biz_id: biz_id.clone(),
        amount: cell(columns.amount),
        sender: cell(columns.sender),
        receiver: cell(columns.receiver),
        tx_type,
    })
}

/// Blank import template with two sample rows
pub fn csv_template() -> String {
    [
        "biz_id,amount,sender,receiver,tx_type",
        "TX20260113001,1000000,Institution A,Institution B,1",
        "TX20260113002,2000000,Institution B,Institution C,1",
        "",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_english_headers() {
        let data = "biz_id,amount,sender,receiver,tx_type\nTX001,100.50,A,B,2\nTX002,200,B,C,\n";
        let (rows, rejected) = parse_csv(data.as_bytes()).unwrap();
        assert!(rejected.is_empty());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tx_type, 2);
        assert_eq!(rows[1].tx_type, DEFAULT_TX_TYPE);
        assert_eq!(rows[0].row, 2);
    }

    #[test]
    fn test_chinese_headers_any_order() {
        let data = "收款方,金额,业务流水号,付款方\n机构B,1000000,TX20260113001,机构A\n";
        let (rows, _) = parse_csv(data.as_bytes()).unwrap();
        assert_eq!(rows[0].biz_id, "TX20260113001");
        assert_eq!(rows[0].sender, "机构A");
        assert_eq!(rows[0].receiver, "机构B");
        assert_eq!(rows[0].tx_type, 1);
    }

    #[test]
    fn test_missing_required_column() {
        let data = "biz_id,amount,sender\nTX001,1,A\n";
        let err = parse_csv(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("receiver"));
    }

    #[test]
    fn test_bad_rows_rejected_individually() {
        let data = "biz_id,amount,sender,receiver,tx_type\n\
                    TX001,100,A,B,1\n\
                    TX002,,A,B,1\n\
                    ,,,,\n\
                    TX003,300,A,B,transfer\n\
                    TX004,400,A,B,1\n";
        let (rows, rejected) = parse_csv(data.as_bytes()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].row, 3);
        assert_eq!(rejected[0].biz_id, "TX002");
        assert!(rejected[0].reason.contains("amount"));
        assert_eq!(rejected[1].row, 5);
        assert!(rejected[1].reason.contains("tx_type"));
    }

    #[test]
    fn test_header_only_file() {
        assert!(parse_csv("biz_id,amount,sender,receiver\n".as_bytes()).is_err());
    }

    #[test]
    fn test_template_parses() {
        let (rows, rejected) = parse_csv(csv_template().as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rejected.is_empty());
    }
}
