use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use common::{Bar, EngineError, Result};

/// Load bars from a CSV file
pub fn load_csv(path: &Path) -> Result<Vec<Bar>> {
    let file = File::open(path)
        .map_err(|e| EngineError::DataLoad(format!("{}: {}", path.display(), e)))?;
    read_csv(BufReader::new(file))
}

/// Parse CSV bars from any reader.
///
/// Expected columns: timestamp, open, high, low, close, volume. Extra columns
/// are ignored and short rows are skipped.
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<Bar>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut bars = Vec::new();

    for (row, result) in csv_reader.records().enumerate() {
        let record = result?;
        if record.len() < 6 {
            continue;
        }

        let field = |col: usize, name: &str| -> Result<f64> {
            record[col].parse().map_err(|_| {
                EngineError::DataLoad(format!(
                    "row {}: invalid {} '{}'",
                    row + 1,
                    name,
                    &record[col]
                ))
            })
        };

        bars.push(Bar {
            timestamp: parse_timestamp(&record[0])?,
            open: field(1, "open")?,
            high: field(2, "high")?,
            low: field(3, "low")?,
            close: field(4, "close")?,
            volume: field(5, "volume")?,
        });
    }

    Ok(bars)
}

/// Load bars from a JSON array file
pub fn load_json(path: &Path) -> Result<Vec<Bar>> {
    let file = File::open(path)
        .map_err(|e| EngineError::DataLoad(format!("{}: {}", path.display(), e)))?;
    let bars: Vec<Bar> = serde_json::from_reader(BufReader::new(file))?;
    Ok(bars)
}

/// Parse timestamp from various formats
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let datetime_formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    let date_formats = ["%Y-%m-%d", "%Y/%m/%d"];
    for fmt in &date_formats {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(Utc.from_utc_datetime(&dt));
            }
        }
    }

    // Unix seconds
    if let Ok(ts) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return Ok(dt);
        }
    }

    Err(EngineError::DataLoad(format!("unable to parse timestamp: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_timestamp_iso() {
        let ts = parse_timestamp("2024-01-15T09:30:00Z").unwrap();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.month(), 1);
        assert_eq!(ts.day(), 15);
    }

    #[test]
    fn test_parse_timestamp_common() {
        let ts = parse_timestamp("2024-01-15 09:30:00").unwrap();
        assert_eq!(ts.hour(), 9);
    }

    #[test]
    fn test_parse_timestamp_date_only() {
        let ts = parse_timestamp("2024-01-15").unwrap();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.hour(), 0);
    }

    #[test]
    fn test_parse_timestamp_unix() {
        let ts = parse_timestamp("1705312200").unwrap();
        assert!(ts.year() >= 2024);
    }

    #[test]
    fn test_parse_timestamp_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_read_csv_rows() {
        let text = "timestamp,open,high,low,close,volume\n\
                    2024-01-02,10.0,11.0,9.5,10.5,1200\n\
                    2024-01-03,10.5,12.0,10.0,11.5,1500.5\n\
                    short,row\n";

        let bars = read_csv(text.as_bytes()).unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].close, 11.5);
        assert_eq!(bars[1].volume, 1500.5);
    }

    #[test]
    fn test_read_csv_bad_number() {
        let text = "timestamp,open,high,low,close,volume\n2024-01-02,ten,11,9,10,5\n";
        let err = read_csv(text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("open"));
    }
}
