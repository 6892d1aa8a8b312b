use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use common::error::AppError;

/// Every sheet rendered as CSV under a `=== Sheet: name ===` header.
pub(super) fn extract(bytes: &[u8]) -> Result<String, AppError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|err| AppError::Extraction(format!("Failed to open spreadsheet: {err}")))?;

    let mut text = String::new();
    for name in workbook.sheet_names() {
        let range = workbook.worksheet_range(&name).map_err(|err| {
            AppError::Extraction(format!("Failed to read sheet {name}: {err}"))
        })?;
        text.push_str(&format!("\n=== Sheet: {name} ===\n"));
        text.push_str(&range_to_csv(&range));
        text.push('\n');
    }

    Ok(text.trim().to_string())
}

fn range_to_csv(range: &Range<Data>) -> String {
    range
        .rows()
        .map(|row| row.iter().map(cell_to_field).collect::<Vec<_>>().join(","))
        .collect::<Vec<_>>()
        .join("\n")
}

fn cell_to_field(cell: &Data) -> String {
    let value = match cell {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{f:.0}"),
        other => other.to_string(),
    };

    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value
    }
}
