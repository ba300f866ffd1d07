//! Rendering of command results as text or JSON

use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::storage::OutputFormat;

pub struct Output {
    format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// One-line outcome, wrapped as `{"success": true, "message": ..}` in JSON
    pub fn success(&self, message: &str) {
        if self.is_json() {
            println!("{}", json!({ "success": true, "message": message }));
        } else {
            println!("{}", message);
        }
    }

    /// Structured data, pretty-printed in text mode
    pub fn data<T: Serialize>(&self, data: &T) {
        let rendered = if self.is_json() {
            serde_json::to_string(data)
        } else {
            serde_json::to_string_pretty(data)
        };

        match rendered {
            Ok(text) => println!("{}", text),
            Err(e) => error!(error = %e, "failed to render output"),
        }
    }

    /// Column-aligned rows; text mode only
    pub fn table(&self, rows: &[Vec<String>]) {
        if self.is_json() {
            return;
        }
        for line in align(rows) {
            println!("{}", line);
        }
    }
}

/// Pads every column but the last to its widest cell
fn align(rows: &[Vec<String>]) -> Vec<String> {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0; columns];
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    rows.iter()
        .map(|row| {
            let last = row.len().saturating_sub(1);
            row.iter()
                .enumerate()
                .map(|(i, cell)| {
                    if i == last {
                        cell.clone()
                    } else {
                        format!("{:<width$}", cell, width = widths[i])
                    }
                })
                .collect::<Vec<_>>()
                .join("  ")
        })
        .collect()
}
