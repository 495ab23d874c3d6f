//! Collects results and renders them for stdout.
//!
//! Only entities with a successful count become rows. Failures are kept
//! separately and shown by the table and JSON formats.

use super::config::{OutputFormat, RowOrder, SortKey};
use serde::Serialize;
use std::{borrow::Cow, cmp::Ordering, collections::HashMap, fmt::Write as _};
use tally::{CountOutcome, CountResult, EntityTarget, ResultSink, RunSummary};

pub const HEADERS: [&str; 3] = ["Display Name", "Schema Name", "Count"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub display_name: String,
    pub schema_name: String,
    pub count: u64,
    #[serde(skip)]
    position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportFailure {
    pub schema_name: String,
    pub error: String,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    status: String,
    elapsed_ms: u128,
    counted: usize,
    failed: usize,
    rows: &'a [ReportRow],
    errors: &'a [ReportFailure],
}

/// Result sink building the printable report.
#[derive(Debug, Default)]
pub struct Report {
    /// Logical name -> (selection position, label).
    labels: HashMap<String, (usize, String)>,
    rows: Vec<ReportRow>,
    failures: Vec<ReportFailure>,
}

impl Report {
    pub fn new(targets: &[EntityTarget]) -> Self {
        let labels = targets
            .iter()
            .enumerate()
            .map(|(i, t)| (t.logical_name.clone(), (i, t.label().to_owned())))
            .collect();
        Self {
            labels,
            ..Self::default()
        }
    }

    /// Successful counts in the requested order. Ties keep selection order.
    pub fn rows(&self, order: &RowOrder) -> Vec<ReportRow> {
        let mut rows = self.rows.clone();
        rows.sort_by_key(|row| row.position);

        let descending = order.descending;
        let directed = |ordering: Ordering| {
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        };
        // Stable sorts on top of selection order.
        match order.key {
            Some(SortKey::Display) => {
                rows.sort_by(|a, b| directed(a.display_name.cmp(&b.display_name)));
            }
            Some(SortKey::Logical) => {
                rows.sort_by(|a, b| directed(a.schema_name.cmp(&b.schema_name)));
            }
            Some(SortKey::Count) => rows.sort_by(|a, b| directed(a.count.cmp(&b.count))),
            None => rows.sort_by(|a, b| directed(a.position.cmp(&b.position))),
        }
        rows
    }

    /// Failed entities in selection order.
    pub fn failures(&self) -> Vec<ReportFailure> {
        let mut failures = self.failures.clone();
        failures.sort_by_key(|f| self.position(&f.schema_name));
        failures
    }

    pub fn render(&self, format: OutputFormat, order: &RowOrder, summary: &RunSummary) -> String {
        let rows = self.rows(order);
        match format {
            OutputFormat::Table => self.render_table(&rows, summary),
            OutputFormat::Csv => render_csv(&rows),
            OutputFormat::Json => {
                let failures = self.failures();
                let report = JsonReport {
                    status: summary.status.to_string(),
                    elapsed_ms: summary.elapsed.as_millis(),
                    counted: rows.len(),
                    failed: failures.len(),
                    rows: &rows,
                    errors: &failures,
                };
                // Plain strings and integers always serialize.
                let mut out = serde_json::to_string_pretty(&report).unwrap_or_default();
                out.push('\n');
                out
            }
        }
    }

    fn render_table(&self, rows: &[ReportRow], summary: &RunSummary) -> String {
        let counts: Vec<String> = rows.iter().map(|row| row.count.to_string()).collect();
        let width = |header: &str, cells: &mut dyn Iterator<Item = usize>| {
            cells.fold(header.len(), usize::max)
        };
        let w_display = width(HEADERS[0], &mut rows.iter().map(|r| r.display_name.chars().count()));
        let w_schema = width(HEADERS[1], &mut rows.iter().map(|r| r.schema_name.chars().count()));
        let w_count = width(HEADERS[2], &mut counts.iter().map(String::len));

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<w_display$}  {:<w_schema$}  {:>w_count$}",
            HEADERS[0], HEADERS[1], HEADERS[2]
        );
        let _ = writeln!(
            out,
            "{}  {}  {}",
            "-".repeat(w_display),
            "-".repeat(w_schema),
            "-".repeat(w_count)
        );
        for (row, count) in rows.iter().zip(&counts) {
            let _ = writeln!(
                out,
                "{:<w_display$}  {:<w_schema$}  {:>w_count$}",
                row.display_name, row.schema_name, count
            );
        }

        let failures = self.failures();
        if !failures.is_empty() {
            let _ = writeln!(out, "\nFailed:");
            for failure in &failures {
                let _ = writeln!(out, "  {}: {}", failure.schema_name, failure.error);
            }
        }

        let _ = writeln!(
            out,
            "\n{} counted, {} failed, {} in {:?}",
            rows.len(),
            failures.len(),
            summary.status,
            summary.elapsed
        );
        out
    }

    fn position(&self, logical_name: &str) -> usize {
        self.labels
            .get(logical_name)
            .map_or(usize::MAX, |(position, _)| *position)
    }

    fn label(&self, logical_name: &str) -> String {
        self.labels
            .get(logical_name)
            .map_or_else(|| logical_name.to_owned(), |(_, label)| label.clone())
    }
}

impl ResultSink for Report {
    fn on_result(&mut self, result: &CountResult) {
        match &result.outcome {
            CountOutcome::Count(count) => self.rows.push(ReportRow {
                display_name: self.label(&result.logical_name),
                schema_name: result.logical_name.clone(),
                count: *count,
                position: self.position(&result.logical_name),
            }),
            CountOutcome::Fault(message) => {
                tracing::warn!(entity = %result.logical_name, "Count failed: {message}");
                self.failures.push(ReportFailure {
                    schema_name: result.logical_name.clone(),
                    error: message.clone(),
                });
            }
        }
    }
}

fn render_csv(rows: &[ReportRow]) -> String {
    let mut out = HEADERS.join(";");
    out.push('\n');
    for row in rows {
        let _ = writeln!(
            out,
            "{};{};{}",
            csv_field(&row.display_name),
            csv_field(&row.schema_name),
            row.count
        );
    }
    out
}

/// Quotes a field containing the separator, a quote or a line break, doubling
/// inner quotes.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([';', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}
