//! Plain-text table output with right-aligned columns and the summary
//! footer.

use std::io::{self, Write};

use crate::print::fmt::{format_duration_ns, format_timestamp};
use crate::print::{Column, cell, columns};
use crate::query::{Direction, SortOrder, Statement};
use crate::results::{QueryResult, Row};
use crate::types::counters::Counters;

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

pub struct TextPrinter<W: Write> {
    writer: W,
    columns: Vec<Column>,
    color: bool,
    details: bool,
    sort_description: String,
    rows: Vec<Vec<String>>,
    footer_lines: Vec<(String, String)>,
}

impl<W: Write> TextPrinter<W> {
    pub fn new(stmt: &Statement, writer: W, color: bool) -> Self {
        Self {
            writer,
            columns: columns(stmt),
            color,
            details: false,
            sort_description: sort_description(stmt),
            rows: Vec::new(),
            footer_lines: Vec::new(),
        }
    }

    /// Enables the detailed block-store statistics in the footer.
    pub fn with_details(mut self, details: bool) -> Self {
        self.details = details;
        self
    }

    pub fn add_row(&mut self, row: &Row, totals: &Counters) {
        let cells = self
            .columns
            .iter()
            .map(|c| cell(*c, row, totals, true))
            .collect();
        self.rows.push(cells);
    }

    pub fn footer(&mut self, result: &QueryResult) {
        let s = &result.summary;

        if s.time_first != 0 || s.time_last != 0 {
            self.footer_lines.push((
                "Timespan".to_string(),
                format!(
                    "[{}, {}]",
                    format_timestamp(s.time_first),
                    format_timestamp(s.time_last)
                ),
            ));
        }

        let ifaces = if s.interfaces.len() > 1 {
            format!("{} interfaces", s.interfaces.len())
        } else {
            s.interfaces.join(", ")
        };
        if !ifaces.is_empty() {
            self.footer_lines.push(("Interfaces".to_string(), ifaces));
        }

        self.footer_lines
            .push(("Sorted by".to_string(), self.sort_description.clone()));

        if s.timings.resolution_duration_ns > 0 {
            self.footer_lines.push((
                "Reverse DNS".to_string(),
                format!("took {}", format_duration_ns(s.timings.resolution_duration_ns)),
            ));
        }

        self.footer_lines.push((
            "Query stats".to_string(),
            format!(
                "displayed {} of {} hits in {}",
                s.hits.displayed,
                s.hits.total,
                format_duration_ns(s.timings.query_duration_ns)
            ),
        ));

        if !result.query.condition.is_empty() {
            self.footer_lines
                .push(("Conditions".to_string(), result.query.condition.clone()));
        }

        if self.details && let Some(stats) = &s.stats {
            self.footer_lines.push((
                "Loaded".to_string(),
                format!(
                    "{} compressed, {} decompressed",
                    crate::print::fmt::format_bytes(stats.bytes_loaded),
                    crate::print::fmt::format_bytes(stats.bytes_decompressed)
                ),
            ));
            self.footer_lines.push((
                "Blocks".to_string(),
                format!(
                    "{} processed, {} corrupted",
                    stats.blocks_processed, stats.blocks_corrupted
                ),
            ));
            self.footer_lines.push((
                "Workloads".to_string(),
                format!(
                    "{} over {} directories",
                    stats.workloads, stats.directories_processed
                ),
            ));
        }
    }

    /// Writes the buffered table and footer.
    pub fn flush(&mut self) -> io::Result<()> {
        let headers: Vec<&str> = self.columns.iter().map(|c| c.header()).collect();
        let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let mut line = String::new();
        for (i, header) in headers.iter().enumerate() {
            if i > 0 {
                line.push_str("  ");
            }
            line.push_str(&" ".repeat(widths[i].saturating_sub(header.chars().count())));
            line.push_str(header);
        }
        if self.color {
            writeln!(self.writer, "{}{}{}", BOLD, line, RESET)?;
        } else {
            writeln!(self.writer, "{}", line)?;
        }

        for row in &self.rows {
            let mut line = String::new();
            for (i, cell) in row.iter().enumerate() {
                if i > 0 {
                    line.push_str("  ");
                }
                line.push_str(&" ".repeat(widths[i].saturating_sub(cell.chars().count())));
                line.push_str(cell);
            }
            writeln!(self.writer, "{}", line)?;
        }

        if !self.footer_lines.is_empty() {
            writeln!(self.writer)?;
            let key_width = self
                .footer_lines
                .iter()
                .map(|(k, _)| k.chars().count())
                .max()
                .unwrap_or(0);
            for (key, value) in &self.footer_lines {
                if self.color {
                    writeln!(
                        self.writer,
                        "{}{:>width$}{} : {}",
                        DIM,
                        key,
                        RESET,
                        value,
                        width = key_width
                    )?;
                } else {
                    writeln!(self.writer, "{:>width$} : {}", key, value, width = key_width)?;
                }
            }
        }

        self.writer.flush()
    }
}

fn sort_description(stmt: &Statement) -> String {
    let direction = match stmt.direction {
        Direction::In => "received only",
        Direction::Out => "sent only",
        Direction::Sum | Direction::Both => "sent and received",
    };
    let order = if stmt.ascending {
        "ascending"
    } else {
        "descending"
    };
    match stmt.sort_by {
        SortOrder::Bytes => format!("accumulated data volume ({}), {}", direction, order),
        SortOrder::Packets => format!("accumulated packets ({}), {}", direction, order),
        SortOrder::Time => format!("time, {}", order),
    }
}
