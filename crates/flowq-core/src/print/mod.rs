//! Table printers.
//!
//! One printer per output format, all exposing the same capability set:
//! `add_row`, `add_rows`, `footer`, `print`. A tagged enum dispatches, no
//! deeper hierarchy needed.

pub mod csv;
pub mod fmt;
pub mod text;

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::query::{Direction, Format, Statement};
use crate::results::{QueryResult, Row};
use crate::types::counters::Counters;

pub use csv::CsvPrinter;
pub use text::TextPrinter;

/// One output column, computed once from the label selector, attribute
/// list, and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Time,
    Iface,
    Hostname,
    HostId,
    Sip,
    Dip,
    Dport,
    Proto,
    InPkts,
    InPktsPct,
    InBytes,
    InBytesPct,
    OutPkts,
    OutPktsPct,
    OutBytes,
    OutBytesPct,
    SumPkts,
    SumPktsPct,
    SumBytes,
    SumBytesPct,
    RcvdPkts,
    SentPkts,
    PktsPct,
    RcvdBytes,
    SentBytes,
    BytesPct,
}

impl Column {
    pub fn header(&self) -> &'static str {
        match self {
            Column::Time => "time",
            Column::Iface => "iface",
            Column::Hostname => "hostname",
            Column::HostId => "hostid",
            Column::Sip => "sip",
            Column::Dip => "dip",
            Column::Dport => "dport",
            Column::Proto => "proto",
            Column::InPkts => "pkts in",
            Column::OutPkts => "pkts out",
            Column::SumPkts => "pkts",
            Column::RcvdPkts => "pkts rcvd",
            Column::SentPkts => "pkts sent",
            Column::InBytes => "data in",
            Column::OutBytes => "data out",
            Column::SumBytes => "data",
            Column::RcvdBytes => "data rcvd",
            Column::SentBytes => "data sent",
            Column::InPktsPct
            | Column::InBytesPct
            | Column::OutPktsPct
            | Column::OutBytesPct
            | Column::SumPktsPct
            | Column::SumBytesPct
            | Column::PktsPct
            | Column::BytesPct => "%",
        }
    }
}

/// Computes the column list for a statement.
pub fn columns(stmt: &Statement) -> Vec<Column> {
    let mut cols = Vec::new();
    if stmt.label_selector.timestamp {
        cols.push(Column::Time);
    }
    if stmt.label_selector.iface {
        cols.push(Column::Iface);
    }
    if stmt.label_selector.hostname {
        cols.push(Column::Hostname);
    }
    if stmt.label_selector.host_id {
        cols.push(Column::HostId);
    }
    for attr in &stmt.attributes {
        cols.push(match attr {
            crate::types::Attribute::Sip => Column::Sip,
            crate::types::Attribute::Dip => Column::Dip,
            crate::types::Attribute::Dport => Column::Dport,
            crate::types::Attribute::Proto => Column::Proto,
        });
    }
    match stmt.direction {
        Direction::In => cols.extend([
            Column::InPkts,
            Column::InPktsPct,
            Column::InBytes,
            Column::InBytesPct,
        ]),
        Direction::Out => cols.extend([
            Column::OutPkts,
            Column::OutPktsPct,
            Column::OutBytes,
            Column::OutBytesPct,
        ]),
        Direction::Sum => cols.extend([
            Column::SumPkts,
            Column::SumPktsPct,
            Column::SumBytes,
            Column::SumBytesPct,
        ]),
        Direction::Both => cols.extend([
            Column::RcvdPkts,
            Column::SentPkts,
            Column::PktsPct,
            Column::RcvdBytes,
            Column::SentBytes,
            Column::BytesPct,
        ]),
    }
    cols
}

/// Percentage of `part` in `total`. A zero total is treated as `u64::MAX`
/// so the division yields 0 instead of NaN.
pub fn pct(part: u64, total: u64) -> f64 {
    let total = if total == 0 { u64::MAX } else { total };
    part as f64 * 100.0 / total as f64
}

/// Renders one cell. With `human`, counts and sizes use human-readable
/// units; otherwise raw numbers (CSV).
pub fn cell(column: Column, row: &Row, totals: &Counters, human: bool) -> String {
    let c = &row.counters;
    let count = |v: u64| {
        if human {
            fmt::format_count(v)
        } else {
            v.to_string()
        }
    };
    let bytes = |v: u64| {
        if human {
            fmt::format_bytes(v)
        } else {
            v.to_string()
        }
    };
    match column {
        Column::Time => {
            if human {
                fmt::format_timestamp(row.labels.timestamp)
            } else {
                row.labels.timestamp.to_string()
            }
        }
        Column::Iface => row.labels.iface.clone(),
        Column::Hostname => row.labels.hostname.clone(),
        Column::HostId => row.labels.host_id.to_string(),
        Column::Sip => row.attributes.sip.clone().unwrap_or_default(),
        Column::Dip => row.attributes.dip.clone().unwrap_or_default(),
        Column::Dport => row
            .attributes
            .dport
            .map(|p| p.to_string())
            .unwrap_or_default(),
        Column::Proto => row.attributes.proto.clone().unwrap_or_default(),
        Column::InPkts => count(c.pkts_rcvd),
        Column::OutPkts => count(c.pkts_sent),
        Column::SumPkts => count(c.sum_packets()),
        Column::RcvdPkts => count(c.pkts_rcvd),
        Column::SentPkts => count(c.pkts_sent),
        Column::InBytes => bytes(c.bytes_rcvd),
        Column::OutBytes => bytes(c.bytes_sent),
        Column::SumBytes => bytes(c.sum_bytes()),
        Column::RcvdBytes => bytes(c.bytes_rcvd),
        Column::SentBytes => bytes(c.bytes_sent),
        Column::InPktsPct => fmt::format_pct(pct(c.pkts_rcvd, totals.pkts_rcvd)),
        Column::InBytesPct => fmt::format_pct(pct(c.bytes_rcvd, totals.bytes_rcvd)),
        Column::OutPktsPct => fmt::format_pct(pct(c.pkts_sent, totals.pkts_sent)),
        Column::OutBytesPct => fmt::format_pct(pct(c.bytes_sent, totals.bytes_sent)),
        Column::SumPktsPct | Column::PktsPct => {
            fmt::format_pct(pct(c.sum_packets(), totals.sum_packets()))
        }
        Column::SumBytesPct | Column::BytesPct => {
            fmt::format_pct(pct(c.sum_bytes(), totals.sum_bytes()))
        }
    }
}

/// ANSI colouring is used only on a TTY and never under `TERM=dumb`.
pub fn use_colors() -> bool {
    io::stdout().is_terminal() && std::env::var("TERM").map(|t| t != "dumb").unwrap_or(true)
}

/// The printer capability set, dispatched over the output format.
pub enum Printer<W: Write> {
    Text(TextPrinter<W>),
    Csv(CsvPrinter<W>),
    Json(JsonPrinter<W>),
}

impl<W: Write> Printer<W> {
    /// Builds the printer matching the statement's format.
    pub fn new(stmt: &Statement, writer: W, color: bool) -> Self {
        match stmt.format {
            Format::Txt => Printer::Text(TextPrinter::new(stmt, writer, color)),
            Format::Csv => Printer::Csv(CsvPrinter::new(stmt, writer)),
            Format::Json => Printer::Json(JsonPrinter::new(writer)),
        }
    }

    /// Enables the detailed statistics footer (text output only).
    pub fn with_details(self, details: bool) -> Self {
        match self {
            Printer::Text(p) => Printer::Text(p.with_details(details)),
            other => other,
        }
    }

    pub fn add_row(&mut self, row: &Row, totals: &Counters) {
        match self {
            Printer::Text(p) => p.add_row(row, totals),
            Printer::Csv(p) => p.add_row(row, totals),
            Printer::Json(_) => {}
        }
    }

    /// Buffers all rows, honouring cancellation between rows.
    pub fn add_rows(&mut self, rows: &[Row], totals: &Counters, cancel: &AtomicBool) {
        for row in rows {
            if cancel.load(Ordering::Relaxed) {
                return;
            }
            self.add_row(row, totals);
        }
    }

    pub fn footer(&mut self, result: &QueryResult) {
        match self {
            Printer::Text(p) => p.footer(result),
            Printer::Csv(p) => p.footer(result),
            Printer::Json(_) => {}
        }
    }

    /// Renders the whole result: rows, footer, flush.
    pub fn print(&mut self, result: &QueryResult, cancel: &AtomicBool) -> io::Result<()> {
        self.add_rows(&result.rows, &result.summary.totals, cancel);
        self.footer(result);
        match self {
            Printer::Text(p) => p.flush(),
            Printer::Csv(p) => p.flush(),
            Printer::Json(p) => p.print(result),
        }
    }
}

/// JSON output: the result object serialised as-is.
pub struct JsonPrinter<W: Write> {
    writer: W,
}

impl<W: Write> JsonPrinter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn print(&mut self, result: &QueryResult) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, result).map_err(io::Error::other)?;
        writeln!(self.writer)?;
        self.writer.flush()
    }
}
