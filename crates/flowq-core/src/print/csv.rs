//! CSV output: one line per flow, raw numbers, totals rows at the end.

use std::io::{self, Write};

use crate::print::{Column, cell, columns};
use crate::query::Statement;
use crate::results::{QueryResult, Row};
use crate::types::counters::Counters;

pub struct CsvPrinter<W: Write> {
    writer: W,
    columns: Vec<Column>,
    lines: Vec<String>,
    footer_lines: Vec<String>,
}

impl<W: Write> CsvPrinter<W> {
    pub fn new(stmt: &Statement, writer: W) -> Self {
        Self {
            writer,
            columns: columns(stmt),
            lines: Vec::new(),
            footer_lines: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: &Row, totals: &Counters) {
        let line = self
            .columns
            .iter()
            .map(|c| cell(*c, row, totals, false))
            .collect::<Vec<_>>()
            .join(",");
        self.lines.push(line);
    }

    pub fn footer(&mut self, result: &QueryResult) {
        let t = &result.summary.totals;
        self.footer_lines.push(String::new());
        self.footer_lines
            .push(format!("Overall packets received,{}", t.pkts_rcvd));
        self.footer_lines
            .push(format!("Overall packets sent,{}", t.pkts_sent));
        self.footer_lines
            .push(format!("Overall data volume received (bytes),{}", t.bytes_rcvd));
        self.footer_lines
            .push(format!("Overall data volume sent (bytes),{}", t.bytes_sent));
    }

    pub fn flush(&mut self) -> io::Result<()> {
        let header = self
            .columns
            .iter()
            .map(|c| c.header().to_string())
            .collect::<Vec<_>>()
            .join(",");
        writeln!(self.writer, "{}", header)?;
        for line in &self.lines {
            writeln!(self.writer, "{}", line)?;
        }
        for line in &self.footer_lines {
            writeln!(self.writer, "{}", line)?;
        }
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Args;
    use crate::results::{RowAttributes, Summary};

    #[test]
    fn test_csv_rows_and_totals() {
        let stmt = Args {
            query: "sip".to_string(),
            ifaces: "eth0".to_string(),
            sum: true,
            first: "100".to_string(),
            last: "200".to_string(),
            ..Args::default()
        }
        .prepare_at(1000)
        .unwrap();

        let totals = Counters::new(150, 50, 15, 5);
        let result = QueryResult {
            summary: Summary {
                totals,
                ..Summary::default()
            },
            ..QueryResult::default()
        };
        let row = Row {
            attributes: RowAttributes {
                sip: Some("1.2.3.4".to_string()),
                ..RowAttributes::default()
            },
            counters: Counters::new(100, 50, 10, 5),
            ..Row::default()
        };

        let mut buf = Vec::new();
        let mut p = CsvPrinter::new(&stmt, &mut buf);
        p.add_row(&row, &totals);
        p.footer(&result);
        p.flush().unwrap();

        let out = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "sip,pkts,%,data,%");
        assert_eq!(lines[1], "1.2.3.4,15,75.00,150,75.00");
        assert!(out.contains("Overall packets received,15"));
        assert!(out.contains("Overall data volume sent (bytes),50"));
    }
}
