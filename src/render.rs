//! Console output for poll snapshots.

use std::io::{self, Write};

use chrono::{DateTime, Local, SecondsFormat};
use serde::ser::{Serialize, Serializer};

use crate::monitor::{Snapshot, TableCount, TableStat};

const GREEN: &str = "\x1b[1;32m";
const RED: &str = "\x1b[1;31m";
const RESET: &str = "\x1b[0m";

const RULE: &str = "  ------------------------------------------------";

/// Consumer of one snapshot per tick.
pub trait Render {
    fn render(&mut self, at: DateTime<Local>, snapshot: &Snapshot) -> io::Result<()>;
}

/// Human-readable block with a health line and a table of row counts.
pub struct TextRenderer<W: Write> {
    out: W,
    color: bool,
}

impl<W: Write> TextRenderer<W> {
    /// `color` enables ANSI colors on the health line.
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.color {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }
}

impl<W: Write> Render for TextRenderer<W> {
    fn render(&mut self, at: DateTime<Local>, snapshot: &Snapshot) -> io::Result<()> {
        writeln!(
            self.out,
            "[{}] Database Status Update:",
            at.format("%Y-%m-%d %H:%M:%S")
        )?;

        match snapshot {
            Snapshot::ConnectionFailed { error } => {
                let line = self.paint(RED, &format!("Connection Error: {}", error));
                writeln!(self.out, "  {}", line)?;
            }
            Snapshot::Connected { tables } => {
                let line = self.paint(GREEN, "Connection: Healthy");
                writeln!(self.out, "  {}", line)?;
                writeln!(self.out, "{}", RULE)?;
                writeln!(self.out, "  | {:<15} | {:<10} |", "Table", "Row Count")?;
                writeln!(self.out, "{}", RULE)?;
                for stat in tables {
                    writeln!(
                        self.out,
                        "  | {:<15} | {:<10} |",
                        stat.table,
                        stat.count.to_string()
                    )?;
                }
                writeln!(self.out, "{}", RULE)?;
            }
        }

        writeln!(self.out)?;
        self.out.flush()
    }
}

/// One JSON object per line.
///
/// Healthy: `{"timestamp":..,"status":"healthy","tables":{"Users":10,"Comments":null}}`
/// Failed:  `{"timestamp":..,"status":"error","error":".."}`
pub struct JsonRenderer<W: Write> {
    out: W,
}

impl<W: Write> JsonRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[derive(serde::Serialize)]
struct Report<'a> {
    timestamp: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tables: Option<TableMap<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Serializes table stats as an ordered map; unavailable counts become `null`.
struct TableMap<'a>(&'a [TableStat]);

impl Serialize for TableMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|stat| {
            let count = match stat.count {
                TableCount::Count(n) => Some(n),
                TableCount::Unavailable => None,
            };
            (stat.table.as_str(), count)
        }))
    }
}

impl<W: Write> Render for JsonRenderer<W> {
    fn render(&mut self, at: DateTime<Local>, snapshot: &Snapshot) -> io::Result<()> {
        let timestamp = at.to_rfc3339_opts(SecondsFormat::Secs, false);
        let report = match snapshot {
            Snapshot::Connected { tables } => Report {
                timestamp,
                status: "healthy",
                tables: Some(TableMap(tables)),
                error: None,
            },
            Snapshot::ConnectionFailed { error } => Report {
                timestamp,
                status: "error",
                tables: None,
                error: Some(error),
            },
        };

        serde_json::to_writer(&mut self.out, &report)?;
        writeln!(self.out)?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 19, 14, 30, 5).unwrap()
    }

    fn sample() -> Snapshot {
        Snapshot::Connected {
            tables: vec![
                TableStat {
                    table: "Users".to_string(),
                    count: TableCount::Count(10),
                },
                TableStat {
                    table: "Comments".to_string(),
                    count: TableCount::Unavailable,
                },
            ],
        }
    }

    #[test]
    fn text_healthy_block() {
        let mut renderer = TextRenderer::new(Vec::new(), false);
        renderer.render(at(), &sample()).unwrap();
        let out = String::from_utf8(renderer.into_inner()).unwrap();

        let expected = "\
[2026-10-19 14:30:05] Database Status Update:
  Connection: Healthy
  ------------------------------------------------
  | Table           | Row Count  |
  ------------------------------------------------
  | Users           | 10         |
  | Comments        | N/A        |
  ------------------------------------------------

";
        assert_eq!(out, expected);
    }

    #[test]
    fn text_connection_error() {
        let mut renderer = TextRenderer::new(Vec::new(), false);
        let snapshot = Snapshot::ConnectionFailed {
            error: "connection refused".to_string(),
        };
        renderer.render(at(), &snapshot).unwrap();
        let out = String::from_utf8(renderer.into_inner()).unwrap();

        assert_eq!(
            out,
            "[2026-10-19 14:30:05] Database Status Update:\n  Connection Error: connection refused\n\n"
        );
    }

    #[test]
    fn text_colors_only_when_enabled() {
        let mut renderer = TextRenderer::new(Vec::new(), true);
        renderer.render(at(), &sample()).unwrap();
        let out = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(out.contains("\x1b[1;32mConnection: Healthy\x1b[0m"));
    }

    #[test]
    fn json_preserves_table_order_and_nulls() {
        let mut renderer = JsonRenderer::new(Vec::new());
        renderer.render(at(), &sample()).unwrap();
        let out = String::from_utf8(renderer.into_inner()).unwrap();

        assert!(out.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["tables"]["Users"], 10);
        assert!(value["tables"]["Comments"].is_null());
        assert!(value.get("error").is_none());
        assert!(
            value["timestamp"]
                .as_str()
                .unwrap()
                .starts_with("2026-10-19T14:30:05")
        );
        assert!(out.find("\"Users\"").unwrap() < out.find("\"Comments\"").unwrap());
    }

    #[test]
    fn json_connection_error() {
        let mut renderer = JsonRenderer::new(Vec::new());
        let snapshot = Snapshot::ConnectionFailed {
            error: "Access denied for user 'root'".to_string(),
        };
        renderer.render(at(), &snapshot).unwrap();
        let out = String::from_utf8(renderer.into_inner()).unwrap();

        let value: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"], "Access denied for user 'root'");
        assert!(value.get("tables").is_none());
    }
}
