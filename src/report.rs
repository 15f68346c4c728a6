//! Step report files: a type line, a tab-separated header line and one or
//! more tab-separated data rows.

use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::{Result, TflowError};

pub const SEPARATOR: &str = "\t";
/// Written for a column a report has no value for.
pub const NULL_FIELD: &str = "-";
/// Used for every part of a report that cannot be read.
pub const UNAVAILABLE: &str = "N/A";

const SEQUENCE_HEADERS: &[&str] = &["Count", "Len", "Av.Len", "SRange", "ERange", "Median", "N50"];
const RECAPTURE_HEADERS: &[&str] = &["Analys.", "Cutoff", "Expect.", "Found", "Missing", "Total", "Percent"];
const ANNOTATION_HEADERS: &[&str] = &["Analys.", "Cutoff", "Seqs.", "Records", "Remapd."];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Sequence,
    Recapture,
    Annotation,
    Unknown,
}

impl ReportKind {
    /// The first line of a report of this kind.
    pub fn title(self) -> &'static str {
        match self {
            ReportKind::Sequence => "SEQUENCE FILE REPORT",
            ReportKind::Recapture => "GENE RECAPTURE REPORT",
            ReportKind::Annotation => "SEQUENCE ANNOTATION REPORT",
            ReportKind::Unknown => "UNKNOWN REPORT TYPE",
        }
    }

    /// Fixed column headers, or `None` when columns come from the keys.
    pub fn headers(self) -> Option<&'static [&'static str]> {
        match self {
            ReportKind::Sequence => Some(SEQUENCE_HEADERS),
            ReportKind::Recapture => Some(RECAPTURE_HEADERS),
            ReportKind::Annotation => Some(ANNOTATION_HEADERS),
            ReportKind::Unknown => None,
        }
    }
}

/// One report row keyed by column header.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub kind: ReportKind,
    pub fields: BTreeMap<String, String>,
}

impl Report {
    pub fn new(kind: ReportKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    fn row(&self, headers: &[String]) -> String {
        headers
            .iter()
            .map(|h| self.fields.get(h).map(String::as_str).unwrap_or(NULL_FIELD))
            .collect::<Vec<_>>()
            .join(SEPARATOR)
    }
}

/// Render `report` plus any auxiliary rows. Columns outside the fixed
/// header set go into an `Additional Information:` block.
pub fn render_report(report: &Report, aux: &[Report]) -> String {
    let headers: Vec<String> = match report.kind.headers() {
        Some(fixed) => fixed.iter().map(|h| h.to_string()).collect(),
        None => report.fields.keys().cloned().collect(),
    };
    let reports: Vec<&Report> = std::iter::once(report).chain(aux.iter()).collect();

    let mut out = String::new();
    out.push_str(report.kind.title());
    out.push('\n');
    out.push_str(&headers.join(SEPARATOR));
    out.push('\n');
    for r in &reports {
        out.push_str(&r.row(&headers));
        out.push('\n');
    }

    let mut additional: Vec<String> = Vec::new();
    for r in &reports {
        for key in r.fields.keys() {
            if !headers.contains(key) && !additional.contains(key) {
                additional.push(key.clone());
            }
        }
    }
    if !additional.is_empty() {
        out.push_str("\nAdditional Information:\n");
        out.push_str(&additional.join(SEPARATOR));
        out.push('\n');
        for r in &reports {
            out.push_str(&r.row(&additional));
            out.push('\n');
        }
    }

    out
}

pub fn write_report(path: &Path, report: &Report, aux: &[Report]) -> Result<()> {
    std::fs::write(path, render_report(report, aux)).map_err(|e| TflowError::io(path, e))
}

/// The three parts of a report's first block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRecord {
    pub title: String,
    pub header: String,
    pub data: String,
}

impl ReportRecord {
    fn unavailable() -> Self {
        Self {
            title: UNAVAILABLE.to_string(),
            header: UNAVAILABLE.to_string(),
            data: UNAVAILABLE.to_string(),
        }
    }
}

/// Parse the first block of a report. Two lines mean an untyped report;
/// three or more give type, header and the first data row. Anything
/// shorter yields `N/A` fields.
pub fn read_report(text: &str) -> ReportRecord {
    let block: Vec<&str> = text
        .trim_start_matches('\n')
        .lines()
        .take_while(|line| !line.trim().is_empty())
        .collect();

    match block.as_slice() {
        [header, data] => ReportRecord {
            title: ReportKind::Unknown.title().to_string(),
            header: header.to_string(),
            data: data.to_string(),
        },
        [title, header, data, ..] => ReportRecord {
            title: title.to_string(),
            header: header.to_string(),
            data: data.to_string(),
        },
        other => {
            tracing::warn!(
                "Report not formatted correctly, {} lines detected",
                other.len()
            );
            ReportRecord::unavailable()
        }
    }
}

pub fn read_report_file(path: &Path) -> Result<ReportRecord> {
    let text = std::fs::read_to_string(path).map_err(|e| TflowError::io(path, e))?;
    Ok(read_report(&text))
}

/// Merge named reports into one table. A section header is emitted each
/// time the report type changes and a column line each time the header
/// changes; report names are cut to seven characters.
pub fn combine_reports(reports: &[(String, ReportRecord)], separator: &str) -> String {
    let mut out = String::new();
    let mut last_title: Option<&str> = None;
    let mut last_header: Option<String> = None;

    for (name, record) in reports {
        let header = record.header.replace(SEPARATOR, separator);
        if last_title != Some(record.title.as_str()) {
            out.push_str(&format!("\n{}S\nReport{}{}\n", record.title, separator, header));
            last_title = Some(record.title.as_str());
            last_header = Some(header);
        } else if last_header.as_deref() != Some(header.as_str()) {
            out.push_str(&format!("\nReport{}{}\n", separator, header));
            last_header = Some(header);
        }
        let short: String = name.chars().take(7).collect();
        out.push_str(&format!(
            "{}{}{}\n",
            short,
            separator,
            record.data.replace(SEPARATOR, separator)
        ));
    }

    out.trim_start().to_string()
}
