use std::fmt;

use chrono::{DateTime, Utc};
use colored::Colorize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEntry {
    Applied(String),
    Skipped(String),
    Warning(String),
}

/// What an operation did on chain, in order, for operators to read.
#[derive(Debug, Clone, Default)]
pub struct OperationReport {
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub entries: Vec<ReportEntry>,
}

impl OperationReport {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            started_at: Utc::now(),
            entries: vec![],
        }
    }

    pub fn report_applied(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}: {}", self.title, message);
        self.entries.push(ReportEntry::Applied(message));
    }

    pub fn report_skipped(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::debug!("{}: skipped {}", self.title, message);
        self.entries.push(ReportEntry::Skipped(message));
    }

    pub fn report_warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}: {}", self.title, message);
        self.entries.push(ReportEntry::Warning(message));
    }

    pub fn applied(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                ReportEntry::Applied(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn applied_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, ReportEntry::Applied(_)))
            .count()
    }
}

impl fmt::Display for OperationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {}",
            format!("== {} ==", self.title).bold(),
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed()
        )?;
        for entry in &self.entries {
            match entry {
                ReportEntry::Applied(message) => writeln!(f, "{} {}", "[APPLIED]".green(), message)?,
                ReportEntry::Skipped(message) => writeln!(f, "{} {}", "[SKIPPED]".dimmed(), message)?,
                ReportEntry::Warning(message) => writeln!(f, "{} {}", "[WARN]".yellow(), message)?,
            }
        }
        write!(
            f,
            "{} applied, {} entries total",
            self.applied_count(),
            self.entries.len()
        )
    }
}
