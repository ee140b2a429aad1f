//! Operator facing console output

use crate::events::SyncEvent;
use crate::task::{LogEntry, LogLevel};
use std::io::{self, Write};
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct OutputManager {
    pub verbose: bool,
    quiet: bool,
    start_time: Instant,
}

impl OutputManager {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            start_time: Instant::now(),
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            start_time: Instant::now(),
        }
    }

    pub fn verbose(&self, message: &str) {
        if self.verbose {
            self.print_with_timestamp("INFO", message, "ℹ️");
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            self.print_with_timestamp("INFO", message, "ℹ️");
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            self.print_with_timestamp("SUCCESS", message, "✅");
        }
    }

    pub fn warning(&self, message: &str) {
        self.print_with_timestamp("WARN", message, "⚠️");
    }

    pub fn error(&self, message: &str) {
        self.print_with_timestamp("ERROR", message, "❌");
    }

    pub fn section(&self, title: &str) {
        if self.quiet {
            return;
        }

        if self.verbose {
            let separator = "━".repeat(60);
            println!("\n{}", separator);
            println!("📋 {}", title);
            println!("{}", separator);
        } else {
            println!("\n📋 {}", title);
        }
    }

    pub fn detail(&self, detail: &str) {
        if self.verbose {
            println!("      📝 {}", detail);
        }
    }

    /// One task log line, at the level it was recorded with
    pub fn log_entry(&self, entry: &LogEntry) {
        match entry.level {
            LogLevel::Info => self.info(&entry.message),
            LogLevel::Success => self.success(&entry.message),
            LogLevel::Warning => self.warning(&entry.message),
            LogLevel::Error => self.error(&entry.message),
        }
    }

    /// Progress bar line for a sync task
    pub fn task_progress(&self, current: usize, total: usize, image: &str) {
        if self.quiet {
            return;
        }

        let percentage = if total > 0 {
            (current as f64 / total as f64) * 100.0
        } else {
            100.0
        };

        if self.verbose {
            println!("📊 Progress: {:.1}% ({} / {}) | last: {}", percentage, current, total, image);
        } else {
            print!("\r⏳ Progress: {:.1}% ({}/{})    ", percentage, current, total);
            let _ = io::stdout().flush();
            if current >= total {
                println!();
            }
        }
    }

    /// Render an engine event
    pub fn event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::Log { log, .. } => self.log_entry(log),
            SyncEvent::Progress {
                progress,
                total,
                current_image,
                status,
                ..
            } => {
                if status.is_terminal() {
                    self.verbose(&format!("Task {}", status));
                } else if *progress > 0 {
                    self.task_progress(*progress, *total, current_image);
                }
            }
        }
    }

    fn print_with_timestamp(&self, level: &str, message: &str, emoji: &str) {
        let timestamp = format!("[{:8.3}s]", self.start_time.elapsed().as_secs_f64());

        if self.verbose {
            println!("{} {} {} {}", timestamp, emoji, level, message);
        } else {
            println!("{} {}", emoji, message);
        }
    }

    pub fn format_size(&self, size: u64) -> String {
        format_size(size)
    }

    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{:.1}s", duration.as_secs_f64())
        } else if secs < 3600 {
            format!("{}m{:02}s", secs / 60, secs % 60)
        } else {
            format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }

    pub fn summary(&self, title: &str, items: &[(&str, String)]) {
        if self.quiet {
            return;
        }

        println!("\n📊 {}", title);
        for (key, value) in items {
            println!("  • {}: {}", key, value);
        }
    }

    pub fn elapsed_time(&self) -> String {
        self.format_duration(self.start_time.elapsed())
    }
}

/// Human readable byte count, binary units
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_duration() {
        let output = OutputManager::new_quiet();
        assert_eq!(output.format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(output.format_duration(Duration::from_secs(125)), "2m05s");
        assert_eq!(output.format_duration(Duration::from_secs(3725)), "1h02m05s");
    }

    #[test]
    fn test_elapsed_time_since_creation() {
        let output = OutputManager::new(false);
        assert!(output.elapsed_time().ends_with('s'));
    }
}
