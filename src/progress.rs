/// Progress sink handed to transforms.
///
/// Every message is kept (so callers and tests can inspect what a run
/// reported) and forwarded to the `log` facade at info level, prefixed
/// with the name of the running node.

#[derive(Debug, Clone, Default)]
pub struct ProgressInfo {
    prefix: String,
    lines: Vec<String>,
}

impl ProgressInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose messages are prefixed with `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        ProgressInfo {
            prefix: prefix.into(),
            lines: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        let line = if self.prefix.is_empty() {
            message
        } else {
            format!("{} | {}", self.prefix, message)
        };
        log::info!("{}", line);
        self.lines.push(line);
    }

    /// All messages logged so far, with their prefix.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// True when any logged line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_records_lines() {
        let mut progress = ProgressInfo::new();
        progress.log("started");
        progress.set_prefix("Pivot table");
        progress.log("Input table is empty! Skipping.");

        assert_eq!(
            progress.lines(),
            &["started", "Pivot table | Input table is empty! Skipping."]
        );
        assert!(progress.contains("Skipping"));

        progress.clear();
        assert!(progress.lines().is_empty());
    }
}
