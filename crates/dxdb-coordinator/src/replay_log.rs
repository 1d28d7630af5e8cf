//! Session-altering commands issued in the current transaction

pub const STATEMENT_TERMINATOR: char = ';';

/// Make sure `command` ends with a statement terminator.
///
/// Trailing whitespace is dropped first so `"SET a = 1; "` is left as a
/// single statement.
pub fn normalize_command(command: &str) -> String {
    let trimmed = command.trim_end();
    if trimmed.ends_with(STATEMENT_TERMINATOR) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{STATEMENT_TERMINATOR}")
    }
}

/// Append-only, ordered record of broadcast commands.
///
/// Replaying it in order against a fresh connection reproduces the session
/// state of every connection already enlisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReplayLog {
    commands: Vec<String>,
}

impl SessionReplayLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize and append `command`, returning the stored form.
    pub fn append(&mut self, command: &str) -> &str {
        self.commands.push(normalize_command(command));
        self.commands.last().map(String::as_str).unwrap_or_default()
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(String::as_str)
    }

    /// The whole log as one multi-statement script
    pub fn to_script(&self) -> String {
        self.commands.concat()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_missing_terminator() {
        assert_eq!(
            normalize_command("SET statement_timeout = 5000"),
            "SET statement_timeout = 5000;"
        );
        assert_eq!(normalize_command("SET x=1;"), "SET x=1;");
        assert_eq!(normalize_command("SET x=1;  \n"), "SET x=1;");
        assert_eq!(normalize_command("SET x=1 \t"), "SET x=1;");
    }

    #[test]
    fn test_log_keeps_order() {
        let mut log = SessionReplayLog::new();
        assert!(log.is_empty());
        assert_eq!(log.append("SET a = 1"), "SET a = 1;");
        log.append("SET b = 2;");
        log.append("RESET a");

        assert_eq!(log.len(), 3);
        assert_eq!(log.commands(), ["SET a = 1;", "SET b = 2;", "RESET a;"]);
        assert_eq!(log.to_script(), "SET a = 1;SET b = 2;RESET a;");
        assert!(log.iter().all(|c| c.ends_with(STATEMENT_TERMINATOR)));
    }
}
