//! The interactive command grammar.
//!
//! One case-insensitive regular expression decides whether a typed
//! line is a command at all; only matching lines are split and
//! dispatched, so malformed input never reaches a handler. The
//! leading slash is optional.

use {
    crate::error::{CoreError, Result},
    meshtalk_proto::Command,
    once_cell::sync::Lazy,
    regex::Regex,
};

static GRAMMAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix) ^ /? (?:
            quit | list | neighbors | plot | getkeypair | help
          | (?: leave | nick | gettopic | getmembers | getpublickey ) \s+ [A-Za-z0-9]+
          | (?: settopic | msg ) \s+ [A-Za-z0-9]+ \s+ .+
          | route (?: \s+ [A-Za-z0-9]+ )?
          | ping \s+ [A-Za-z0-9:.]+
          | join \s+ [A-Za-z0-9]+ \s+ \S+
        ) \s* $",
    )
    .expect("command grammar compiles")
});

/// A validated, split user command.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    /// The command keyword.
    pub command: Command,
    /// First argument (group, nickname, hostname or address).
    pub target: String,
    /// Remaining text (message body, topic, or group key).
    pub text: String,
}

/// Validate a line against the grammar and split it.
pub fn parse_line(line: &str) -> Result<ParsedCommand> {
    let line = line.trim();
    if !GRAMMAR.is_match(line) {
        return Err(CoreError::InvalidCommand);
    }

    let body = line.strip_prefix('/').unwrap_or(line);
    let mut words = body.splitn(2, char::is_whitespace);
    let keyword = words.next().unwrap_or_default();
    let rest = words.next().unwrap_or_default().trim_start();

    let command = Command::from_keyword(keyword).ok_or(CoreError::InvalidCommand)?;
    let (target, text) = match rest.split_once(char::is_whitespace) {
        Some((target, text)) => (target.to_string(), text.trim_start().to_string()),
        None => (rest.to_string(), String::new()),
    };

    Ok(ParsedCommand {
        command,
        target,
        text,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
