//! Interactive REPL (Read-Eval-Print Loop).
//!
//! Dot-commands map one to one onto capture file operations; any other
//! input is applied as the display filter.

use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, Result as RlResult};

/// REPL commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Quit,
    /// Open a capture file and read it
    Open(String),
    Close,
    Reload,
    /// File-level information
    Info,
    /// List displayed packets, optionally only the first N
    List(Option<usize>),
    /// Apply a display filter; empty clears it
    Filter(String),
    /// Set the read filter for the next open or reload
    ReadFilter(String),
    Goto(u64),
    /// Protocol tree and bytes of a packet
    Show(u64),
    Hexdump(u64),
    /// Search, `KIND:VALUE`
    Find(String),
    Next,
    Previous,
    Mark(u64, bool),
    Ignore(u64, bool),
    TimeRef(u64, bool),
    /// Set (with text) or clear (without) a packet comment
    Comment(u64, Option<String>),
    Redissect,
    /// Protocol statistics
    Stats,
    /// Save to a file, optional format name
    Save(String, Option<String>),
    /// Export a range: file, range, optional format name
    Export(String, String, Option<String>),
    /// Write the summary lines: file, optional summary format
    Summary(String, Option<String>),
    Unknown(String),
    Empty,
}

fn frame_arg(command: &str, rest: &str, build: impl FnOnce(u64) -> ReplCommand) -> ReplCommand {
    if rest.is_empty() {
        return ReplCommand::Unknown(format!("{command} requires a packet number"));
    }
    match rest.parse::<u64>() {
        Ok(num) => build(num),
        Err(_) => ReplCommand::Unknown(format!("Invalid packet number: {rest}")),
    }
}

impl ReplCommand {
    /// Parse a line of input into a command.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return ReplCommand::Empty;
        }
        if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit") {
            return ReplCommand::Quit;
        }
        if !trimmed.starts_with('.') {
            return ReplCommand::Filter(trimmed.to_string());
        }

        let (command, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((c, r)) => (c, r.trim()),
            None => (trimmed, ""),
        };
        let lower = command.to_lowercase();
        let mut words = rest.split_whitespace();

        match lower.as_str() {
            ".help" | ".h" | ".?" => ReplCommand::Help,
            ".quit" | ".exit" | ".q" => ReplCommand::Quit,
            ".open" | ".o" if !rest.is_empty() => ReplCommand::Open(rest.to_string()),
            ".open" | ".o" => ReplCommand::Unknown(".open requires a filename".to_string()),
            ".close" => ReplCommand::Close,
            ".reload" => ReplCommand::Reload,
            ".info" | ".i" => ReplCommand::Info,
            ".list" | ".l" => match rest {
                "" => ReplCommand::List(None),
                n => match n.parse() {
                    Ok(n) => ReplCommand::List(Some(n)),
                    Err(_) => ReplCommand::Unknown(format!("Invalid count: {n}")),
                },
            },
            ".filter" | ".f" => ReplCommand::Filter(rest.to_string()),
            ".rfilter" => ReplCommand::ReadFilter(rest.to_string()),
            ".goto" | ".g" => frame_arg(".goto", rest, ReplCommand::Goto),
            ".show" => frame_arg(".show", rest, ReplCommand::Show),
            ".hexdump" => frame_arg(".hexdump", rest, ReplCommand::Hexdump),
            ".find" if !rest.is_empty() => ReplCommand::Find(rest.to_string()),
            ".find" => ReplCommand::Unknown(".find requires KIND:VALUE".to_string()),
            ".next" | ".n" => ReplCommand::Next,
            ".prev" | ".p" => ReplCommand::Previous,
            ".mark" => frame_arg(".mark", rest, |n| ReplCommand::Mark(n, true)),
            ".unmark" => frame_arg(".unmark", rest, |n| ReplCommand::Mark(n, false)),
            ".ignore" => frame_arg(".ignore", rest, |n| ReplCommand::Ignore(n, true)),
            ".unignore" => frame_arg(".unignore", rest, |n| ReplCommand::Ignore(n, false)),
            ".ref" => frame_arg(".ref", rest, |n| ReplCommand::TimeRef(n, true)),
            ".unref" => frame_arg(".unref", rest, |n| ReplCommand::TimeRef(n, false)),
            ".comment" => {
                let (num, text) = match rest.split_once(char::is_whitespace) {
                    Some((n, t)) => (n, Some(t.trim().to_string())),
                    None => (rest, None),
                };
                frame_arg(".comment", num, |n| ReplCommand::Comment(n, text))
            }
            ".redissect" => ReplCommand::Redissect,
            ".stats" => ReplCommand::Stats,
            ".save" => match (words.next(), words.next()) {
                (Some(file), format) => ReplCommand::Save(file.to_string(), format.map(str::to_string)),
                (None, _) => ReplCommand::Unknown(".save requires a filename".to_string()),
            },
            ".export" => match (words.next(), words.next(), words.next()) {
                (Some(file), Some(range), format) => {
                    ReplCommand::Export(file.to_string(), range.to_string(), format.map(str::to_string))
                }
                _ => ReplCommand::Unknown(".export requires a filename and a range".to_string()),
            },
            ".summary" => match (words.next(), words.next()) {
                (Some(file), format) => ReplCommand::Summary(file.to_string(), format.map(str::to_string)),
                (None, _) => ReplCommand::Unknown(".summary requires a filename".to_string()),
            },
            _ => ReplCommand::Unknown(trimmed.to_string()),
        }
    }

    /// Check if this is a quit command.
    pub fn is_quit(&self) -> bool {
        matches!(self, ReplCommand::Quit)
    }
}

/// Input from the REPL - either a command or a request to quit.
#[derive(Debug)]
pub enum ReplInput {
    /// User provided input
    Command(ReplCommand),
    /// User pressed Ctrl-D or Ctrl-C
    Exit,
}

/// Line editor with history.
pub struct Repl {
    editor: DefaultEditor,
    history_file: Option<String>,
}

impl Repl {
    pub fn new() -> RlResult<Self> {
        let editor = DefaultEditor::new()?;
        Ok(Self {
            editor,
            history_file: None,
        })
    }

    /// Set the history file path.
    pub fn with_history(mut self, path: &str) -> Self {
        self.history_file = Some(path.to_string());
        if let Err(e) = self.editor.load_history(path) {
            tracing::debug!("Could not load history: {}", e);
        }
        self
    }

    /// Read one command.
    pub fn read_input(&mut self) -> RlResult<ReplInput> {
        match self.editor.readline("capfile> ") {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(&line);
                }
                Ok(ReplInput::Command(ReplCommand::parse(&line)))
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => Ok(ReplInput::Exit),
            Err(e) => Err(e),
        }
    }

    /// Save history to file.
    pub fn save_history(&mut self) {
        if let Some(ref path) = self.history_file {
            if let Err(e) = self.editor.save_history(path) {
                tracing::debug!("Could not save history: {}", e);
            }
        }
    }
}

impl Drop for Repl {
    fn drop(&mut self) {
        self.save_history();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ReplCommand::parse(".help"), ReplCommand::Help);
        assert_eq!(ReplCommand::parse(".H"), ReplCommand::Help);
        assert_eq!(ReplCommand::parse(".quit"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("exit"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse(""), ReplCommand::Empty);
        assert_eq!(ReplCommand::parse(".list"), ReplCommand::List(None));
        assert_eq!(ReplCommand::parse(".list 20"), ReplCommand::List(Some(20)));
        assert!(matches!(ReplCommand::parse(".unknown"), ReplCommand::Unknown(_)));
    }

    #[test]
    fn test_bare_input_is_a_filter() {
        assert_eq!(
            ReplCommand::parse("tcp port 80"),
            ReplCommand::Filter("tcp port 80".to_string())
        );
        assert_eq!(ReplCommand::parse(".filter"), ReplCommand::Filter(String::new()));
    }

    #[test]
    fn test_frame_number_arguments() {
        assert_eq!(ReplCommand::parse(".goto 42"), ReplCommand::Goto(42));
        assert_eq!(ReplCommand::parse(".hexdump 1"), ReplCommand::Hexdump(1));
        assert_eq!(ReplCommand::parse(".unmark 3"), ReplCommand::Mark(3, false));
        assert!(matches!(ReplCommand::parse(".goto"), ReplCommand::Unknown(_)));
        assert!(matches!(ReplCommand::parse(".show abc"), ReplCommand::Unknown(_)));
    }

    #[test]
    fn test_parse_comment() {
        assert_eq!(
            ReplCommand::parse(".comment 7 retransmission here"),
            ReplCommand::Comment(7, Some("retransmission here".to_string()))
        );
        assert_eq!(ReplCommand::parse(".comment 7"), ReplCommand::Comment(7, None));
    }

    #[test]
    fn test_parse_save_and_export() {
        assert_eq!(
            ReplCommand::parse(".save out.pcap pcap"),
            ReplCommand::Save("out.pcap".to_string(), Some("pcap".to_string()))
        );
        assert_eq!(
            ReplCommand::parse(".export out.pcapng 1-10"),
            ReplCommand::Export("out.pcapng".to_string(), "1-10".to_string(), None)
        );
        assert!(matches!(ReplCommand::parse(".export out.pcapng"), ReplCommand::Unknown(_)));
        assert!(matches!(ReplCommand::parse(".save"), ReplCommand::Unknown(_)));
    }
}
