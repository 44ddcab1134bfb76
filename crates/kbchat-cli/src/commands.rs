/// A line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// Anything that is not a command is sent as-is.
    Message(String),
    New,
    List,
    /// 1-based position in the `/list` output.
    Switch(usize),
    Errors,
    Help,
    Quit,
    Invalid(String),
}

pub const HELP: &str = "\
Type a question and press Enter to ask the assistant.
While waiting for an answer, Ctrl-C cancels the request.

  /new          start a new conversation
  /list         list conversations
  /switch <n>   switch to conversation <n> from /list
  /errors       show recent warnings and errors
  /help         show this help
  exit, quit    leave";

pub fn parse(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
        return Command::Quit;
    }

    let Some(rest) = trimmed.strip_prefix('/') else {
        return Command::Message(line.to_string());
    };

    let mut parts = rest.split_whitespace();
    match parts.next().unwrap_or_default() {
        "new" => Command::New,
        "list" => Command::List,
        "switch" => match parts.next().and_then(|n| n.parse::<usize>().ok()) {
            Some(n) if n > 0 => Command::Switch(n),
            _ => Command::Invalid("Usage: /switch <n>".to_string()),
        },
        "errors" => Command::Errors,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => Command::Invalid(format!("Unknown command: /{other}. Type /help.")),
    }
}
