//! Built-in control command language.
//!
//! A line holds one or more commands separated by an unquoted `;`. Words are
//! split on whitespace; double quotes group words and a backslash escapes
//! the next character.
//!
//! ```text
//! set greeting "hello world" ; get greeting
//! ping
//! keys
//! ```
//!
//! Commands of a list run in order; the first failure is reported through
//! the error channel and the rest of the list is skipped.

use crate::interpreter::{CommandContext, CommandInterpreter};
use crate::store::ServerState;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Parsed control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping(Option<String>),
    Echo(String),
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    Keys,
    ListClients,
    Stats,
    Version,
    /// Message for the informational channel.
    Notice(String),
}

/// Commands from one line, run in order.
pub type CommandList = Vec<Command>;

/// Why a line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("{0}: wrong number of arguments")]
    WrongArguments(&'static str),
    #[error("unterminated quote")]
    UnterminatedQuote,
    #[error("empty command")]
    Empty,
}

/// Split a line into commands, each a list of words.
fn tokenize(line: &str) -> Result<Vec<Vec<String>>, ParseError> {
    let mut commands = Vec::new();
    let mut words = Vec::new();
    let mut word: Option<String> = None;
    let mut in_quote = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().unwrap_or('\\');
                word.get_or_insert_with(String::new).push(escaped);
            }
            '"' => {
                in_quote = !in_quote;
                if word.is_none() {
                    word = Some(String::new());
                }
            }
            ';' if !in_quote => {
                words.extend(word.take());
                if !words.is_empty() {
                    commands.push(std::mem::take(&mut words));
                }
            }
            c if c.is_whitespace() && !in_quote => {
                words.extend(word.take());
            }
            c => word.get_or_insert_with(String::new).push(c),
        }
    }

    if in_quote {
        return Err(ParseError::UnterminatedQuote);
    }
    words.extend(word.take());
    if !words.is_empty() {
        commands.push(words);
    }
    if commands.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(commands)
}

/// Build a command from its words.
fn parse_command(words: &[String]) -> Result<Command, ParseError> {
    let (name, args) = match words.split_first() {
        Some((name, args)) => (name.as_str(), args),
        None => return Err(ParseError::Empty),
    };

    let command = match name {
        "ping" => Command::Ping((!args.is_empty()).then(|| args.join(" "))),
        "echo" => Command::Echo(args.join(" ")),
        "set" => match args {
            [key, value] => Command::Set {
                key: key.clone(),
                value: value.clone(),
            },
            _ => return Err(ParseError::WrongArguments("set")),
        },
        "get" => match args {
            [key] => Command::Get { key: key.clone() },
            _ => return Err(ParseError::WrongArguments("get")),
        },
        "delete" => match args {
            [key] => Command::Delete { key: key.clone() },
            _ => return Err(ParseError::WrongArguments("delete")),
        },
        "keys" => no_args(args, "keys", Command::Keys)?,
        "list-clients" => no_args(args, "list-clients", Command::ListClients)?,
        "stats" => no_args(args, "stats", Command::Stats)?,
        "version" => no_args(args, "version", Command::Version)?,
        "notice" if !args.is_empty() => Command::Notice(args.join(" ")),
        "notice" => return Err(ParseError::WrongArguments("notice")),
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };

    Ok(command)
}

fn no_args(args: &[String], name: &'static str, command: Command) -> Result<Command, ParseError> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(ParseError::WrongArguments(name))
    }
}

/// Parse a full control line.
pub fn parse_line(line: &str) -> Result<CommandList, ParseError> {
    tokenize(line)?
        .iter()
        .map(|words| parse_command(words))
        .collect()
}

/// Interpreter for the built-in commands, backed by shared server state.
#[derive(Debug, Clone)]
pub struct Builtins {
    state: Arc<ServerState>,
}

impl Builtins {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    /// Run one command. `Err` carries the text for the error channel.
    fn run(&self, command: &Command, ctx: &mut CommandContext<'_>) -> Result<(), String> {
        match command {
            Command::Ping(None) => ctx.print("pong"),
            Command::Ping(Some(msg)) => ctx.print(&format!("pong {msg}")),
            Command::Echo(text) => ctx.print(text),
            Command::Set { key, value } => {
                self.state.store.set(key, value);
            }
            Command::Get { key } => match self.state.store.get(key) {
                Some(value) => ctx.print(&value),
                None => return Err(format!("no such key: {key}")),
            },
            Command::Delete { key } => {
                if !self.state.store.delete(key) {
                    return Err(format!("no such key: {key}"));
                }
            }
            Command::Keys => {
                for key in self.state.store.keys() {
                    ctx.print(&key);
                }
            }
            Command::ListClients => {
                let current = ctx.client_id();
                for (id, info) in self.state.clients() {
                    let marker = if id == current { " (this)" } else { "" };
                    ctx.print(&format!(
                        "{id}: {} [{}]{marker}",
                        info.peer,
                        info.connected_at.to_rfc3339()
                    ));
                }
            }
            Command::Stats => {
                let stats = self.state.stats();
                ctx.print(&format!("STAT uptime {}", stats.uptime_secs));
                ctx.print(&format!("STAT curr_clients {}", stats.curr_clients));
                ctx.print(&format!("STAT total_connections {}", stats.total_connections));
                ctx.print(&format!("STAT commands {}", stats.commands));
                ctx.print(&format!("STAT parse_errors {}", stats.parse_errors));
                ctx.print(&format!("STAT discarded_lines {}", stats.discarded_lines));
                ctx.print(&format!("STAT keys {}", stats.keys));
            }
            Command::Version => ctx.print(&format!(
                "{} {} (started {})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                self.state.started_at().to_rfc3339()
            )),
            Command::Notice(text) => ctx.info(text),
        }
        Ok(())
    }
}

impl CommandInterpreter for Builtins {
    type Commands = CommandList;
    type Error = ParseError;

    fn parse(&self, line: &str) -> Result<CommandList, ParseError> {
        parse_line(line)
    }

    fn execute(&mut self, commands: &CommandList, ctx: &mut CommandContext<'_>) {
        for command in commands {
            trace!(client = %ctx.client_id(), ?command, "Executing command");
            self.state.counters.commands.fetch_add(1, Ordering::Relaxed);
            if let Err(message) = self.run(command, ctx) {
                ctx.error(&message);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, ClientId};
    use crate::output::ControlReplies;

    fn run_line(builtins: &mut Builtins, client: &mut Client, line: &str) {
        let commands = builtins.parse(line).unwrap();
        let replies = ControlReplies;
        let mut ctx = CommandContext::new(client, &replies);
        builtins.execute(&commands, &mut ctx);
    }

    fn output(client: &mut Client) -> String {
        String::from_utf8(client.outbound_mut().take().to_vec()).unwrap()
    }

    #[test]
    fn test_parse_simple() {
        assert_eq!(parse_line("ping").unwrap(), vec![Command::Ping(None)]);
        assert_eq!(
            parse_line("  ping   hello  there ").unwrap(),
            vec![Command::Ping(Some("hello there".to_string()))]
        );
        assert_eq!(parse_line("keys").unwrap(), vec![Command::Keys]);
    }

    #[test]
    fn test_parse_quotes_and_escapes() {
        assert_eq!(
            parse_line(r#"set greeting "hello world""#).unwrap(),
            vec![Command::Set {
                key: "greeting".to_string(),
                value: "hello world".to_string(),
            }]
        );
        assert_eq!(
            parse_line(r#"set empty """#).unwrap(),
            vec![Command::Set {
                key: "empty".to_string(),
                value: String::new(),
            }]
        );
        assert_eq!(
            parse_line(r"echo a\;b").unwrap(),
            vec![Command::Echo("a;b".to_string())]
        );
    }

    #[test]
    fn test_parse_command_list() {
        assert_eq!(
            parse_line("set k v; get k ;; keys").unwrap(),
            vec![
                Command::Set {
                    key: "k".to_string(),
                    value: "v".to_string(),
                },
                Command::Get {
                    key: "k".to_string()
                },
                Command::Keys,
            ]
        );
        // Quoted separator is data
        assert_eq!(
            parse_line(r#"echo "a ; b""#).unwrap(),
            vec![Command::Echo("a ; b".to_string())]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_line("unknowncmd"),
            Err(ParseError::UnknownCommand("unknowncmd".to_string()))
        );
        assert_eq!(
            parse_line("get"),
            Err(ParseError::WrongArguments("get"))
        );
        assert_eq!(
            parse_line("stats now"),
            Err(ParseError::WrongArguments("stats"))
        );
        assert_eq!(parse_line(r#"echo "open"#), Err(ParseError::UnterminatedQuote));
        assert_eq!(parse_line(" ; "), Err(ParseError::Empty));
        assert_eq!(
            ParseError::UnknownCommand("x".to_string()).to_string(),
            "unknown command: x"
        );
    }

    #[test]
    fn test_execute_store_commands() {
        let state = ServerState::new(4);
        let mut builtins = Builtins::new(Arc::clone(&state));
        let mut client = Client::new(ClientId(0));

        run_line(&mut builtins, &mut client, "set a 1 ; set b 2 ; get a");
        assert_eq!(output(&mut client), "1\n");

        run_line(&mut builtins, &mut client, "keys");
        assert_eq!(output(&mut client), "a\nb\n");

        run_line(&mut builtins, &mut client, "delete a ; get a");
        assert_eq!(output(&mut client), "no such key: a\n");
        assert_eq!(state.store.keys(), vec!["b"]);
    }

    #[test]
    fn test_execute_stops_at_first_failure() {
        let state = ServerState::new(4);
        let mut builtins = Builtins::new(state);
        let mut client = Client::new(ClientId(0));

        run_line(&mut builtins, &mut client, "get missing ; echo after");
        assert_eq!(output(&mut client), "no such key: missing\n");
    }

    #[test]
    fn test_notice_is_silent() {
        let state = ServerState::new(4);
        let mut builtins = Builtins::new(state);
        let mut client = Client::new(ClientId(0));

        run_line(&mut builtins, &mut client, "notice hello ; ping");
        assert_eq!(output(&mut client), "pong\n");
    }

    #[test]
    fn test_list_clients_marks_current() {
        let state = ServerState::new(4);
        let other = state.register("10.0.0.1:4000").unwrap();
        let me = state.register("stdio").unwrap();
        let mut builtins = Builtins::new(Arc::clone(&state));
        let mut client = Client::new(me);

        run_line(&mut builtins, &mut client, "list-clients");
        let text = output(&mut client);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(&format!("{other}: 10.0.0.1:4000 [")));
        assert!(!lines[0].ends_with("(this)"));
        assert!(lines[1].starts_with(&format!("{me}: stdio [")));
        assert!(lines[1].ends_with("(this)"));
    }

    #[test]
    fn test_stats_counts_commands() {
        let state = ServerState::new(4);
        let mut builtins = Builtins::new(Arc::clone(&state));
        let mut client = Client::new(ClientId(0));

        run_line(&mut builtins, &mut client, "set k v ; stats");
        let text = output(&mut client);
        assert!(text.contains("STAT commands 2\n"));
        assert!(text.contains("STAT keys 1\n"));
    }
}
