//! Line console for driving a headless fleet from stdin.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `login <name> <node> [permission,...]`
    Login {
        name: String,
        node: String,
        permissions: Vec<String>,
    },
    Logout { name: String },
    /// `move <name> <node>`
    Move { name: String, node: String },
    /// `as <name> <command line>`
    As { name: String, line: String },
    Respawn { name: String },
    List,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    #[error("unknown console command '{0}', try 'help'")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

pub const HELP: &str = "\
login <name> <node> [perm,...]  connect a player
logout <name>                   disconnect a player
move <name> <node>              switch a player to another node
as <name> <command line>        run a command as a player, e.g. as Alice /warp hub
respawn <name>                  report a respawn
list                            show sessions
quit                            stop the proxy";

impl ConsoleCommand {
    /// Parses one console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, ConsoleError> {
        let line = line.trim();
        let Some((verb, rest)) = split_word(line) else {
            return Ok(None);
        };

        let command = match verb.to_lowercase().as_str() {
            "login" => {
                let usage = ConsoleError::Usage("login <name> <node> [perm,...]");
                let (name, rest) = split_word(rest).ok_or_else(|| usage.clone())?;
                let (node, rest) = split_word(rest).ok_or(usage)?;
                let permissions = rest
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
                ConsoleCommand::Login {
                    name: name.to_string(),
                    node: node.to_string(),
                    permissions,
                }
            }
            "logout" => ConsoleCommand::Logout {
                name: word(rest, "logout <name>")?,
            },
            "move" => {
                let (name, rest) = split_word(rest).ok_or(ConsoleError::Usage("move <name> <node>"))?;
                ConsoleCommand::Move {
                    name: name.to_string(),
                    node: word(rest, "move <name> <node>")?,
                }
            }
            "as" => {
                let usage = ConsoleError::Usage("as <name> <command line>");
                let (name, line) = split_word(rest).ok_or_else(|| usage.clone())?;
                if line.is_empty() {
                    return Err(usage);
                }
                ConsoleCommand::As {
                    name: name.to_string(),
                    line: line.to_string(),
                }
            }
            "respawn" => ConsoleCommand::Respawn {
                name: word(rest, "respawn <name>")?,
            },
            "list" => ConsoleCommand::List,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(ConsoleError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

/// Splits off the first word; the remainder is trimmed.
fn split_word(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    match text.split_once(char::is_whitespace) {
        Some((first, rest)) => Some((first, rest.trim())),
        None => Some((text, "")),
    }
}

fn word(text: &str, usage: &'static str) -> Result<String, ConsoleError> {
    split_word(text)
        .map(|(first, _)| first.to_string())
        .ok_or(ConsoleError::Usage(usage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_with_permissions() {
        let parsed = ConsoleCommand::parse("login Alice node1 admin, warp.set").unwrap();
        assert_eq!(
            parsed,
            Some(ConsoleCommand::Login {
                name: "Alice".to_string(),
                node: "node1".to_string(),
                permissions: vec!["admin".to_string(), "warp.set".to_string()],
            })
        );
    }

    #[test]
    fn test_as_keeps_the_whole_line() {
        let parsed = ConsoleCommand::parse("as Bob   /tppos node2 world 1 2 3").unwrap();
        assert_eq!(
            parsed,
            Some(ConsoleCommand::As {
                name: "Bob".to_string(),
                line: "/tppos node2 world 1 2 3".to_string(),
            })
        );
    }

    #[test]
    fn test_blank_and_bad_lines() {
        assert_eq!(ConsoleCommand::parse("   "), Ok(None));
        assert_eq!(ConsoleCommand::parse("QUIT"), Ok(Some(ConsoleCommand::Quit)));
        assert!(matches!(
            ConsoleCommand::parse("move Alice"),
            Err(ConsoleError::Usage(_))
        ));
        assert!(matches!(
            ConsoleCommand::parse("as Alice"),
            Err(ConsoleError::Usage(_))
        ));
        assert_eq!(
            ConsoleCommand::parse("dance"),
            Err(ConsoleError::Unknown("dance".to_string()))
        );
    }
}
