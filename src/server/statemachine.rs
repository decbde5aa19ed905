//! The key-value state machine and the command language applied to it
//! (design doc §4.6).
//!
//! Log entries carry a raw command string end to end -- tokenization and
//! dispatch only happen here, at apply time: log entries stay plain strings
//! and are interpreted only when executing.

use std::collections::HashMap;

/// A parsed, ready-to-apply command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    NoOp,
}

/// Outcome string of applying a [`Command`]; this is exactly the line sent
/// back to the client that issued it.
pub type CommandResult = String;

impl Command {
    /// Parses a raw, whitespace-tokenized command line (design doc §6).
    /// Verbs are matched case-insensitively; unknown verbs and malformed
    /// arity each produce a distinct error string instead of an `Err`, since
    /// both are valid *applied* outcomes recorded identically on every
    /// replica.
    pub fn parse(line: &str) -> Result<Command, CommandResult> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(verb) = tokens.first() else {
            return Err("Request not recognized".to_string());
        };
        match verb.to_ascii_uppercase().as_str() {
            "SET" => match tokens.as_slice() {
                [_, key, value] => Ok(Command::Set {
                    key: (*key).to_string(),
                    value: (*value).to_string(),
                }),
                _ => Err(format!("Request format not supported - {}", line)),
            },
            "GET" => match tokens.as_slice() {
                [_, key] => Ok(Command::Get {
                    key: (*key).to_string(),
                }),
                _ => Err(format!("Request format not supported - {}", line)),
            },
            "DELETE" => match tokens.as_slice() {
                [_, key] => Ok(Command::Delete {
                    key: (*key).to_string(),
                }),
                _ => Err(format!("Request format not supported - {}", line)),
            },
            "NO_OP" => Ok(Command::NoOp),
            _ => Err("Request not recognized".to_string()),
        }
    }
}

/// In-memory key-value map. Intentionally trivial (design doc §1, §4.6) --
/// this module's job is the deterministic apply-in-order adapter around it,
/// not the map itself.
#[derive(Debug, Default)]
pub struct StateMachine {
    store: HashMap<String, String>,
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine {
            store: HashMap::new(),
        }
    }

    /// Applies one raw log command string and returns its reply. Never
    /// fails: any command that cannot be parsed or executed yields an error
    /// reply string rather than propagating a `Result`, so that application
    /// order and state remain identical on every replica regardless of
    /// malformed input.
    pub fn apply(&mut self, raw_command: &str) -> CommandResult {
        match Command::parse(raw_command) {
            Ok(Command::Set { key, value }) => {
                self.store.insert(key, value);
                "Ok".to_string()
            }
            Ok(Command::Get { key }) => self
                .store
                .get(&key)
                .cloned()
                .unwrap_or_else(|| "Key not found".to_string()),
            Ok(Command::Delete { key }) => {
                if self.store.remove(&key).is_some() {
                    "Ok".to_string()
                } else {
                    "Key not found".to_string()
                }
            }
            Ok(Command::NoOp) => "Ok".to_string(),
            Err(reply) => reply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply("SET x 100"), "Ok");
        assert_eq!(sm.apply("GET x"), "100");
    }

    #[test]
    fn get_missing_key() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply("GET missing"), "Key not found");
    }

    #[test]
    fn delete_present_and_absent() {
        let mut sm = StateMachine::new();
        sm.apply("SET x 100");
        assert_eq!(sm.apply("DELETE x"), "Ok");
        assert_eq!(sm.apply("DELETE x"), "Key not found");
    }

    #[test]
    fn no_op_does_not_touch_store() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply("NO_OP"), "Ok");
        assert_eq!(sm.apply("GET anything"), "Key not found");
    }

    #[test]
    fn case_insensitive_verb() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply("set x 1"), "Ok");
        assert_eq!(sm.apply("get x"), "1");
    }

    #[test]
    fn unknown_verb_is_not_recognized() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply("FROBNICATE x"), "Request not recognized");
    }

    #[test]
    fn wrong_arity_is_unsupported_format() {
        let mut sm = StateMachine::new();
        assert_eq!(
            sm.apply("SET x"),
            "Request format not supported - SET x"
        );
    }
}
