// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry for user-defined satellite commands.
//!
//! Commands of any arity fit one table: the registered closure receives the
//! arguments as strings and performs its own conversion, reporting bad input
//! as [`CommandError::InvalidArgument`]. Dispatch is gated on the FSM states
//! a command was registered for, and names match case-insensitively.

use crate::protocol::cscp::State;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Erased command callable: stringly-typed arguments in, string out.
pub type CommandCall = Box<dyn Fn(&[String]) -> Result<String, CommandError> + Send + Sync>;

/// Errors produced when dispatching a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// No command registered under this name.
    Unknown(String),
    /// Command exists but is not valid in the current state.
    NotAllowed { name: String, state: State },
    /// Wrong number of arguments.
    MissingArguments { name: String, expected: usize, got: usize },
    /// An argument could not be converted to the required type.
    InvalidArgument(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Unknown(name) => write!(f, "Unknown command {:?}", name),
            CommandError::NotAllowed { name, state } => {
                write!(f, "Command {:?} cannot be called in {} state", name, state)
            }
            CommandError::MissingArguments {
                name,
                expected,
                got,
            } => write!(
                f,
                "Command {:?} requires {} arguments, got {}",
                name, expected, got
            ),
            CommandError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for CommandError {}

/// Programmer errors refused at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    EmptyName,
    Duplicate(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::EmptyName => write!(f, "Can not register command with empty name"),
            RegistryError::Duplicate(name) => {
                write!(f, "Command {:?} is already registered", name)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

struct Command {
    call: CommandCall,
    nargs: usize,
    description: String,
    valid_states: BTreeSet<State>,
}

/// Table of user commands, keyed by lowercased name.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command.
    ///
    /// `nargs` is the exact number of string arguments the callable expects.
    /// Registration fails for an empty name or a duplicate (names compare
    /// case-insensitively).
    pub fn add(
        &mut self,
        name: &str,
        description: &str,
        valid_states: impl IntoIterator<Item = State>,
        nargs: usize,
        call: impl Fn(&[String]) -> Result<String, CommandError> + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let key = name.to_ascii_lowercase();
        if self.commands.contains_key(&key) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.commands.insert(
            key,
            Command {
                call: Box::new(call),
                nargs,
                description: description.to_string(),
                valid_states: valid_states.into_iter().collect(),
            },
        );
        Ok(())
    }

    /// True if a command with this name exists.
    pub fn has(&self, name: &str) -> bool {
        self.commands.contains_key(&name.to_ascii_lowercase())
    }

    /// Dispatch a command in the given FSM state.
    pub fn call(
        &self,
        state: State,
        name: &str,
        args: &[String],
    ) -> Result<String, CommandError> {
        let command = self
            .commands
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| CommandError::Unknown(name.to_string()))?;

        if !command.valid_states.contains(&state) {
            return Err(CommandError::NotAllowed {
                name: name.to_string(),
                state,
            });
        }
        if args.len() != command.nargs {
            return Err(CommandError::MissingArguments {
                name: name.to_string(),
                expected: command.nargs,
                got: args.len(),
            });
        }
        (command.call)(args)
    }

    /// Map of command names to their full descriptions, including arity and
    /// the states the command may be called in.
    pub fn describe_commands(&self) -> BTreeMap<String, String> {
        self.commands
            .iter()
            .map(|(name, command)| {
                let states: Vec<&str> =
                    command.valid_states.iter().map(|s| s.label()).collect();
                let description = format!(
                    "{}\nThis command requires {} arguments and can be called in states: [{}]",
                    command.description,
                    command.nargs,
                    states.join(", ")
                );
                (name.clone(), description)
            })
            .collect()
    }
}

/// Convert one string argument, reporting failures as `InvalidArgument`.
pub fn parse_arg<T>(arg: &str) -> Result<T, CommandError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    arg.parse().map_err(|e| {
        CommandError::InvalidArgument(format!("could not convert {:?}: {}", arg, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voltage_registry() -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        registry
            .add(
                "set_voltage",
                "Set the output voltage",
                [State::Orbit],
                1,
                |args| {
                    let voltage: i64 = parse_arg(&args[0])?;
                    Ok(voltage.to_string())
                },
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_dispatch_in_valid_state() {
        let registry = voltage_registry();
        let result = registry
            .call(State::Orbit, "set_voltage", &["5".to_string()])
            .unwrap();
        assert_eq!(result, "5");
    }

    #[test]
    fn test_dispatch_is_case_insensitive() {
        let registry = voltage_registry();
        let result = registry
            .call(State::Orbit, "SET_VOLTAGE", &["7".to_string()])
            .unwrap();
        assert_eq!(result, "7");
    }

    #[test]
    fn test_dispatch_rejected_outside_valid_states() {
        let registry = voltage_registry();
        let err = registry
            .call(State::New, "set_voltage", &["5".to_string()])
            .unwrap_err();
        assert!(matches!(err, CommandError::NotAllowed { .. }));
    }

    #[test]
    fn test_dispatch_checks_arity() {
        let registry = voltage_registry();
        let err = registry.call(State::Orbit, "set_voltage", &[]).unwrap_err();
        assert_eq!(
            err,
            CommandError::MissingArguments {
                name: "set_voltage".to_string(),
                expected: 1,
                got: 0
            }
        );
    }

    #[test]
    fn test_bad_argument_is_invalid() {
        let registry = voltage_registry();
        let err = registry
            .call(State::Orbit, "set_voltage", &["five".to_string()])
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidArgument(_)));
    }

    #[test]
    fn test_unknown_command() {
        let registry = voltage_registry();
        let err = registry.call(State::Orbit, "warp_drive", &[]).unwrap_err();
        assert_eq!(err, CommandError::Unknown("warp_drive".to_string()));
    }

    #[test]
    fn test_registration_refuses_duplicates_and_empty_names() {
        let mut registry = voltage_registry();
        assert_eq!(
            registry.add("set_voltage", "again", [State::Orbit], 1, |_| Ok(String::new())),
            Err(RegistryError::Duplicate("set_voltage".to_string()))
        );
        assert_eq!(
            registry.add("", "nameless", [State::Orbit], 0, |_| Ok(String::new())),
            Err(RegistryError::EmptyName)
        );
    }

    #[test]
    fn test_describe_commands_mentions_arity_and_states() {
        let registry = voltage_registry();
        let descriptions = registry.describe_commands();
        let description = descriptions.get("set_voltage").unwrap();
        assert!(description.contains("Set the output voltage"));
        assert!(description.contains("requires 1 arguments"));
        assert!(description.contains("ORBIT"));
    }
}
