//! A [`CommandRunner`] that replays canned output.
//!
//! Responses are registered against a command-line prefix (`"qstat"`,
//! `"qstat -Q"`); the longest registered prefix of an invocation wins.
//! Each prefix holds a FIFO of responses and the last one is repeated once
//! the others are used up. Every invocation is recorded.

use crate::command::{CommandError, CommandOutput, CommandRunner, command_line};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        command_line(&self.program, &self.args)
    }
}

#[derive(Default)]
struct Script {
    responses: HashMap<String, VecDeque<Result<CommandOutput, CommandError>>>,
    calls: Vec<Invocation>,
    closed: bool,
}

#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<Script>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `output` for commands starting with `prefix`.
    pub fn respond(&self, prefix: &str, output: CommandOutput) -> &Self {
        self.script()
            .responses
            .entry(prefix.to_string())
            .or_default()
            .push_back(Ok(output));
        self
    }

    /// Queue an execution failure for commands starting with `prefix`.
    pub fn fail(&self, prefix: &str, error: CommandError) -> &Self {
        self.script()
            .responses
            .entry(prefix.to_string())
            .or_default()
            .push_back(Err(error));
        self
    }

    /// Drop any queued responses for `prefix`.
    pub fn clear(&self, prefix: &str) -> &Self {
        self.script().responses.remove(prefix);
        self
    }

    /// All invocations so far, oldest first.
    pub fn calls(&self) -> Vec<Invocation> {
        self.script().calls.clone()
    }

    /// Number of invocations whose command line starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|call| call.command_line().starts_with(prefix))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.script().closed
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        stdin: Option<&str>,
        program: &str,
        args: &[String],
    ) -> Result<CommandOutput, CommandError> {
        let line = command_line(program, args);
        let mut script = self.script();
        script.calls.push(Invocation {
            program: program.to_string(),
            args: args.to_vec(),
            stdin: stdin.map(str::to_string),
        });

        let prefix = script
            .responses
            .keys()
            .filter(|prefix| line.starts_with(prefix.as_str()))
            .max_by_key(|prefix| prefix.len())
            .cloned();

        let response = match prefix {
            Some(prefix) => script.responses.get_mut(&prefix).and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            }),
            None => None,
        };
        response.unwrap_or_else(|| {
            Err(CommandError::Execution {
                command: line,
                error: "no scripted response".to_string(),
            })
        })
    }

    async fn close(&self) -> Result<(), CommandError> {
        self.script().closed = true;
        Ok(())
    }
}
