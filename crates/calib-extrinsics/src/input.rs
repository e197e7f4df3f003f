//! Bounded-wait command input.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use log::debug;

use crate::capture::Command;

pub trait CommandInput {
    /// Wait at most `timeout` for the next command.
    fn poll(&mut self, timeout: Duration) -> Option<Command>;
}

/// Reads lines from stdin on a helper thread; the first character of each
/// line is the key.
pub struct StdinCommands {
    rx: Receiver<Command>,
    prompt: bool,
}

impl StdinCommands {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match Command::parse_line(&line) {
                    Some(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    None => debug!("ignoring input {line:?}"),
                }
            }
        });
        Self { rx, prompt: true }
    }

    /// Print [`Command::PROMPT`] before each poll.
    pub fn with_prompt(mut self, prompt: bool) -> Self {
        self.prompt = prompt;
        self
    }
}

impl CommandInput for StdinCommands {
    fn poll(&mut self, timeout: Duration) -> Option<Command> {
        if self.prompt {
            let mut out = io::stdout().lock();
            // Prompt output is best effort.
            let _ = writeln!(out, "{}", Command::PROMPT).and_then(|_| out.flush());
        }
        match self.rx.recv_timeout(timeout) {
            Ok(cmd) => Some(cmd),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                // stdin closed: keep the cycle cadence.
                thread::sleep(timeout);
                None
            }
        }
    }
}

/// A fixed command script, one entry per poll; `None` entries are polls
/// that time out. Exhausted scripts keep timing out without waiting.
#[derive(Clone, Debug, Default)]
pub struct ScriptedCommands {
    script: VecDeque<Option<Command>>,
}

impl ScriptedCommands {
    pub fn new(script: impl IntoIterator<Item = Option<Command>>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl CommandInput for ScriptedCommands {
    fn poll(&mut self, _timeout: Duration) -> Option<Command> {
        self.script.pop_front().flatten()
    }
}
