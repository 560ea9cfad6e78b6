//! Test doubles shared by the unit tests of the harness.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::command::{display_command, CommandOutput, CommandRunner};
use crate::error::HarnessError;

type Handler = Box<dyn Fn(&str) -> CommandOutput + Send + Sync>;

/// [`CommandRunner`] answering from a closure and recording every command line.
pub struct ScriptedRunner {
    handler: Handler,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(handler: impl Fn(&str) -> CommandOutput + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of command lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }

    fn answer(&self, program: &str, args: &[String]) -> CommandOutput {
        let line = display_command(program, args);
        self.calls.lock().unwrap().push(line.clone());
        (self.handler)(&line)
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HarnessError> {
        Ok(self.answer(program, args))
    }

    fn run_blocking(&self, program: &str, args: &[String]) -> Result<CommandOutput, HarnessError> {
        Ok(self.answer(program, args))
    }
}
