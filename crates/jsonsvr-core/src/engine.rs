use crate::commands::{CommandHandler, Commands};
use crate::context::Context;
use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::reader::Readers;
use crate::template;
use serde_json::Value;

/// Everything needed to turn templates into values: the script engine, the
/// file readers and the command registry.
///
/// One interpreter serves every request; per-request state lives in
/// [`Context`].
pub struct Interpreter {
    evaluator: Evaluator,
    readers: Readers,
    commands: Commands,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_readers(Readers::default())
    }

    pub fn with_readers(readers: Readers) -> Self {
        Self {
            evaluator: Evaluator::new(),
            readers,
            commands: Commands::new(),
        }
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Mutable access for startup configuration (module imports).
    pub fn evaluator_mut(&mut self) -> &mut Evaluator {
        &mut self.evaluator
    }

    pub fn readers(&self) -> &Readers {
        &self.readers
    }

    pub fn commands(&self) -> &Commands {
        &self.commands
    }

    pub fn register_command(
        &mut self,
        name: impl Into<String>,
        handler: CommandHandler,
    ) -> Option<CommandHandler> {
        self.commands.register(name, handler)
    }

    pub fn expand(&self, text: &str, ctx: &Context) -> Result<Value> {
        template::expand(&self.evaluator, text, ctx)
    }

    pub async fn read_file(&self, path: &str) -> Result<String> {
        self.readers.read(path).await
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
