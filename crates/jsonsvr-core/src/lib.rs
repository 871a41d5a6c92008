//! jsonsvr core crate.
//!
//! Turns a declarative service definition into computed values:
//!
//! - `service`: route table and rule model loaded from the service file.
//! - `resolver`: picks the first rule whose condition holds.
//! - `template` + `interpolate` + `commands`: `${...}` expansion and the
//!   recursive JSON walk with its `$array` / `$csv` / `$exec` / `$if`
//!   commands.
//! - `evaluator` + `library`: the embedded script engine and its `lib`
//!   helpers.
//! - `reader`: local and object-storage file sources.
//!
//! The HTTP side (dispatching a resolved rule into a response) lives in
//! `jsonsvr-web`; this crate has no knowledge of sockets or routers.

pub mod commands;
pub mod context;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod interpolate;
pub mod library;
pub mod reader;
pub mod resolver;
pub mod service;
pub mod template;
pub mod value;

pub use commands::{CommandHandler, Commands};
pub use context::{Context, RequestContext, ResponseContext, SharedData, shared_data};
pub use engine::Interpreter;
pub use error::{InterpretError, Result, ServiceError};
pub use evaluator::{Evaluator, Script};
pub use interpolate::COMMAND_SIGIL;
pub use reader::{
    FileReader, LocalFileReader, ObjectStorageReader, Readers, is_object_storage_uri,
};
pub use service::{Route, RouteMethod, RouteTable, Rule};
pub use value::{display_value, is_truthy};
