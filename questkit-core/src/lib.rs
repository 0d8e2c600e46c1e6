use thiserror::Error;

pub mod address;
pub mod batch;
pub mod cfg;
pub mod codec;
pub mod commands;
pub mod config;
pub mod lint;
pub mod logging;
pub mod optimizer;
pub mod output;
pub mod params;
pub mod script;
mod script_parser;
pub mod store;
pub mod table;
pub mod tm;
pub mod validate;

pub use address::BankAddress;
pub use codec::{LogicalString, TextLimits, Token};
pub use config::ToolConfig;
pub use script::{Script, ScriptError};
pub use script_parser::{parse_script, parse_script_recovering, ParseOptions};
pub use store::{DialogEntry, DialogStore, PointerTable};
pub use table::{CharTable, TableMode, TableOptions};

#[derive(Debug, Error)]
pub enum QuestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("logger setup failed: {0}")]
    Logger(#[from] log::SetLoggerError),
    #[error("address out of range: {0}")]
    AddressOutOfRange(String),
    #[error("character table syntax error on line {line}: {message}")]
    TableSyntax { line: usize, message: String },
    #[error("character table conflict on line {line}: {message}")]
    TableConflict { line: usize, message: String },
    #[error("text syntax error at position {position}: {message}")]
    TextSyntax { position: usize, message: String },
    #[error("no table entry encodes '{glyph}' (position {position})")]
    UnmappedGlyph { glyph: char, position: usize },
    #[error("encoded text needs {needed} bytes but the budget is {budget}")]
    EncodeOverflow { needed: usize, budget: usize },
    #[error("dialog {id} is {length} bytes but its slot holds {original_length}")]
    DialogTooLong {
        id: u16,
        length: usize,
        original_length: usize,
    },
    #[error("no dialog with id {0}")]
    UnknownDialog(u16),
    #[error("dialog {id} starts inside the string of dialog {other} and cannot be edited on its own")]
    OverlappingDialog { id: u16, other: u16 },
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, QuestError>;
