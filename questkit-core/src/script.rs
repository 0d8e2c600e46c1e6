//! Event-script document model and canonical serializer.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::commands::{self, CommandSpec, ParamType};

/// Errors raised while parsing an event script.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ScriptError {
    #[error("syntax error on line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("label '{name}' on line {line} was already defined on line {first}")]
    DuplicateLabel { line: usize, name: String, first: usize },

    #[error("unknown command '{mnemonic}' on line {line}")]
    UnknownCommand { line: usize, mnemonic: String },
}

impl ScriptError {
    pub fn line(&self) -> usize {
        match self {
            ScriptError::Syntax { line, .. }
            | ScriptError::DuplicateLabel { line, .. }
            | ScriptError::UnknownCommand { line, .. } => *line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            ScriptError::Syntax { column, .. } => *column,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Radix {
    Decimal,
    /// `0x` prefix.
    Hex,
    /// `$` prefix.
    Dollar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Param {
    Number { value: u32, radix: Radix },
    BankOffset { bank: u8, offset: u16 },
    Ident(String),
    Str(String),
    /// A token that fits no parameter form.
    Raw(String),
}

impl Param {
    pub fn as_number(&self) -> Option<u32> {
        match self {
            Param::Number { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Param::Ident(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Number { value, radix: Radix::Decimal } => write!(f, "{value}"),
            Param::Number { value, radix: Radix::Hex } => write!(f, "0x{value:02X}"),
            Param::Number { value, radix: Radix::Dollar } => write!(f, "${value:02X}"),
            Param::BankOffset { bank, offset } => write!(f, "0x{bank:02X}/{offset:04X}"),
            Param::Ident(name) => f.write_str(name),
            Param::Str(s) => write!(f, "\"{}\"", quote_body(s)),
            Param::Raw(token) => f.write_str(token),
        }
    }
}

pub(crate) fn quote_body(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    pub mnemonic: String,
    pub params: Vec<Param>,
    pub line: usize,
    pub column: usize,
    /// Whether the mnemonic is in the command table.
    pub known: bool,
}

impl Command {
    pub fn spec(&self) -> Option<&'static CommandSpec> {
        commands::lookup(&self.mnemonic)
    }

    /// First identifier in a label or address position: the jump, branch or
    /// call target.
    pub fn target(&self) -> Option<&str> {
        let spec = self.spec()?;
        spec.params
            .iter()
            .zip(&self.params)
            .find_map(|(ty, p)| match (ty, p) {
                (ParamType::Label | ParamType::Address, Param::Ident(name)) => Some(name.as_str()),
                _ => None,
            })
    }

    pub fn size(&self) -> usize {
        commands::command_size(&self.mnemonic)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mnemonic)?;
        for (i, p) in self.params.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Item {
    Label { name: String, line: usize },
    Command(Command),
    Text { text: String, line: usize },
}

impl Item {
    pub fn line(&self) -> usize {
        match self {
            Item::Label { line, .. } | Item::Text { line, .. } => *line,
            Item::Command(c) => c.line,
        }
    }

    pub fn as_command(&self) -> Option<&Command> {
        match self {
            Item::Command(c) => Some(c),
            _ => None,
        }
    }

    /// Single-line source form, as the serializer writes it.
    pub fn source(&self) -> String {
        match self {
            Item::Label { name, .. } => format!("{name}:"),
            Item::Command(c) => c.to_string(),
            Item::Text { text, .. } => format!("\"{}\"", quote_body(text)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLine {
    pub number: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialogBlock {
    pub id: String,
    /// Line of the `DIALOG` header; 0 for the implicit block.
    pub header_line: usize,
    pub explicit_header: bool,
    pub items: Vec<Item>,
    /// Every raw source line belonging to the block, comments included.
    pub lines: Vec<SourceLine>,
}

impl DialogBlock {
    pub fn new(id: &str, header_line: usize, explicit_header: bool) -> Self {
        Self {
            id: id.to_string(),
            header_line,
            explicit_header,
            items: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.items.iter().filter_map(Item::as_command)
    }

    /// Label name -> line of its definition (first one wins).
    pub fn labels(&self) -> BTreeMap<&str, usize> {
        let mut out = BTreeMap::new();
        for item in &self.items {
            if let Item::Label { name, line } = item {
                out.entry(name.as_str()).or_insert(*line);
            }
        }
        out
    }

    pub fn texts(&self) -> impl Iterator<Item = (&str, usize)> {
        self.items.iter().filter_map(|i| match i {
            Item::Text { text, line } => Some((text.as_str(), *line)),
            _ => None,
        })
    }

    pub fn line_text(&self, number: usize) -> Option<&str> {
        self.lines
            .iter()
            .find(|l| l.number == number)
            .map(|l| l.text.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Script {
    pub dialogs: Vec<DialogBlock>,
    /// Recoverable findings such as unknown mnemonics.
    pub warnings: Vec<ScriptError>,
}

/// Line-number-free shape of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemShape {
    Label(String),
    Command(String, Vec<Param>),
    Text(String),
}

impl Script {
    pub fn block(&self, id: &str) -> Option<&DialogBlock> {
        self.dialogs.iter().find(|d| d.id == id)
    }

    pub fn command_count(&self) -> usize {
        self.dialogs.iter().map(|d| d.commands().count()).sum()
    }

    pub fn structure(&self) -> Vec<(String, Vec<ItemShape>)> {
        self.dialogs
            .iter()
            .map(|d| {
                let items = d
                    .items
                    .iter()
                    .map(|item| match item {
                        Item::Label { name, .. } => ItemShape::Label(name.clone()),
                        Item::Command(c) => ItemShape::Command(c.mnemonic.clone(), c.params.clone()),
                        Item::Text { text, .. } => ItemShape::Text(text.clone()),
                    })
                    .collect();
                (d.id.clone(), items)
            })
            .collect()
    }
}

/// Canonical text form. Comments are not preserved.
pub fn serialize_script(script: &Script) -> String {
    let mut out: Vec<String> = Vec::new();

    for (bi, block) in script.dialogs.iter().enumerate() {
        if bi > 0 {
            out.push(String::new());
        }
        let mut block_started = false;
        if block.explicit_header {
            out.push(format!("DIALOG {}:", block.id));
        }
        for item in &block.items {
            match item {
                Item::Label { .. } => {
                    if block_started {
                        out.push(String::new());
                    }
                    out.push(item.source());
                }
                _ => out.push(format!("    {}", item.source())),
            }
            block_started = true;
        }
    }

    let mut text = out.join("\n");
    text.push('\n');
    text
}
