//! Parameter-value database: per-command, per-position statistics across
//! a corpus of scripts.

use log::{debug, info};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::commands;
use crate::output::{commit_temp, csv_row, temp_path_for};
use crate::script::{DialogBlock, Param, Script};
use crate::Result;

const TOP_VALUES: usize = 10;
const MAX_EXAMPLES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterExample {
    pub value: String,
    pub source: String,
    pub dialog_id: String,
    pub line: usize,
    /// Previous and next non-blank lines of the block.
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterStats {
    pub command: String,
    pub position: usize,
    pub total_occurrences: usize,
    pub unique_values: usize,
    pub value_frequencies: BTreeMap<String, usize>,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub common_values: Vec<(String, usize)>,
    pub examples: Vec<ParameterExample>,
    /// (value, dialog, line) of each value's first occurrence, in first-seen order.
    #[serde(skip)]
    first_seen: Vec<(String, String, usize)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandParameterInfo {
    pub command: String,
    pub total_uses: usize,
    pub parameter_count: usize,
    pub description: String,
    pub syntax: String,
    pub parameters: Vec<ParameterStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterDatabase {
    pub script_files: Vec<String>,
    pub total_commands: usize,
    pub total_parameters: usize,
    pub commands: BTreeMap<String, CommandParameterInfo>,
}

fn integer_value(param: &Param) -> Option<i64> {
    match param {
        Param::Number { value, .. } => Some(i64::from(*value)),
        Param::Raw(token) => token.parse::<i64>().ok(),
        _ => None,
    }
}

fn context_for(block: &DialogBlock, line: usize) -> String {
    let Some(pos) = block.lines.iter().position(|l| l.number == line) else {
        return String::new();
    };
    let non_blank = |l: &&crate::script::SourceLine| !l.text.trim().is_empty();
    let before = block.lines[..pos].iter().rev().find(non_blank);
    let after = block.lines[pos + 1..].iter().find(non_blank);
    [before, after]
        .into_iter()
        .flatten()
        .map(|l| l.text.trim().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

impl ParameterDatabase {
    pub fn build(corpus: &[(&str, &Script)]) -> Self {
        // command -> position -> stats under construction
        let mut positions: BTreeMap<String, BTreeMap<usize, ParameterStats>> = BTreeMap::new();
        let mut uses: HashMap<String, usize> = HashMap::new();
        let mut total_parameters = 0usize;

        for (source, script) in corpus {
            for block in &script.dialogs {
                for cmd in block.commands() {
                    *uses.entry(cmd.mnemonic.clone()).or_default() += 1;
                    let per_command = positions.entry(cmd.mnemonic.clone()).or_default();

                    for (position, param) in cmd.params.iter().enumerate() {
                        total_parameters += 1;
                        let value = param.to_string();
                        let stats = per_command.entry(position).or_insert_with(|| ParameterStats {
                            command: cmd.mnemonic.clone(),
                            position,
                            total_occurrences: 0,
                            unique_values: 0,
                            value_frequencies: BTreeMap::new(),
                            min_value: None,
                            max_value: None,
                            common_values: Vec::new(),
                            examples: Vec::new(),
                            first_seen: Vec::new(),
                        });

                        stats.total_occurrences += 1;
                        let count = stats.value_frequencies.entry(value.clone()).or_default();
                        if *count == 0 {
                            stats.first_seen.push((value.clone(), block.id.clone(), cmd.line));
                        }
                        *count += 1;

                        if let Some(n) = integer_value(param) {
                            stats.min_value = Some(stats.min_value.map_or(n, |m| m.min(n)));
                            stats.max_value = Some(stats.max_value.map_or(n, |m| m.max(n)));
                        }
                        if stats.examples.len() < MAX_EXAMPLES {
                            stats.examples.push(ParameterExample {
                                value,
                                source: source.to_string(),
                                dialog_id: block.id.clone(),
                                line: cmd.line,
                                context: context_for(block, cmd.line),
                            });
                        }
                    }
                }
            }
        }

        let mut commands = BTreeMap::new();
        for (command, uses_count) in &uses {
            let mut parameters: Vec<ParameterStats> = positions
                .remove(command)
                .map(|m| m.into_values().collect())
                .unwrap_or_default();
            for stats in &mut parameters {
                stats.unique_values = stats.value_frequencies.len();
                let mut ranked: Vec<(String, usize)> = stats
                    .first_seen
                    .iter()
                    .map(|(v, _, _)| (v.clone(), stats.value_frequencies[v]))
                    .collect();
                // Stable sort keeps first-seen order among equal counts.
                ranked.sort_by(|a, b| b.1.cmp(&a.1));
                ranked.truncate(TOP_VALUES);
                stats.common_values = ranked;
            }

            let spec = commands::lookup(command);
            let widest = parameters.len();
            commands.insert(
                command.clone(),
                CommandParameterInfo {
                    command: command.clone(),
                    total_uses: *uses_count,
                    parameter_count: spec.map_or(widest, |s| s.arity()),
                    description: spec.map_or("Unknown command", |s| s.description).to_string(),
                    syntax: spec.map_or_else(|| format!("{command} <params>"), |s| s.syntax.to_string()),
                    parameters,
                },
            );
        }

        let db = ParameterDatabase {
            script_files: corpus.iter().map(|(s, _)| s.to_string()).collect(),
            total_commands: uses.values().sum(),
            total_parameters,
            commands,
        };
        debug!(
            "parameter database: {} commands, {} parameter values",
            db.commands.len(),
            db.total_parameters
        );
        db
    }

    pub fn command(&self, mnemonic: &str) -> Option<&CommandParameterInfo> {
        self.commands.get(mnemonic)
    }

    /// Recorded examples whose value matches `value` exactly.
    pub fn lookup_value(&self, value: &str) -> Vec<&ParameterExample> {
        self.commands
            .values()
            .flat_map(|c| &c.parameters)
            .flat_map(|p| &p.examples)
            .filter(|e| e.value == value)
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::from("Command,Position,Total Uses,Unique Values,Min,Max,Most Common,Frequency\n");
        for (command, info) in &self.commands {
            for p in &info.parameters {
                let (common, freq) = p
                    .common_values
                    .first()
                    .map(|(v, n)| (v.clone(), n.to_string()))
                    .unwrap_or_else(|| (String::new(), "0".to_string()));
                let row = [
                    command.clone(),
                    p.position.to_string(),
                    p.total_occurrences.to_string(),
                    p.unique_values.to_string(),
                    p.min_value.map(|v| v.to_string()).unwrap_or_default(),
                    p.max_value.map(|v| v.to_string()).unwrap_or_default(),
                    common,
                    freq,
                ];
                out.push_str(&csv_row(&row));
                out.push('\n');
            }
        }
        out
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Parameter Reference\n\n");
        out.push_str(&format!(
            "Scripts: {}  \nCommands: {}  \nParameter values: {}\n",
            self.script_files.len(),
            self.total_commands,
            self.total_parameters
        ));
        for (command, info) in &self.commands {
            out.push_str(&format!("\n## {command}\n\n{}\n\n`{}`\n\n", info.description, info.syntax));
            out.push_str(&format!("Uses: {}\n", info.total_uses));
            for p in &info.parameters {
                let range = match (p.min_value, p.max_value) {
                    (Some(lo), Some(hi)) => format!(", range {lo}..={hi}"),
                    _ => String::new(),
                };
                out.push_str(&format!(
                    "\n### Parameter {}\n\n{} uses, {} unique{range}\n\n",
                    p.position, p.total_occurrences, p.unique_values
                ));
                out.push_str("| Value | Count |\n|---|---|\n");
                for (value, count) in &p.common_values {
                    out.push_str(&format!("| `{value}` | {count} |\n"));
                }
            }
        }
        out
    }

    /// Write the `commands`, `parameters` and `parameter_values` tables to a
    /// fresh SQLite file at `path`.
    pub fn export_sqlite(&self, path: &Path) -> Result<()> {
        let tmp = temp_path_for(path);
        if tmp.exists() {
            fs::remove_file(&tmp)?;
        }
        if let Err(err) = self.write_sqlite(&tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        commit_temp(&tmp, path)?;
        info!("wrote parameter database to {}", path.display());
        Ok(())
    }

    fn write_sqlite(&self, path: &Path) -> Result<()> {
        let mut db = Connection::open(path)?;
        let tx = db.transaction()?;

        tx.execute(
            "CREATE TABLE commands (
                command TEXT PRIMARY KEY,
                total_uses INTEGER,
                parameter_count INTEGER,
                description TEXT,
                syntax TEXT
            )",
            (),
        )?;
        tx.execute(
            "CREATE TABLE parameters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                command TEXT REFERENCES commands (command),
                position INTEGER,
                total_occurrences INTEGER,
                unique_values INTEGER,
                min_value INTEGER,
                max_value INTEGER
            )",
            (),
        )?;
        tx.execute(
            "CREATE TABLE parameter_values (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                command TEXT REFERENCES commands (command),
                position INTEGER,
                value TEXT,
                frequency INTEGER,
                dialog_id TEXT,
                line_number INTEGER
            )",
            (),
        )?;

        for (command, info) in &self.commands {
            tx.execute(
                "INSERT INTO commands VALUES (?, ?, ?, ?, ?)",
                (command, info.total_uses, info.parameter_count, &info.description, &info.syntax),
            )?;
            for p in &info.parameters {
                tx.execute(
                    "INSERT INTO parameters (command, position, total_occurrences, unique_values, min_value, max_value)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    (command, p.position, p.total_occurrences, p.unique_values, p.min_value, p.max_value),
                )?;
                for (value, dialog_id, line) in &p.first_seen {
                    tx.execute(
                        "INSERT INTO parameter_values (command, position, value, frequency, dialog_id, line_number)
                         VALUES (?, ?, ?, ?, ?, ?)",
                        (command, p.position, value, p.value_frequencies[value], dialog_id, line),
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}
