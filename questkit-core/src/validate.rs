//! Two-pass validation of event-script source.
//!
//! Pass one checks each line on its own: syntax, mnemonics, arity and
//! parameter types. Pass two works per dialog block: label resolution, flag
//! usage, termination, reachability and loop shape. Findings never abort
//! validation; a file is valid when no ERROR was found.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::cfg::build_cfg;
use crate::commands::{Flow, ParamType};
use crate::lint::Severity;
use crate::output::annotation;
use crate::script::{Command, DialogBlock, Item, Param, Radix, Script, ScriptError};
use crate::{parse_script_recovering, ParseOptions, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Syntax,
    Semantics,
    Types,
    References,
    Security,
    Performance,
}

impl Category {
    pub fn name(self) -> &'static str {
        match self {
            Category::Syntax => "SYNTAX",
            Category::Semantics => "SEMANTICS",
            Category::Types => "TYPES",
            Category::References => "REFERENCES",
            Category::Security => "SECURITY",
            Category::Performance => "PERFORMANCE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub category: Category,
    pub file: String,
    pub dialog_id: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Unknown commands become errors; unused labels and trailing
    /// whitespace are reported.
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub file: String,
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
}

pub struct Validator {
    config: ValidatorConfig,
}

struct Collector<'a> {
    file: &'a str,
    issues: Vec<ValidationIssue>,
}

impl Collector<'_> {
    fn push(&mut self, severity: Severity, category: Category, dialog: &str, line: usize, column: usize, message: String) {
        self.issues.push(ValidationIssue {
            severity,
            category,
            file: self.file.to_string(),
            dialog_id: dialog.to_string(),
            line,
            column,
            message,
        });
    }
}

fn flag_key(p: &Param) -> String {
    p.as_number().map_or_else(|| p.to_string(), |v| v.to_string())
}

fn block_of(script: &Script, line: usize) -> &str {
    script
        .dialogs
        .iter()
        .rev()
        .find(|d| d.lines.first().is_some_and(|l| l.number <= line))
        .map_or("MAIN", |d| d.id.as_str())
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, file: &str, src: &str) -> ValidationResult {
        let (script, errors) = parse_script_recovering(src, &ParseOptions::default());
        let mut out = Collector {
            file,
            issues: Vec::new(),
        };

        self.parse_findings(&script, &errors, &mut out);
        for block in &script.dialogs {
            for c in block.commands() {
                self.check_command(&block.id, c, &mut out);
            }
            if self.config.strict {
                for line in &block.lines {
                    let stripped = line.text.trim_end();
                    if stripped.len() != line.text.len() {
                        out.push(
                            Severity::Warning,
                            Category::Syntax,
                            &block.id,
                            line.number,
                            stripped.chars().count() + 1,
                            "trailing whitespace".to_string(),
                        );
                    }
                }
            }
        }

        let written: BTreeSet<String> = script
            .dialogs
            .iter()
            .flat_map(|d| d.commands())
            .filter(|c| matches!(c.mnemonic.as_str(), "SET_FLAG" | "CLEAR_FLAG" | "TOGGLE_FLAG"))
            .filter_map(|c| c.params.first().map(flag_key))
            .collect();
        let mut reported_flags = BTreeSet::new();
        for block in &script.dialogs {
            self.check_block(block, &written, &mut reported_flags, &mut out);
        }

        let mut issues = out.issues;
        issues.sort_by(|a, b| {
            (a.line, a.column, a.category, &a.message).cmp(&(b.line, b.column, b.category, &b.message))
        });
        let count = |s: Severity| issues.iter().filter(|i| i.severity == s).count();
        let (error_count, warning_count, info_count) =
            (count(Severity::Error), count(Severity::Warning), count(Severity::Info));
        debug!("validated {file}: {error_count} errors, {warning_count} warnings");

        ValidationResult {
            file: file.to_string(),
            is_valid: error_count == 0,
            issues,
            error_count,
            warning_count,
            info_count,
        }
    }

    fn parse_findings(&self, script: &Script, errors: &[ScriptError], out: &mut Collector) {
        for err in errors {
            let category = match err {
                ScriptError::DuplicateLabel { .. } => Category::Semantics,
                _ => Category::Syntax,
            };
            let line = err.line();
            out.push(Severity::Error, category, block_of(script, line), line, err.column(), err.to_string());
        }
        for warning in &script.warnings {
            let severity = if self.config.strict {
                Severity::Error
            } else {
                Severity::Warning
            };
            let line = warning.line();
            out.push(severity, Category::Syntax, block_of(script, line), line, warning.column(), warning.to_string());
        }
    }

    fn check_command(&self, dialog: &str, c: &Command, out: &mut Collector) {
        let Some(spec) = c.spec() else { return };
        if c.params.len() != spec.arity() {
            out.push(
                Severity::Error,
                Category::Syntax,
                dialog,
                c.line,
                c.column,
                format!(
                    "{} expects {} parameter(s), got {} (syntax: {})",
                    c.mnemonic,
                    spec.arity(),
                    c.params.len(),
                    spec.syntax
                ),
            );
            return;
        }
        for (i, (ty, p)) in spec.params.iter().zip(&c.params).enumerate() {
            if let Some(problem) = type_problem(*ty, p) {
                out.push(
                    Severity::Error,
                    Category::Types,
                    dialog,
                    c.line,
                    c.column,
                    format!("{} parameter {}: {problem}", c.mnemonic, i + 1),
                );
            }
        }
    }

    fn check_block(
        &self,
        block: &DialogBlock,
        written: &BTreeSet<String>,
        reported_flags: &mut BTreeSet<String>,
        out: &mut Collector,
    ) {
        let labels = block.labels();
        let mut used: BTreeSet<&str> = BTreeSet::new();

        for c in block.commands() {
            let Some(spec) = c.spec() else { continue };
            for (ty, p) in spec.params.iter().zip(&c.params) {
                let Some(name) = p.as_ident() else { continue };
                match ty {
                    ParamType::Label => {
                        used.insert(name);
                        if !labels.contains_key(name) {
                            out.push(
                                Severity::Error,
                                Category::References,
                                &block.id,
                                c.line,
                                c.column,
                                format!("undefined label '{name}'"),
                            );
                        }
                    }
                    ParamType::Address => {
                        used.insert(name);
                    }
                    _ => {}
                }
            }

            if c.mnemonic == "CHECK_FLAG" {
                if let Some(key) = c.params.first().map(flag_key) {
                    if !written.contains(&key) && reported_flags.insert(key.clone()) {
                        out.push(
                            Severity::Warning,
                            Category::Semantics,
                            &block.id,
                            c.line,
                            c.column,
                            format!("flag {key} is checked but never set or cleared in this file"),
                        );
                    }
                }
            }
        }

        if self.config.strict {
            for (name, line) in &labels {
                if !used.contains(name) {
                    out.push(
                        Severity::Warning,
                        Category::Semantics,
                        &block.id,
                        *line,
                        1,
                        format!("label '{name}' is never used"),
                    );
                }
            }
        }

        let last = block.items.iter().rev().find_map(Item::as_command);
        let ends = last.is_some_and(|c| {
            c.spec()
                .is_some_and(|s| matches!(s.flow, Flow::End | Flow::Return | Flow::Jump))
        });
        if !block.items.is_empty() && !ends {
            let line = block.items.last().map_or(block.header_line, Item::line);
            out.push(
                Severity::Warning,
                Category::Semantics,
                &block.id,
                line,
                1,
                format!("dialog {} does not end with END or RETURN", block.id),
            );
        }

        for node in build_cfg(block).dead_nodes().filter(|n| !n.is_implicit()) {
            out.push(
                Severity::Warning,
                Category::Semantics,
                &block.id,
                node.line,
                1,
                format!("unreachable code: {}", node.label),
            );
        }

        self.loops(block, &labels, out);

        for pair in block.items.windows(2) {
            if let (Some(a), Some(b)) = (pair[0].as_command(), pair[1].as_command()) {
                if a.mnemonic == "CHECK_FLAG" && b.mnemonic == "CHECK_FLAG" && a.params == b.params {
                    out.push(
                        Severity::Info,
                        Category::Performance,
                        &block.id,
                        b.line,
                        b.column,
                        format!("flag {} is checked twice in a row", b.params.first().map(flag_key).unwrap_or_default()),
                    );
                }
            }
        }
    }

    /// Backward unconditional jumps whose loop body never waits.
    fn loops(&self, block: &DialogBlock, labels: &BTreeMap<&str, usize>, out: &mut Collector) {
        for (j, item) in block.items.iter().enumerate() {
            let Some(jump) = item.as_command().filter(|c| c.spec().is_some_and(|s| s.flow == Flow::Jump)) else {
                continue;
            };
            let Some(target) = jump.target() else { continue };
            let Some(&target_line) = labels.get(target) else { continue };
            if target_line >= jump.line {
                continue;
            }
            let waits = block.items[..j]
                .iter()
                .filter(|i| i.line() > target_line)
                .filter_map(Item::as_command)
                .any(|c| matches!(c.mnemonic.as_str(), "WAIT" | "DELAY"));
            if !waits {
                out.push(
                    Severity::Warning,
                    Category::Security,
                    &block.id,
                    jump.line,
                    jump.column,
                    format!("backward jump to '{target}' has no WAIT in the loop body (possible infinite loop)"),
                );
            }
        }
    }
}

fn type_problem(ty: ParamType, p: &Param) -> Option<String> {
    if let Param::Raw(token) = p {
        return Some(format!("malformed parameter '{token}'"));
    }
    let range = |max: u32| match p.as_number() {
        Some(v) if v <= max => None,
        Some(v) => Some(format!("{v} is out of range 0..{max}")),
        None => Some(format!("expected a {}, found '{p}'", ty.name())),
    };
    match ty {
        ParamType::Byte => range(0xFF),
        ParamType::Word | ParamType::Flag => range(0xFFFF),
        ParamType::Label => match p {
            Param::Ident(_) => None,
            _ => Some(format!("expected a label, found '{p}'")),
        },
        ParamType::Address => match p {
            Param::BankOffset { .. } | Param::Ident(_) => None,
            Param::Number {
                radix: Radix::Hex | Radix::Dollar,
                ..
            } => None,
            _ => Some(format!("expected an address (0xBB/OOOO, 0x.., $.. or a symbol), found '{p}'")),
        },
        ParamType::Str => match p {
            Param::Str(_) => None,
            _ => Some(format!("expected a string, found '{p}'")),
        },
    }
}

/// Results for a batch of files, in the order they were validated.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub results: Vec<ValidationResult>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.results.iter().all(|r| r.is_valid)
    }

    pub fn error_count(&self) -> usize {
        self.results.iter().map(|r| r.error_count).sum()
    }

    fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.results.iter().flat_map(|r| &r.issues)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for r in &self.results {
            let status = if r.is_valid { "valid" } else { "INVALID" };
            out.push_str(&format!(
                "{}: {status} ({} errors, {} warnings, {} info)\n",
                r.file, r.error_count, r.warning_count, r.info_count
            ));
            for i in &r.issues {
                out.push_str(&format!(
                    "  {}:{}: {} {}: {}\n",
                    i.line,
                    i.column,
                    i.severity.name().to_uppercase(),
                    i.category.name(),
                    i.message
                ));
            }
        }
        out
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Script Validation Report\n\n");
        out.push_str(&format!(
            "- Files: {}\n- Valid: {}\n- Errors: {}\n\n",
            self.results.len(),
            self.results.iter().filter(|r| r.is_valid).count(),
            self.error_count()
        ));
        out.push_str("| File | Line | Severity | Category | Message |\n|---|---|---|---|---|\n");
        for i in self.issues() {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                i.file,
                i.line,
                i.severity.name().to_uppercase(),
                i.category.name(),
                i.message.replace('|', "\\|")
            ));
        }
        out
    }

    pub fn to_annotations(&self) -> String {
        self.issues()
            .map(|i| {
                let level = match i.severity {
                    Severity::Error => "error",
                    Severity::Warning => "warning",
                    Severity::Info | Severity::Hint => "notice",
                };
                annotation(level, &i.file, i.line, i.column, &i.message)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(src: &str) -> ValidationResult {
        Validator::new(ValidatorConfig::default()).validate("test.evs", src)
    }

    fn strict(src: &str) -> ValidationResult {
        Validator::new(ValidatorConfig { strict: true }).validate("test.evs", src)
    }

    fn errors(result: &ValidationResult) -> Vec<&ValidationIssue> {
        result.issues.iter().filter(|i| i.severity == Severity::Error).collect()
    }

    #[test]
    fn valid_script() {
        let result = check("DIALOG INTRO:\n    SET_FLAG 5\n    CHECK_FLAG 5\n    JUMP_IF done\n    \"Hello\"\ndone:\n    END\n");
        assert!(result.is_valid);
        assert!(result.issues.is_empty(), "{:?}", result.issues);
    }

    #[test]
    fn unresolved_jump_is_a_reference_error() {
        let result = check("JUMP nowhere\n");
        let errs = errors(&result);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].category, Category::References);
        assert!(errs[0].message.contains("nowhere"));
        assert!(!result.is_valid);
    }

    #[test]
    fn arity_and_types() {
        let result = check("WAIT\nWAIT 300\nPLAY_SOUND abc\nCALL 0x03/8036\nCALL 12\nGIVE_ITEM 1, @@\nEND\n");
        let errs = errors(&result);
        let lines: Vec<(usize, Category)> = errs.iter().map(|i| (i.line, i.category)).collect();
        assert_eq!(
            lines,
            [
                (1, Category::Syntax),
                (2, Category::Types),
                (3, Category::Types),
                (5, Category::Types),
                (6, Category::Types),
            ]
        );
        assert!(errs[1].message.contains("300 is out of range 0..255"));
        assert!(errs[4].message.contains("malformed parameter '@@'"));
    }

    #[test]
    fn unknown_commands_depend_on_strictness() {
        let relaxed = check("FROB 1\nEND\n");
        assert!(relaxed.is_valid);
        assert_eq!(relaxed.warning_count, 1);

        let strict = strict("FROB 1\nEND\n");
        assert!(!strict.is_valid);
        assert_eq!(strict.issues[0].category, Category::Syntax);
    }

    #[test]
    fn parser_errors_surface() {
        let result = check("DIALOG A:\nstart:\nstart:\n\"open\nEND\n");
        let cats: Vec<Category> = errors(&result).iter().map(|i| i.category).collect();
        assert_eq!(cats, [Category::Semantics, Category::Syntax]);
        assert!(result.issues.iter().all(|i| i.dialog_id == "A"));
    }

    #[test]
    fn semantic_warnings() {
        let src = "top:\n    CHECK_FLAG 9\n    CHECK_FLAG 9\n    PLAY_SOUND 1\n    JUMP top\nEND\nunused:\n    WAIT 1\n";
        let result = check(src);
        assert!(result.is_valid);
        let found: Vec<(usize, Severity, Category)> =
            result.issues.iter().map(|i| (i.line, i.severity, i.category)).collect();
        assert_eq!(
            found,
            [
                (2, Severity::Warning, Category::Semantics),
                (3, Severity::Info, Category::Performance),
                (5, Severity::Warning, Category::Security),
                (6, Severity::Warning, Category::Semantics),
                (8, Severity::Warning, Category::Semantics),
                (8, Severity::Warning, Category::Semantics),
            ]
        );

        assert!(result.issues[4].message.starts_with("dialog MAIN does not end"));
        assert_eq!(result.issues[5].message, "unreachable code: WAIT 1");

        let strict = strict(src);
        assert!(strict.issues.iter().any(|i| i.message == "label 'unused' is never used"));
    }

    #[test]
    fn closing_label_is_not_unreachable_code() {
        let result = check("END\nlater:\n");
        assert!(result.issues.is_empty(), "{:?}", result.issues);

        let result = check("SET_FLAG 5\nCHECK_FLAG 5\nJUMP_IF done\nEND\ndone:\n");
        assert!(result.issues.is_empty(), "{:?}", result.issues);
    }

    #[test]
    fn loops_with_waits_are_fine() {
        let result = check("again:\n    WAIT 30\n    JUMP again\n");
        assert!(result.issues.is_empty(), "{:?}", result.issues);
    }

    #[test]
    fn report_formats() {
        let report = ValidationReport {
            results: vec![check("JUMP nowhere\n"), check("END\n")],
        };
        assert!(!report.is_valid());
        assert_eq!(report.error_count(), 1);
        assert!(report
            .to_annotations()
            .starts_with("::error file=test.evs,line=1,col=1::undefined label 'nowhere'"));
        assert!(report.to_markdown().contains("| test.evs | 1 | ERROR | REFERENCES |"));
        assert!(report.to_text().contains("INVALID"));
        assert!(report.to_json().unwrap().contains("\"is_valid\": false"));
    }
}
