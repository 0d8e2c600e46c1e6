//! Style and best-practice rules over parsed event scripts.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use crate::commands::{Flow, ParamType};
use crate::output::annotation;
use crate::script::{DialogBlock, Item, Param, Script};
use crate::Result;

static UPPER_SNAKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("upper snake regex"));
static PASCAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][a-zA-Z0-9]+$").expect("pascal case regex"));

const MAGIC_NUMBER_THRESHOLD: usize = 3;
const REDUNDANT_FLAG_WINDOW: usize = 5;
const WAIT_MAX: u32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl Severity {
    pub fn name(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Hint => "hint",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Style,
    BestPractice,
    Performance,
    Maintainability,
}

pub struct RuleInfo {
    pub id: &'static str,
    pub severity: Severity,
    pub category: RuleCategory,
    pub description: &'static str,
}

pub static RULES: &[RuleInfo] = &[
    rule("style.line_length", Severity::Warning, RuleCategory::Style, "Line is longer than the configured maximum"),
    rule("style.trailing_whitespace", Severity::Info, RuleCategory::Style, "Line ends in whitespace"),
    rule("style.identifier_naming", Severity::Warning, RuleCategory::Style, "Labels and dialog ids use UPPER_SNAKE or PascalCase"),
    rule("best.missing_end", Severity::Error, RuleCategory::BestPractice, "Dialog does not end with END or RETURN"),
    rule("best.unreachable_code", Severity::Warning, RuleCategory::BestPractice, "Code after END or RETURN"),
    rule("best.magic_numbers", Severity::Info, RuleCategory::BestPractice, "Repeated numeric literal"),
    rule("perf.excessive_waits", Severity::Warning, RuleCategory::Performance, "Consecutive WAIT commands"),
    rule("perf.redundant_flags", Severity::Warning, RuleCategory::Performance, "Same flag operation repeated"),
    rule("maint.excessive_length", Severity::Warning, RuleCategory::Maintainability, "Dialog is longer than the configured maximum"),
    rule("maint.high_complexity", Severity::Warning, RuleCategory::Maintainability, "Too many branches and calls"),
    rule("maint.duplicate_text", Severity::Info, RuleCategory::Maintainability, "Text repeated within a dialog"),
];

const fn rule(id: &'static str, severity: Severity, category: RuleCategory, description: &'static str) -> RuleInfo {
    RuleInfo {
        id,
        severity,
        category,
        description,
    }
}

/// Per-rule override read from the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleOverride {
    pub severity: Option<Severity>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LintConfig {
    pub max_line_length: usize,
    pub max_dialog_lines: usize,
    pub max_complexity: usize,
    pub strict_naming: bool,
    pub rules: BTreeMap<String, RuleOverride>,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            max_line_length: 80,
            max_dialog_lines: 100,
            max_complexity: 10,
            strict_naming: false,
            rules: BTreeMap::new(),
        }
    }
}

/// Replace lines `first_line..=last_line` with `replacement`; an empty
/// replacement deletes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fix {
    pub first_line: usize,
    pub last_line: usize,
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LintIssue {
    pub rule_id: &'static str,
    pub severity: Severity,
    pub category: RuleCategory,
    pub file: String,
    pub dialog_id: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub suggestion: String,
    pub fix: Option<Fix>,
}

struct ActiveRule {
    severity: Severity,
    category: RuleCategory,
}

pub struct Linter {
    config: LintConfig,
    active: HashMap<&'static str, ActiveRule>,
}

/// Issues for one block before file and severity are attached.
struct Finding {
    rule_id: &'static str,
    line: usize,
    column: usize,
    message: String,
    suggestion: String,
    fix: Option<Fix>,
}

fn indent_of(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

fn block_line(block: &DialogBlock) -> usize {
    if block.header_line > 0 {
        block.header_line
    } else {
        block.lines.first().map_or(1, |l| l.number)
    }
}

impl Linter {
    pub fn new(config: LintConfig) -> Self {
        let mut active = HashMap::new();
        for info in RULES {
            let over = config.rules.get(info.id).cloned().unwrap_or_default();
            let mut enabled = over.enabled.unwrap_or(true);
            if info.id == "style.identifier_naming" && !config.strict_naming {
                enabled = false;
            }
            if enabled {
                active.insert(
                    info.id,
                    ActiveRule {
                        severity: over.severity.unwrap_or(info.severity),
                        category: info.category,
                    },
                );
            }
        }
        Self { config, active }
    }

    pub fn config(&self) -> &LintConfig {
        &self.config
    }

    /// Issues in line order; ties broken by rule id then column.
    pub fn lint(&self, file: &str, script: &Script) -> Vec<LintIssue> {
        let mut issues = Vec::new();
        for block in &script.dialogs {
            let mut findings = Vec::new();
            self.line_rules(block, &mut findings);
            self.naming(block, &mut findings);
            self.missing_end(block, &mut findings);
            self.unreachable(block, &mut findings);
            self.magic_numbers(block, &mut findings);
            self.excessive_waits(block, &mut findings);
            self.redundant_flags(block, &mut findings);
            self.size_and_complexity(block, &mut findings);
            self.duplicate_text(block, &mut findings);

            for f in findings {
                let Some(rule) = self.active.get(f.rule_id) else { continue };
                issues.push(LintIssue {
                    rule_id: f.rule_id,
                    severity: rule.severity,
                    category: rule.category,
                    file: file.to_string(),
                    dialog_id: block.id.clone(),
                    line: f.line,
                    column: f.column,
                    message: f.message,
                    suggestion: f.suggestion,
                    fix: f.fix,
                });
            }
        }
        issues.sort_by(|a, b| {
            (a.line, a.rule_id, a.column, &a.message).cmp(&(b.line, b.rule_id, b.column, &b.message))
        });
        issues
    }

    fn enabled(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    fn line_rules(&self, block: &DialogBlock, out: &mut Vec<Finding>) {
        let max = self.config.max_line_length;
        for line in &block.lines {
            let len = line.text.chars().count();
            if self.enabled("style.line_length") && len > max {
                out.push(Finding {
                    rule_id: "style.line_length",
                    line: line.number,
                    column: max + 1,
                    message: format!("Line exceeds {max} characters ({len} chars)"),
                    suggestion: "Break into multiple lines or shorten the text".to_string(),
                    fix: None,
                });
            }
            let stripped = line.text.trim_end();
            if self.enabled("style.trailing_whitespace") && stripped.len() != line.text.len() {
                out.push(Finding {
                    rule_id: "style.trailing_whitespace",
                    line: line.number,
                    column: stripped.chars().count() + 1,
                    message: "Trailing whitespace".to_string(),
                    suggestion: "Remove trailing whitespace".to_string(),
                    fix: Some(Fix {
                        first_line: line.number,
                        last_line: line.number,
                        replacement: stripped.to_string(),
                    }),
                });
            }
        }
    }

    fn naming(&self, block: &DialogBlock, out: &mut Vec<Finding>) {
        if !self.enabled("style.identifier_naming") {
            return;
        }
        let ok = |name: &str| UPPER_SNAKE.is_match(name) || PASCAL.is_match(name);
        if block.explicit_header && !ok(&block.id) {
            out.push(Finding {
                rule_id: "style.identifier_naming",
                line: block.header_line,
                column: 1,
                message: format!("Dialog id '{}' doesn't follow the naming convention", block.id),
                suggestion: "Use UPPER_SNAKE_CASE or PascalCase".to_string(),
                fix: None,
            });
        }
        for item in &block.items {
            if let Item::Label { name, line } = item {
                if !ok(name) {
                    out.push(Finding {
                        rule_id: "style.identifier_naming",
                        line: *line,
                        column: 1,
                        message: format!("Label '{name}' doesn't follow the naming convention"),
                        suggestion: "Use UPPER_SNAKE_CASE or PascalCase".to_string(),
                        fix: None,
                    });
                }
            }
        }
    }

    fn missing_end(&self, block: &DialogBlock, out: &mut Vec<Finding>) {
        let Some(last) = block.items.last() else {
            // An implicit block with no items is an empty file.
            if block.explicit_header {
                let header = block.line_text(block.header_line).unwrap_or_default();
                out.push(Finding {
                    rule_id: "best.missing_end",
                    line: block.header_line,
                    column: 1,
                    message: format!("Dialog {} is empty", block.id),
                    suggestion: "Add END at the end of the dialog".to_string(),
                    fix: Some(Fix {
                        first_line: block.header_line,
                        last_line: block.header_line,
                        replacement: format!("{}\n    END", header.trim_end()),
                    }),
                });
            }
            return;
        };
        let terminated = last
            .as_command()
            .is_some_and(|c| matches!(c.mnemonic.as_str(), "END" | "RETURN"));
        if terminated {
            return;
        }
        let line = last.line();
        let raw = block.line_text(line).unwrap_or_default();
        let indent = match last {
            Item::Label { .. } => "    ",
            _ => indent_of(raw),
        };
        out.push(Finding {
            rule_id: "best.missing_end",
            line,
            column: 1,
            message: "Dialog must end with END or RETURN".to_string(),
            suggestion: "Add END at the end of the dialog".to_string(),
            fix: Some(Fix {
                first_line: line,
                last_line: line,
                replacement: format!("{}\n{indent}END", raw.trim_end()),
            }),
        });
    }

    fn unreachable(&self, block: &DialogBlock, out: &mut Vec<Finding>) {
        let mut after: Option<&str> = None;
        for item in &block.items {
            match (item, after) {
                (Item::Label { .. }, _) => after = None,
                (_, Some(terminal)) => {
                    let column = item.as_command().map_or(1, |c| c.column);
                    out.push(Finding {
                        rule_id: "best.unreachable_code",
                        line: item.line(),
                        column,
                        message: format!("Unreachable code after {terminal}"),
                        suggestion: "Remove unreachable code or add a label".to_string(),
                        fix: Some(Fix {
                            first_line: item.line(),
                            last_line: item.line(),
                            replacement: String::new(),
                        }),
                    });
                }
                (Item::Command(c), None) if c.spec().is_some_and(|s| s.is_terminal()) => {
                    after = Some(if c.mnemonic == "END" { "END" } else { "RETURN" });
                }
                _ => {}
            }
        }
    }

    fn magic_numbers(&self, block: &DialogBlock, out: &mut Vec<Finding>) {
        // value -> (count, first line, first column)
        let mut seen: BTreeMap<u32, (usize, usize, usize)> = BTreeMap::new();
        for c in block.commands() {
            let types = c.spec().map(|s| s.params).unwrap_or_default();
            for (i, p) in c.params.iter().enumerate() {
                if matches!(types.get(i), Some(ParamType::Address | ParamType::Label)) {
                    continue;
                }
                if let Some(value) = p.as_number().filter(|&v| v > 1) {
                    seen.entry(value).or_insert((0, c.line, c.column)).0 += 1;
                }
            }
        }
        for (value, (count, line, column)) in seen {
            if count >= MAGIC_NUMBER_THRESHOLD {
                out.push(Finding {
                    rule_id: "best.magic_numbers",
                    line,
                    column,
                    message: format!("Magic number {value} appears {count} times"),
                    suggestion: format!("Consider naming {value}"),
                    fix: None,
                });
            }
        }
    }

    fn excessive_waits(&self, block: &DialogBlock, out: &mut Vec<Finding>) {
        let mut run: Vec<(usize, usize, u32)> = Vec::new();
        let mut flush = |run: &mut Vec<(usize, usize, u32)>| {
            if run.len() >= 2 {
                let total: u64 = run.iter().map(|w| u64::from(w.2)).sum();
                let (first, column, _) = run[0];
                let last = run[run.len() - 1].0;
                let indent = block.line_text(first).map(indent_of).unwrap_or("    ");
                out.push(Finding {
                    rule_id: "perf.excessive_waits",
                    line: first,
                    column,
                    message: format!("{} consecutive WAIT commands", run.len()),
                    suggestion: format!("Combine into a single WAIT {total}"),
                    fix: (total <= u64::from(WAIT_MAX)).then(|| Fix {
                        first_line: first,
                        last_line: last,
                        replacement: format!("{indent}WAIT {total}"),
                    }),
                });
            }
            run.clear();
        };
        for item in &block.items {
            let wait = item
                .as_command()
                .filter(|c| c.mnemonic == "WAIT" && c.params.len() == 1)
                .and_then(|c| c.params[0].as_number().map(|v| (c.line, c.column, v)));
            match wait {
                Some(w) => run.push(w),
                None => flush(&mut run),
            }
        }
        flush(&mut run);
    }

    fn redundant_flags(&self, block: &DialogBlock, out: &mut Vec<Finding>) {
        let mut last_op: HashMap<String, (&str, usize)> = HashMap::new();
        for c in block.commands() {
            if !matches!(c.mnemonic.as_str(), "SET_FLAG" | "CLEAR_FLAG" | "CHECK_FLAG") {
                continue;
            }
            let Some(flag) = c.params.first().map(Param::to_string) else { continue };
            if let Some(&(op, line)) = last_op.get(&flag) {
                if op == c.mnemonic && c.line - line <= REDUNDANT_FLAG_WINDOW {
                    out.push(Finding {
                        rule_id: "perf.redundant_flags",
                        line: c.line,
                        column: c.column,
                        message: format!("Redundant {op} on flag {flag} (already done at line {line})"),
                        suggestion: "Remove the repeated operation".to_string(),
                        fix: Some(Fix {
                            first_line: c.line,
                            last_line: c.line,
                            replacement: String::new(),
                        }),
                    });
                }
            }
            last_op.insert(flag, (c.mnemonic.as_str(), c.line));
        }
    }

    fn size_and_complexity(&self, block: &DialogBlock, out: &mut Vec<Finding>) {
        let max_lines = self.config.max_dialog_lines;
        if block.lines.len() > max_lines {
            out.push(Finding {
                rule_id: "maint.excessive_length",
                line: block_line(block),
                column: 1,
                message: format!("Dialog has {} lines (max recommended: {max_lines})", block.lines.len()),
                suggestion: "Split into several dialogs or subroutines".to_string(),
                fix: None,
            });
        }

        let complexity = 1 + block
            .commands()
            .filter(|c| c.spec().is_some_and(|s| matches!(s.flow, Flow::Branch | Flow::Call)))
            .count();
        if complexity > self.config.max_complexity {
            out.push(Finding {
                rule_id: "maint.high_complexity",
                line: block_line(block),
                column: 1,
                message: format!(
                    "Complexity score {complexity} exceeds maximum {}",
                    self.config.max_complexity
                ),
                suggestion: "Move branches into smaller subroutines".to_string(),
                fix: None,
            });
        }
    }

    fn duplicate_text(&self, block: &DialogBlock, out: &mut Vec<Finding>) {
        let mut lines: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (text, line) in block.texts() {
            lines.entry(text).or_default().push(line);
        }
        for (text, at) in lines {
            if at.len() >= 2 {
                out.push(Finding {
                    rule_id: "maint.duplicate_text",
                    line: at[1],
                    column: 1,
                    message: format!("Text \"{text}\" appears {} times in this dialog", at.len()),
                    suggestion: "Move the text into a subroutine".to_string(),
                    fix: None,
                });
            }
        }
    }
}

/// Apply every non-overlapping fix; returns the new source and the count applied.
pub fn apply_fixes(src: &str, issues: &[LintIssue]) -> (String, usize) {
    let mut fixes: Vec<&Fix> = issues.iter().filter_map(|i| i.fix.as_ref()).collect();
    fixes.sort_by_key(|f| (f.first_line, f.last_line));

    let mut accepted: Vec<&Fix> = Vec::new();
    for fix in fixes {
        if accepted.last().map_or(true, |prev| fix.first_line > prev.last_line) {
            accepted.push(fix);
        }
    }

    let trailing_newline = src.ends_with('\n');
    let mut lines: Vec<String> = src.lines().map(str::to_string).collect();
    let mut applied = 0;
    for fix in accepted.iter().rev() {
        if fix.first_line == 0 || fix.last_line > lines.len() {
            continue;
        }
        let replacement: Vec<String> = if fix.replacement.is_empty() {
            Vec::new()
        } else {
            fix.replacement.split('\n').map(str::to_string).collect()
        };
        lines.splice(fix.first_line - 1..fix.last_line, replacement);
        applied += 1;
    }

    let mut out = lines.join("\n");
    if trailing_newline {
        out.push('\n');
    }
    (out, applied)
}

#[derive(Debug, Clone, Serialize)]
pub struct LintReport {
    pub files: Vec<String>,
    pub total_dialogs: usize,
    pub total_lines: usize,
    pub issues: Vec<LintIssue>,
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub hint_count: usize,
}

impl LintReport {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            total_dialogs: 0,
            total_lines: 0,
            issues: Vec::new(),
            error_count: 0,
            warning_count: 0,
            info_count: 0,
            hint_count: 0,
        }
    }

    pub fn add(&mut self, file: &str, script: &Script, issues: Vec<LintIssue>) {
        self.files.push(file.to_string());
        self.total_dialogs += script.dialogs.len();
        self.total_lines += script.dialogs.iter().map(|d| d.lines.len()).sum::<usize>();
        for issue in &issues {
            match issue.severity {
                Severity::Error => self.error_count += 1,
                Severity::Warning => self.warning_count += 1,
                Severity::Info => self.info_count += 1,
                Severity::Hint => self.hint_count += 1,
            }
        }
        self.issues.extend(issues);
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::from("# Script Lint Report\n\n");
        out.push_str(&format!(
            "- Scripts: {}\n- Dialogs: {}\n- Lines: {}\n- Issues: {}\n  - Errors: {}\n  - Warnings: {}\n  - Info: {}\n  - Hints: {}\n",
            self.files.len(),
            self.total_dialogs,
            self.total_lines,
            self.issues.len(),
            self.error_count,
            self.warning_count,
            self.info_count,
            self.hint_count
        ));
        for severity in [Severity::Error, Severity::Warning, Severity::Info, Severity::Hint] {
            let group: Vec<&LintIssue> = self.issues.iter().filter(|i| i.severity == severity).collect();
            if group.is_empty() {
                continue;
            }
            out.push_str(&format!("\n## {} ({})\n\n", severity.name().to_uppercase(), group.len()));
            for i in group {
                out.push_str(&format!(
                    "{}:{}:{} [{}] {}: {}\n",
                    i.file, i.line, i.column, i.rule_id, i.dialog_id, i.message
                ));
                if !i.suggestion.is_empty() {
                    out.push_str(&format!("    suggestion: {}\n", i.suggestion));
                }
                if i.fix.is_some() {
                    out.push_str("    auto-fixable\n");
                }
            }
        }
        out
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Script Lint Report\n\n");
        out.push_str(&format!(
            "- Scripts: {}\n- Issues: {} ({} errors, {} warnings)\n\n",
            self.files.len(),
            self.issues.len(),
            self.error_count,
            self.warning_count
        ));
        out.push_str("| File | Line | Severity | Rule | Message |\n|---|---|---|---|---|\n");
        for i in &self.issues {
            out.push_str(&format!(
                "| {} | {} | {} | `{}` | {} |\n",
                i.file,
                i.line,
                i.severity.name().to_uppercase(),
                i.rule_id,
                i.message.replace('|', "\\|")
            ));
        }
        out
    }

    pub fn to_annotations(&self) -> String {
        self.issues
            .iter()
            .map(|i| {
                let level = match i.severity {
                    Severity::Error => "error",
                    Severity::Warning => "warning",
                    Severity::Info | Severity::Hint => "notice",
                };
                annotation(level, &i.file, i.line, i.column, &format!("[{}] {}", i.rule_id, i.message))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for LintReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_script, ParseOptions};

    fn lint_with(config: LintConfig, src: &str) -> Vec<LintIssue> {
        let script = parse_script(src, &ParseOptions::default()).unwrap();
        Linter::new(config).lint("test.evs", &script)
    }

    fn lint(src: &str) -> Vec<LintIssue> {
        lint_with(LintConfig::default(), src)
    }

    fn ids(issues: &[LintIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.rule_id).collect()
    }

    #[test]
    fn clean_script_has_no_issues() {
        let issues = lint("DIALOG INTRO:\n    SHOW_TEXTBOX\n    \"Welcome!\"\n    END\n");
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn missing_end_is_an_error_with_fix() {
        let src = "DIALOG INTRO:\n    \"Welcome!\"\n    WAIT 5\n";
        let issues = lint(src);
        assert_eq!(ids(&issues), ["best.missing_end"]);
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[0].line, 3);

        let (fixed, applied) = apply_fixes(src, &issues);
        assert_eq!(applied, 1);
        assert_eq!(fixed, "DIALOG INTRO:\n    \"Welcome!\"\n    WAIT 5\n    END\n");
        assert!(lint(&fixed).is_empty());
    }

    #[test]
    fn trailing_whitespace_and_long_lines() {
        let long = format!("    \"{}\"", "x".repeat(90));
        let src = format!("SHOW_TEXTBOX  \n{long}\nEND\n");
        let issues = lint(&src);
        assert_eq!(ids(&issues), ["style.trailing_whitespace", "style.line_length"]);
        assert_eq!(issues[0].column, 13);
        assert_eq!(issues[1].column, 81);

        let (fixed, applied) = apply_fixes(&src, &issues);
        assert_eq!(applied, 1);
        assert!(fixed.starts_with("SHOW_TEXTBOX\n"));
    }

    #[test]
    fn consecutive_waits_suggest_the_sum() {
        let src = "WAIT 5\nWAIT 10\n\"hi\"\nWAIT 1\nEND\n";
        let issues = lint(src);
        assert_eq!(ids(&issues), ["perf.excessive_waits"]);
        assert_eq!(issues[0].suggestion, "Combine into a single WAIT 15");
        let (fixed, _) = apply_fixes(src, &issues);
        assert_eq!(fixed, "WAIT 15\n\"hi\"\nWAIT 1\nEND\n");
        assert!(lint(&fixed).is_empty());
    }

    #[test]
    fn oversized_wait_operands_get_no_fix() {
        let issues = lint("WAIT 0xFFFFFFFF\nWAIT 1\nEND\n");
        assert_eq!(ids(&issues), ["perf.excessive_waits"]);
        assert_eq!(issues[0].suggestion, "Combine into a single WAIT 4294967296");
        assert!(issues[0].fix.is_none());
    }

    #[test]
    fn empty_dialog_needs_end() {
        let src = "DIALOG A:\nEND\nDIALOG EMPTY:\n";
        let issues = lint(src);
        assert_eq!(ids(&issues), ["best.missing_end"]);
        assert_eq!(issues[0].line, 3);
        assert_eq!(issues[0].dialog_id, "EMPTY");

        let (fixed, applied) = apply_fixes(src, &issues);
        assert_eq!(applied, 1);
        assert_eq!(fixed, "DIALOG A:\nEND\nDIALOG EMPTY:\n    END\n");
        assert!(lint(&fixed).is_empty());
        assert!(lint("").is_empty());
    }

    #[test]
    fn unreachable_code_until_next_label() {
        let src = "END\nWAIT 1\n\"gone\"\nLATER:\nRETURN\n";
        let issues = lint(src);
        let unreachable: Vec<usize> = issues
            .iter()
            .filter(|i| i.rule_id == "best.unreachable_code")
            .map(|i| i.line)
            .collect();
        assert_eq!(unreachable, [2, 3]);
        let (fixed, applied) = apply_fixes(src, &issues);
        assert_eq!(applied, 2);
        assert_eq!(fixed, "END\nLATER:\nRETURN\n");
    }

    #[test]
    fn flags_numbers_and_duplicate_text() {
        let src = "SET_FLAG 0x20\nPLAY_SOUND 7\nSET_FLAG 0x20\nPLAY_SOUND 7\nPLAY_SOUND 7\n\"again\"\n\"again\"\nEND\n";
        let issues = lint(src);
        assert_eq!(
            ids(&issues),
            ["best.magic_numbers", "perf.redundant_flags", "maint.duplicate_text"]
        );
        assert_eq!(issues[1].line, 3);
        assert!(issues[1].message.contains("already done at line 1"));
        assert_eq!(issues[2].line, 7);
    }

    #[test]
    fn complexity_and_length_limits() {
        let config = LintConfig {
            max_complexity: 2,
            max_dialog_lines: 3,
            ..LintConfig::default()
        };
        let src = "DIALOG BUSY:\n    CHECK_FLAG 1\n    CHECK_FLAG 2\n    CALL_SUBROUTINE Helper\n    END\n";
        let issues = lint_with(config, src);
        assert_eq!(ids(&issues), ["maint.excessive_length", "maint.high_complexity"]);
        assert!(issues[1].message.contains("Complexity score 4"));
    }

    #[test]
    fn naming_only_under_strict_and_overrides_apply() {
        let src = "DIALOG intro_1:\nbad_label:\n    END\n";
        assert!(lint(src).is_empty());

        let mut rules = BTreeMap::new();
        rules.insert(
            "style.identifier_naming".to_string(),
            RuleOverride {
                severity: Some(Severity::Error),
                enabled: None,
            },
        );
        let strict = LintConfig {
            strict_naming: true,
            rules,
            ..LintConfig::default()
        };
        let issues = lint_with(strict, src);
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.severity == Severity::Error));
    }

    #[test]
    fn output_is_deterministic() {
        let src = "WAIT 2\nWAIT 2\nWAIT 2  \nSET_FLAG 3\nSET_FLAG 3\n";
        let first = lint(src);
        for _ in 0..5 {
            assert_eq!(lint(src), first);
        }
        let mut report = LintReport::new();
        let script = parse_script(src, &ParseOptions::default()).unwrap();
        report.add("test.evs", &script, first);
        assert_eq!(report.error_count, 1);
        assert!(report.to_annotations().contains("::error file=test.evs,line=5,col=1::"));
        assert!(report.to_json().unwrap().contains("\"rule_id\": \"perf.excessive_waits\""));
        let markdown = report.to_markdown();
        assert!(markdown.contains("| File | Line | Severity | Rule | Message |"));
        assert!(markdown.contains("| test.evs | 1 | WARNING | `perf.excessive_waits` |"));
    }
}
