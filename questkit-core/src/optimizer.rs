//! Size-optimization report over a script corpus.
//!
//! Byte costs come from the command table; text literals cost their length
//! plus one terminator byte. Every opportunity satisfies
//! `current_bytes - optimized_bytes == savings_bytes > 0`.

use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use crate::commands::Flow;
use crate::script::{Command, DialogBlock, Item, Param, Script};
use crate::Result;

const CALL_SIZE: usize = 3;
const WAIT_MAX: u32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationKind {
    PatternSimplification,
    SubroutineExtraction,
    TextDeduplication,
    DeadCodeElimination,
    MemoryOptimization,
}

impl OptimizationKind {
    pub fn name(self) -> &'static str {
        match self {
            OptimizationKind::PatternSimplification => "pattern_simplification",
            OptimizationKind::SubroutineExtraction => "subroutine_extraction",
            OptimizationKind::TextDeduplication => "text_deduplication",
            OptimizationKind::DeadCodeElimination => "dead_code_elimination",
            OptimizationKind::MemoryOptimization => "memory_optimization",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn for_savings(savings: usize) -> Self {
        if savings < 50 {
            Severity::Low
        } else if savings < 200 {
            Severity::Medium
        } else if savings < 500 {
            Severity::High
        } else {
            Severity::Critical
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opportunity {
    pub kind: OptimizationKind,
    pub severity: Severity,
    pub dialog_id: String,
    pub line_numbers: Vec<usize>,
    pub description: String,
    pub current_bytes: usize,
    pub optimized_bytes: usize,
    pub savings_bytes: usize,
    pub savings_percent: f64,
    pub suggestion: String,
    pub code_before: String,
    pub code_after: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationReport {
    pub script_files: Vec<String>,
    pub total_dialogs: usize,
    pub total_lines: usize,
    pub total_bytes: usize,
    pub opportunities: Vec<Opportunity>,
    pub potential_savings: usize,
    pub potential_savings_percent: f64,
    /// Savings per kind.
    pub summary: BTreeMap<OptimizationKind, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Optimizer {
    pub min_subroutine_len: usize,
    pub max_subroutine_len: usize,
    pub min_subroutine_occurrences: usize,
    pub min_text_len: usize,
    pub min_text_occurrences: usize,
    /// Lines a memory write may precede its re-read by.
    pub memory_window: usize,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self {
            min_subroutine_len: 3,
            max_subroutine_len: 9,
            min_subroutine_occurrences: 3,
            min_text_len: 20,
            min_text_occurrences: 2,
            memory_window: 5,
        }
    }
}

fn item_size(item: &Item) -> usize {
    match item {
        Item::Label { .. } => 0,
        Item::Command(c) => c.size(),
        Item::Text { text, .. } => text.chars().count() + 1,
    }
}

fn short_hash(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex()[..8].to_uppercase()
}

fn opportunity(
    kind: OptimizationKind,
    dialog_id: &str,
    line_numbers: Vec<usize>,
    description: String,
    current_bytes: usize,
    optimized_bytes: usize,
    suggestion: String,
    code_before: String,
    code_after: String,
) -> Option<Opportunity> {
    let savings = current_bytes.checked_sub(optimized_bytes).filter(|&s| s > 0)?;
    Some(Opportunity {
        kind,
        severity: Severity::for_savings(savings),
        dialog_id: dialog_id.to_string(),
        line_numbers,
        description,
        current_bytes,
        optimized_bytes,
        savings_bytes: savings,
        savings_percent: savings as f64 * 100.0 / current_bytes as f64,
        suggestion,
        code_before,
        code_after,
    })
}

fn is(item: &Item, mnemonic: &str) -> bool {
    item.as_command().is_some_and(|c| c.mnemonic == mnemonic)
}

fn source_lines(items: &[&Item]) -> String {
    items.iter().map(|i| i.source()).collect::<Vec<_>>().join("\n")
}

/// Maximal runs of consecutive items satisfying `pred`, with their start index.
fn runs(items: &[Item], pred: impl Fn(&Item) -> bool) -> Vec<(usize, &[Item])> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, item) in items.iter().enumerate() {
        match (pred(item), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                out.push((s, &items[s..i]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, &items[s..]));
    }
    out
}

struct Candidate {
    key: String,
    len: usize,
    size: usize,
    /// (dialog, block index, start item index, first line)
    occurrences: Vec<(String, usize, usize, usize)>,
}

impl Optimizer {
    pub fn analyze(&self, corpus: &[(&str, &Script)]) -> OptimizationReport {
        let blocks: Vec<&DialogBlock> = corpus.iter().flat_map(|(_, s)| &s.dialogs).collect();

        let mut opportunities = Vec::new();
        for block in &blocks {
            opportunities.extend(self.patterns(block));
            opportunities.extend(self.dead_code(block));
            opportunities.extend(self.memory(block));
        }
        opportunities.extend(self.subroutines(&blocks));
        opportunities.extend(self.duplicate_texts(&blocks));

        opportunities.sort_by(|a, b| {
            (Reverse(a.savings_bytes), &a.dialog_id, a.line_numbers.first(), a.kind, &a.suggestion).cmp(&(
                Reverse(b.savings_bytes),
                &b.dialog_id,
                b.line_numbers.first(),
                b.kind,
                &b.suggestion,
            ))
        });

        let total_lines = blocks.iter().map(|b| b.lines.len()).sum();
        let total_bytes: usize = blocks.iter().flat_map(|b| &b.items).map(item_size).sum();
        let potential_savings: usize = opportunities.iter().map(|o| o.savings_bytes).sum();
        let mut summary = BTreeMap::new();
        for o in &opportunities {
            *summary.entry(o.kind).or_default() += o.savings_bytes;
        }
        debug!("optimizer: {} opportunities over {} dialogs", opportunities.len(), blocks.len());

        OptimizationReport {
            script_files: corpus.iter().map(|(s, _)| s.to_string()).collect(),
            total_dialogs: blocks.len(),
            total_lines,
            total_bytes,
            opportunities,
            potential_savings,
            potential_savings_percent: if total_bytes == 0 {
                0.0
            } else {
                potential_savings as f64 * 100.0 / total_bytes as f64
            },
            summary,
        }
    }

    fn patterns(&self, block: &DialogBlock) -> Vec<Opportunity> {
        let mut out = Vec::new();
        let items = &block.items;
        let kind = OptimizationKind::PatternSimplification;

        for (_, run) in runs(items, |i| is(i, "WAIT")) {
            if run.len() < 3 {
                continue;
            }
            let values: Option<Vec<u32>> = run
                .iter()
                .map(|i| i.as_command().and_then(|c| c.params.first()).and_then(Param::as_number))
                .collect();
            let Some(values) = values else { continue };
            // Operands past one byte do not encode as a single WAIT.
            if values.iter().any(|&v| v > WAIT_MAX) {
                continue;
            }
            let total: u64 = values.iter().map(|&v| u64::from(v)).sum();
            let max = u64::from(WAIT_MAX);
            if total.div_ceil(max) >= run.len() as u64 {
                continue;
            }
            let mut remaining = total;
            let mut chunks = Vec::new();
            loop {
                let chunk = remaining.min(max);
                chunks.push(format!("WAIT {chunk}"));
                remaining -= chunk;
                if remaining == 0 {
                    break;
                }
            }
            let refs: Vec<&Item> = run.iter().collect();
            let code_after = chunks.join("\n");
            out.extend(opportunity(
                kind,
                &block.id,
                run.iter().map(Item::line).collect(),
                format!("{} consecutive WAITs can be combined", run.len()),
                run.iter().map(item_size).sum(),
                chunks.len() * crate::commands::command_size("WAIT"),
                chunks.join(", "),
                source_lines(&refs),
                code_after,
            ));
        }

        for (_, run) in runs(items, |i| is(i, "NEWLINE")) {
            if run.len() < 3 {
                continue;
            }
            let refs: Vec<&Item> = run.iter().collect();
            out.extend(opportunity(
                kind,
                &block.id,
                run.iter().map(Item::line).collect(),
                format!("{} consecutive NEWLINEs can be reduced", run.len()),
                run.iter().map(item_size).sum(),
                item_size(&run[0]),
                "Reduce to a single NEWLINE".to_string(),
                source_lines(&refs),
                run[0].source(),
            ));
        }

        let mut i = 0;
        while i < items.len() {
            let Some(first) = items[i].as_command().filter(|c| c.mnemonic == "CHECK_FLAG") else {
                i += 1;
                continue;
            };
            let mut j = i + 1;
            while j < items.len()
                && items[j]
                    .as_command()
                    .is_some_and(|c| c.mnemonic == first.mnemonic && c.params == first.params)
            {
                j += 1;
            }
            if j - i >= 2 {
                let refs: Vec<&Item> = items[i..j].iter().collect();
                out.extend(opportunity(
                    kind,
                    &block.id,
                    items[i..j].iter().map(Item::line).collect(),
                    format!("Redundant check of flag {}", first.params.first().map(|p| p.to_string()).unwrap_or_default()),
                    items[i..j].iter().map(item_size).sum(),
                    first.size(),
                    "Keep only the first check".to_string(),
                    source_lines(&refs),
                    items[i].source(),
                ));
            }
            i = j;
        }

        for pair in items.windows(2) {
            let (Some(write), Some(read)) = (pair[0].as_command(), pair[1].as_command()) else {
                continue;
            };
            if write.mnemonic == "MEMORY_WRITE"
                && read.mnemonic == "MEMORY_READ"
                && write.params.first().is_some()
                && write.params.first() == read.params.first()
            {
                out.extend(opportunity(
                    kind,
                    &block.id,
                    vec![write.line, read.line],
                    format!("Write to {} followed by read", write.params[0]),
                    write.size() + read.size(),
                    write.size(),
                    "Drop the read; the written value is already known".to_string(),
                    source_lines(&[&pair[0], &pair[1]]),
                    pair[0].source(),
                ));
            }
        }

        out
    }

    fn dead_code(&self, block: &DialogBlock) -> Vec<Opportunity> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < block.items.len() {
            let terminal = block.items[i].as_command().filter(|c| c.spec().is_some_and(|s| s.is_terminal()));
            let Some(terminal) = terminal else {
                i += 1;
                continue;
            };
            let mut j = i + 1;
            while j < block.items.len() && !matches!(block.items[j], Item::Label { .. }) {
                j += 1;
            }
            let dead: Vec<&Item> = block.items[i + 1..j].iter().collect();
            if !dead.is_empty() {
                out.extend(opportunity(
                    OptimizationKind::DeadCodeElimination,
                    &block.id,
                    dead.iter().map(|d| d.line()).collect(),
                    format!("Unreachable code after {}", terminal.mnemonic),
                    dead.iter().map(|d| item_size(d)).sum(),
                    0,
                    "Remove unreachable code".to_string(),
                    source_lines(&dead),
                    String::new(),
                ));
            }
            i = j;
        }
        out
    }

    fn memory(&self, block: &DialogBlock) -> Vec<Opportunity> {
        let mut out = Vec::new();
        let accesses: Vec<(usize, &Command)> = block
            .items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| item.as_command().map(|c| (idx, c)))
            .filter(|(_, c)| matches!(c.mnemonic.as_str(), "MEMORY_WRITE" | "MEMORY_READ") && !c.params.is_empty())
            .collect();

        for (n, (w_idx, write)) in accesses.iter().enumerate() {
            if write.mnemonic != "MEMORY_WRITE" {
                continue;
            }
            let next_same = accesses[n + 1..].iter().find(|(_, c)| c.params[0] == write.params[0]);
            let Some((r_idx, read)) = next_same else { continue };
            if read.mnemonic != "MEMORY_READ" || *r_idx == w_idx + 1 || read.line - write.line > self.memory_window {
                continue;
            }
            let address = write.params[0].to_string();
            out.extend(opportunity(
                OptimizationKind::MemoryOptimization,
                &block.id,
                vec![write.line, read.line],
                format!("Write to {address} is re-read {} lines later", read.line - write.line),
                write.size() + read.size(),
                write.size(),
                "Keep the written value instead of re-reading memory".to_string(),
                format!("{write}\n...\n{read}"),
                format!("{write}\n..."),
            ));
        }
        out
    }

    fn subroutines(&self, blocks: &[&DialogBlock]) -> Vec<Opportunity> {
        let mut order: Vec<String> = Vec::new();
        let mut found: HashMap<String, Candidate> = HashMap::new();

        let eligible = |item: &Item| {
            item.as_command()
                .is_some_and(|c| c.spec().map_or(true, |s| s.flow == Flow::Linear))
        };

        for (b, block) in blocks.iter().enumerate() {
            for (base, run) in runs(&block.items, eligible) {
                for k in self.min_subroutine_len..=self.max_subroutine_len {
                    for (start, window) in run.windows(k).enumerate() {
                        let refs: Vec<&Item> = window.iter().collect();
                        let key = source_lines(&refs);
                        let candidate = found.entry(key.clone()).or_insert_with(|| {
                            order.push(key.clone());
                            Candidate {
                                key,
                                len: k,
                                size: window.iter().map(item_size).sum(),
                                occurrences: Vec::new(),
                            }
                        });
                        let at = base + start;
                        let overlaps = candidate
                            .occurrences
                            .last()
                            .is_some_and(|&(_, lb, ls, _)| lb == b && at < ls + k);
                        if !overlaps {
                            candidate.occurrences.push((block.id.clone(), b, at, window[0].line()));
                        }
                    }
                }
            }
        }

        let mut reported: Vec<&Candidate> = Vec::new();
        let mut by_len: Vec<&Candidate> = order
            .iter()
            .filter_map(|k| found.get(k))
            .filter(|c| c.occurrences.len() >= self.min_subroutine_occurrences)
            .collect();
        by_len.sort_by_key(|c| Reverse(c.len));

        let mut out = Vec::new();
        for c in by_len {
            let wrapped = format!("\n{}\n", c.key);
            let subsumed = reported
                .iter()
                .any(|r| r.occurrences.len() == c.occurrences.len() && format!("\n{}\n", r.key).contains(&wrapped));
            if subsumed {
                continue;
            }
            let occ = c.occurrences.len();
            let name = format!("SUB_{}", short_hash(&c.key));
            if let Some(o) = opportunity(
                OptimizationKind::SubroutineExtraction,
                &c.occurrences[0].0,
                c.occurrences.iter().map(|o| o.3).collect(),
                format!("{}-command sequence repeated {occ} times", c.len),
                c.size * occ,
                c.size + CALL_SIZE * occ,
                format!("Extract as subroutine {name}"),
                c.key.clone(),
                format!("CALL_SUBROUTINE {name}"),
            ) {
                out.push(o);
                reported.push(c);
            }
        }
        out
    }

    fn duplicate_texts(&self, blocks: &[&DialogBlock]) -> Vec<Opportunity> {
        let mut order: Vec<&str> = Vec::new();
        let mut seen: HashMap<&str, Vec<(&str, usize)>> = HashMap::new();
        for block in blocks {
            for (text, line) in block.texts() {
                if text.chars().count() < self.min_text_len {
                    continue;
                }
                seen.entry(text)
                    .or_insert_with(|| {
                        order.push(text);
                        Vec::new()
                    })
                    .push((block.id.as_str(), line));
            }
        }

        let mut out = Vec::new();
        for text in order {
            let occurrences = &seen[text];
            if occurrences.len() < self.min_text_occurrences {
                continue;
            }
            let cost = text.chars().count() + 1;
            let occ = occurrences.len();
            let name = format!("TEXT_{}", short_hash(text));
            out.extend(opportunity(
                OptimizationKind::TextDeduplication,
                occurrences[0].0,
                occurrences.iter().map(|o| o.1).collect(),
                format!("Text appears {occ} times"),
                cost * occ,
                cost + CALL_SIZE * occ,
                format!("Create text subroutine {name}"),
                format!("\"{}\"", crate::script::quote_body(text)),
                format!("CALL_SUBROUTINE {name}"),
            ));
        }
        out
    }
}

impl OptimizationReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::from("# Script Optimization Report\n\n");
        out.push_str(&format!(
            "Dialogs: {}  \nLines: {}  \nEstimated size: {} bytes  \nPotential savings: {} bytes ({:.1}%)\n",
            self.total_dialogs, self.total_lines, self.total_bytes, self.potential_savings, self.potential_savings_percent
        ));

        if !self.summary.is_empty() {
            out.push_str("\n## Savings by type\n\n");
            for (kind, bytes) in &self.summary {
                out.push_str(&format!("- {}: {bytes} bytes\n", kind.name()));
            }
        }

        for severity in [Severity::Critical, Severity::High, Severity::Medium, Severity::Low] {
            let group: Vec<&Opportunity> = self.opportunities.iter().filter(|o| o.severity == severity).collect();
            if group.is_empty() {
                continue;
            }
            out.push_str(&format!("\n## {severity:?} ({} opportunities)\n", group.len()));
            for o in group.iter().take(20) {
                let lines: Vec<String> = o.line_numbers.iter().map(usize::to_string).collect();
                out.push_str(&format!(
                    "\n### {} in {} (lines {})\n\n{}\n\n- Savings: {} bytes ({:.1}%)\n- Suggestion: {}\n",
                    o.kind.name(),
                    o.dialog_id,
                    lines.join(", "),
                    o.description,
                    o.savings_bytes,
                    o.savings_percent,
                    o.suggestion
                ));
                if !o.code_before.is_empty() {
                    out.push_str(&format!("\n```\n{}\n```\n", o.code_before));
                }
                if !o.code_after.is_empty() {
                    out.push_str(&format!("becomes\n```\n{}\n```\n", o.code_after));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_script, ParseOptions};

    fn analyze(src: &str) -> OptimizationReport {
        let script = parse_script(src, &ParseOptions::default()).unwrap();
        Optimizer::default().analyze(&[("test.evs", &script)])
    }

    fn of_kind(report: &OptimizationReport, kind: OptimizationKind) -> Vec<&Opportunity> {
        report.opportunities.iter().filter(|o| o.kind == kind).collect()
    }

    #[test]
    fn consecutive_waits_combine() {
        let report = analyze("WAIT 5\nWAIT 5\nWAIT 5\nEND\n");
        assert_eq!(report.opportunities.len(), 1);
        let o = &report.opportunities[0];
        assert_eq!((o.current_bytes, o.optimized_bytes, o.savings_bytes), (3, 1, 2));
        assert_eq!(o.code_after, "WAIT 15");
        assert_eq!(o.suggestion, "WAIT 15");
        assert_eq!(o.line_numbers, [1, 2, 3]);
        assert_eq!(o.severity, Severity::Low);
    }

    #[test]
    fn large_wait_sums_are_split() {
        let report = analyze("WAIT 100\nWAIT 100\nWAIT 100\nWAIT 100\nWAIT 100\n");
        let o = &report.opportunities[0];
        assert_eq!(o.code_after, "WAIT 255\nWAIT 245");
        assert_eq!(o.suggestion, "WAIT 255, WAIT 245");
        assert_eq!((o.current_bytes, o.optimized_bytes), (5, 2));

        // 800 frames still needs four commands
        let none = analyze("WAIT 200\nWAIT 200\nWAIT 200\nWAIT 200\n");
        assert!(none.opportunities.is_empty());
    }

    #[test]
    fn oversized_wait_operands_are_left_alone() {
        let report = analyze("WAIT 0xFFFFFFFF\nWAIT 0xFFFFFFFF\nWAIT 2\nEND\n");
        assert!(of_kind(&report, OptimizationKind::PatternSimplification).is_empty());

        let report = analyze("WAIT 300\nWAIT 1\nWAIT 1\nEND\n");
        assert!(of_kind(&report, OptimizationKind::PatternSimplification).is_empty());
    }

    #[test]
    fn newline_runs_and_flag_rechecks() {
        let report = analyze("NEWLINE\nNEWLINE\nNEWLINE\nCHECK_FLAG 7\nCHECK_FLAG 7\nCHECK_FLAG 8\nEND\n");
        let patterns = of_kind(&report, OptimizationKind::PatternSimplification);
        assert_eq!(patterns.len(), 2);
        let newline = patterns.iter().find(|o| o.code_after == "NEWLINE").unwrap();
        assert_eq!(newline.savings_bytes, 2);
        let flags = patterns.iter().find(|o| o.code_after == "CHECK_FLAG 7").unwrap();
        assert_eq!((flags.current_bytes, flags.optimized_bytes), (4, 2));
        assert_eq!(flags.line_numbers, [4, 5]);
    }

    #[test]
    fn write_then_read() {
        let adjacent = analyze("MEMORY_WRITE $10, 1\nMEMORY_READ $10\nEND\n");
        let o = &of_kind(&adjacent, OptimizationKind::PatternSimplification)[0];
        assert_eq!((o.current_bytes, o.optimized_bytes), (8, 4));
        assert!(of_kind(&adjacent, OptimizationKind::MemoryOptimization).is_empty());

        let spaced = analyze("MEMORY_WRITE $10, 1\nWAIT 1\nPLAY_SOUND 2\nMEMORY_READ $10\nEND\n");
        let o = &of_kind(&spaced, OptimizationKind::MemoryOptimization)[0];
        assert_eq!((o.current_bytes, o.optimized_bytes, o.savings_bytes), (8, 4, 4));
        assert_eq!(o.line_numbers, [1, 4]);

        let far = analyze("MEMORY_WRITE $10, 1\nWAIT 1\nWAIT 2\nPLAY_SOUND 1\nPLAY_SOUND 2\nPLAY_SOUND 3\nMEMORY_READ $10\n");
        assert!(of_kind(&far, OptimizationKind::MemoryOptimization).is_empty());
    }

    #[test]
    fn dead_code_runs_to_next_label() {
        let report = analyze("END\nWAIT 1\n\"lost words\"\nlater:\nRETURN\n");
        let dead = of_kind(&report, OptimizationKind::DeadCodeElimination);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].line_numbers, [2, 3]);
        assert_eq!(dead[0].current_bytes, 1 + 11);
        assert_eq!(dead[0].optimized_bytes, 0);
    }

    #[test]
    fn repeated_sequences_become_subroutines() {
        let body = "PLAY_SOUND 4\nSHAKE_SCREEN 2, 10\nFLASH_SCREEN 1, 10\nMEMORY_WRITE $20, 1\n";
        let src = format!("DIALOG A:\n{body}END\nDIALOG B:\n{body}END\nDIALOG C:\n{body}\"x\"\n{body}END\n");
        let report = analyze(&src);
        let subs = of_kind(&report, OptimizationKind::SubroutineExtraction);
        assert_eq!(subs.len(), 1);
        let o = subs[0];
        assert_eq!(o.line_numbers.len(), 4);
        assert_eq!((o.current_bytes, o.optimized_bytes), (7 * 4, 7 + 12));
        assert!(o.suggestion.starts_with("Extract as subroutine SUB_"));
        assert_eq!(o.code_after.len(), "CALL_SUBROUTINE SUB_".len() + 8);
        assert_eq!(o.dialog_id, "A");
    }

    #[test]
    fn duplicate_long_text_is_reported() {
        let text = "\"The crystal of earth has been restored\"";
        let report = analyze(&format!("DIALOG A:\n{text}\nEND\nDIALOG B:\n{text}\n\"short\"\n\"short\"\nEND\n"));
        let texts = of_kind(&report, OptimizationKind::TextDeduplication);
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].current_bytes, 39 * 2);
        assert_eq!(texts[0].optimized_bytes, 39 + 6);
    }

    #[test]
    fn every_opportunity_saves_bytes_and_order_is_by_savings() {
        let text = "\"The crystal of earth has been restored\"";
        let src = format!("WAIT 1\nWAIT 1\nWAIT 1\n{text}\n{text}\n{text}\nEND\nWAIT 9\n");
        let report = analyze(&src);
        assert!(!report.opportunities.is_empty());
        for o in &report.opportunities {
            assert!(o.savings_bytes > 0);
            assert_eq!(o.current_bytes - o.optimized_bytes, o.savings_bytes);
        }
        assert!(report.opportunities.windows(2).all(|w| w[0].savings_bytes >= w[1].savings_bytes));
        assert_eq!(report.potential_savings, report.summary.values().sum::<usize>());
        assert!(report.to_text().contains("# Script Optimization Report"));
    }

    #[test]
    fn severity_thresholds() {
        assert_eq!(Severity::for_savings(49), Severity::Low);
        assert_eq!(Severity::for_savings(50), Severity::Medium);
        assert_eq!(Severity::for_savings(200), Severity::High);
        assert_eq!(Severity::for_savings(500), Severity::Critical);
    }
}
