//! Dialog text codec: bytes <-> logical strings, plus text metrics.
//!
//! Human-readable form: plain glyph text, `[NAME]` or `[NAME:HH,HH]` for
//! control codes, `<HH>` for bytes the table cannot name, and a real line
//! break for the `NEWLINE` control. `\[`, `\]`, `\<` and `\\` escape the
//! bracket characters inside text.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::table::{CharTable, NEWLINE_CONTROL, END_CONTROL};
use crate::{QuestError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Token {
    Text(String),
    Control { name: String, params: Vec<u8> },
    Raw(u8),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogicalString {
    tokens: Vec<Token>,
}

impl LogicalString {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Append a token, merging adjacent text runs.
    pub fn push(&mut self, token: Token) {
        match token {
            Token::Text(text) => self.push_text(&text),
            other => self.tokens.push(other),
        }
    }

    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Token::Text(last)) = self.tokens.last_mut() {
            last.push_str(text);
        } else {
            self.tokens.push(Token::Text(text.to_string()));
        }
    }

    pub fn push_control(&mut self, name: &str) {
        self.tokens.push(Token::Control {
            name: name.to_string(),
            params: Vec::new(),
        });
    }

    /// Glyph text only, with `NEWLINE` controls as line breaks.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Text(t) => out.push_str(t),
                Token::Control { name, .. } if name == NEWLINE_CONTROL => out.push('\n'),
                _ => {}
            }
        }
        out
    }

    pub fn char_count(&self) -> usize {
        self.tokens
            .iter()
            .map(|t| match t {
                Token::Text(text) => text.chars().count(),
                _ => 0,
            })
            .sum()
    }

    pub fn parse(table: &CharTable, text: &str) -> Result<Self> {
        let chars: Vec<char> = text.chars().collect();
        let mut out = LogicalString::new();
        let mut run = String::new();
        let mut i = 0usize;

        let syntax = |position: usize, message: String| QuestError::TextSyntax { position, message };

        while i < chars.len() {
            let c = chars[i];
            match c {
                '\\' => {
                    match chars.get(i + 1) {
                        Some(&e) if matches!(e, '[' | ']' | '<' | '\\') => run.push(e),
                        Some(other) => return Err(syntax(i, format!("bad escape '\\{other}'"))),
                        None => return Err(syntax(i, "dangling '\\' at end of text".to_string())),
                    }
                    i += 2;
                }
                '[' => {
                    let close = chars[i + 1..]
                        .iter()
                        .position(|&ch| ch == ']')
                        .map(|p| p + i + 1)
                        .ok_or_else(|| syntax(i, "unmatched '['".to_string()))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    let (name, params) = match inner.split_once(':') {
                        Some((name, list)) => (name, parse_hex_list(list).map_err(|m| syntax(i, m))?),
                        None => (inner.as_str(), Vec::new()),
                    };
                    let control = table
                        .control_by_name(name)
                        .ok_or_else(|| syntax(i, format!("unknown control [{name}]")))?;
                    if params.len() != usize::from(control.param_bytes) {
                        return Err(syntax(
                            i,
                            format!(
                                "[{name}] takes {} parameter byte(s), got {}",
                                control.param_bytes,
                                params.len()
                            ),
                        ));
                    }
                    out.push_text(&std::mem::take(&mut run));
                    out.push(Token::Control {
                        name: control.name.clone(),
                        params,
                    });
                    i = close + 1;
                }
                ']' => return Err(syntax(i, "unmatched ']'".to_string())),
                '<' => {
                    let hex: String = chars.iter().skip(i + 1).take(2).collect();
                    let byte = match (u8::from_str_radix(&hex, 16), chars.get(i + 3)) {
                        (Ok(b), Some('>')) if hex.len() == 2 => b,
                        _ => return Err(syntax(i, "expected <HH> byte escape".to_string())),
                    };
                    out.push_text(&std::mem::take(&mut run));
                    out.push(Token::Raw(byte));
                    i += 4;
                }
                '\n' if table.control_by_name(NEWLINE_CONTROL).is_some() => {
                    out.push_text(&std::mem::take(&mut run));
                    out.push_control(NEWLINE_CONTROL);
                    i += 1;
                }
                '\r' => i += 1,
                _ => {
                    run.push(c);
                    i += 1;
                }
            }
        }
        out.push_text(&run);
        Ok(out)
    }
}

fn parse_hex_list(list: &str) -> std::result::Result<Vec<u8>, String> {
    list.split(',')
        .map(|p| {
            let p = p.trim();
            if p.len() != 2 {
                return Err(format!("parameter '{p}' must be two hex digits"));
            }
            u8::from_str_radix(p, 16).map_err(|_| format!("parameter '{p}' is not hex"))
        })
        .collect()
}

impl fmt::Display for LogicalString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            match token {
                Token::Text(text) => {
                    for c in text.chars() {
                        if matches!(c, '[' | ']' | '<' | '\\') {
                            write!(f, "\\{c}")?;
                        } else {
                            write!(f, "{c}")?;
                        }
                    }
                }
                Token::Control { name, params } if name == NEWLINE_CONTROL && params.is_empty() => {
                    writeln!(f)?
                }
                Token::Control { name, params } if params.is_empty() => write!(f, "[{name}]")?,
                Token::Control { name, params } => {
                    let list: Vec<String> = params.iter().map(|p| format!("{p:02X}")).collect();
                    write!(f, "[{name}:{}]", list.join(","))?
                }
                Token::Raw(b) => write!(f, "<{b:02X}>")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedText {
    pub text: LogicalString,
    /// Bytes read, including the end byte when one was found.
    pub consumed: usize,
    pub terminated: bool,
    pub warnings: Vec<String>,
}

pub fn decode(table: &CharTable, bytes: &[u8], max_length: usize) -> DecodedText {
    let limit = max_length.min(bytes.len());
    let mut text = LogicalString::new();
    let mut warnings = Vec::new();
    let mut pos = 0usize;
    let mut terminated = false;

    while pos < limit {
        let window = &bytes[pos..limit];
        let glyph = table.match_bytes(window);

        // A multi-byte key outranks a control on its lead byte.
        if let Some((len, run)) = glyph.filter(|(len, _)| *len > 1) {
            text.push_text(run);
            pos += len;
            continue;
        }

        if let Some(control) = table.control(bytes[pos]) {
            if control.name == END_CONTROL {
                pos += 1;
                terminated = true;
                break;
            }
            let n = usize::from(control.param_bytes);
            if pos + 1 + n > limit {
                warnings.push(format!(
                    "control [{}] at offset {pos} is missing its parameter bytes",
                    control.name
                ));
                text.push(Token::Raw(bytes[pos]));
                pos += 1;
                continue;
            }
            text.push(Token::Control {
                name: control.name.clone(),
                params: bytes[pos + 1..pos + 1 + n].to_vec(),
            });
            pos += 1 + n;
            continue;
        }

        match glyph {
            Some((len, run)) => {
                text.push_text(run);
                pos += len;
            }
            None => {
                let message = format!("unknown byte {:02X} at offset {pos}", bytes[pos]);
                debug!("{message}");
                warnings.push(message);
                text.push(Token::Raw(bytes[pos]));
                pos += 1;
            }
        }
    }

    if !terminated && limit == max_length && max_length < bytes.len() {
        warn!("string not terminated within {max_length} bytes");
        warnings.push(format!("no end byte within {max_length} bytes"));
    }

    DecodedText {
        text,
        consumed: pos,
        terminated,
        warnings,
    }
}

/// Encode `text` and append the end byte; fails when the result exceeds `budget`.
pub fn encode(table: &CharTable, text: &LogicalString, budget: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chars_before = 0usize;

    for token in text.tokens() {
        match token {
            Token::Text(run) => {
                let bytes = table.encode_glyph_run(run).map_err(|err| match err {
                    QuestError::UnmappedGlyph { glyph, position } => QuestError::UnmappedGlyph {
                        glyph,
                        position: position + chars_before,
                    },
                    other => other,
                })?;
                out.extend_from_slice(&bytes);
                chars_before += run.chars().count();
            }
            Token::Control { name, params } => {
                let control = table.control_by_name(name).ok_or_else(|| QuestError::TextSyntax {
                    position: chars_before,
                    message: format!("unknown control [{name}]"),
                })?;
                out.push(control.byte);
                out.extend_from_slice(params);
            }
            Token::Raw(b) => out.push(*b),
        }
    }
    out.push(table.end_byte());

    if out.len() > budget {
        return Err(QuestError::EncodeOverflow {
            needed: out.len(),
            budget,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextLimits {
    pub max_dialog_bytes: usize,
    pub max_line_chars: usize,
    pub max_lines: usize,
    /// Seconds per printed character.
    pub char_tick: f64,
    /// Seconds per `WAIT` control.
    pub wait_tick: f64,
    pub no_wait_chars: usize,
    pub paired_controls: Vec<(String, String)>,
}

impl Default for TextLimits {
    fn default() -> Self {
        Self {
            max_dialog_bytes: 512,
            max_line_chars: 32,
            max_lines: 4,
            char_tick: 0.125,
            wait_tick: 1.0,
            no_wait_chars: 50,
            paired_controls: vec![
                ("SLOW".to_string(), "NORMAL".to_string()),
                ("FAST".to_string(), "NORMAL".to_string()),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogMetrics {
    pub byte_count: usize,
    pub char_count: usize,
    pub line_count: usize,
    pub max_line_length: usize,
    pub estimated_display_time: f64,
    pub control_codes: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
}

const LINE_BREAKS: &[&str] = &["NEWLINE", "PARA"];
const BOX_BREAKS: &[&str] = &["CLEAR", "PAGE"];

pub fn calculate_metrics(table: &CharTable, text: &LogicalString, limits: &TextLimits) -> DialogMetrics {
    let mut warnings = Vec::new();
    let byte_count = match encode(table, text, usize::MAX) {
        Ok(bytes) => bytes.len(),
        Err(err) => {
            warnings.push(format!("cannot encode: {err}"));
            text.tokens()
                .iter()
                .map(|t| match t {
                    Token::Text(s) => s.chars().count(),
                    Token::Control { params, .. } => 1 + params.len(),
                    Token::Raw(_) => 1,
                })
                .sum::<usize>()
                + 1
        }
    };

    let mut control_codes: BTreeMap<String, usize> = BTreeMap::new();
    let mut line_lengths = vec![0usize];
    let mut lines_in_box = 1usize;
    let mut box_overflow = false;
    let mut has_break = false;
    let mut waits = 0usize;
    let mut open_pairs: Vec<&(String, String)> = Vec::new();

    for token in text.tokens() {
        match token {
            Token::Text(run) => {
                if let Some(last) = line_lengths.last_mut() {
                    *last += run.chars().count();
                }
            }
            Token::Control { name, .. } => {
                *control_codes.entry(name.clone()).or_default() += 1;
                if name == "WAIT" {
                    waits += 1;
                }
                if LINE_BREAKS.contains(&name.as_str()) {
                    has_break = true;
                    line_lengths.push(0);
                    lines_in_box += 1;
                    if lines_in_box > limits.max_lines {
                        box_overflow = true;
                    }
                } else if BOX_BREAKS.contains(&name.as_str()) {
                    has_break = true;
                    line_lengths.push(0);
                    lines_in_box = 1;
                }
                open_pairs.retain(|(_, close)| close != name);
                for pair in &limits.paired_controls {
                    if &pair.0 == name {
                        open_pairs.push(pair);
                    }
                }
            }
            Token::Raw(_) => {}
        }
    }

    let char_count = text.char_count();
    let max_line_length = line_lengths.iter().copied().max().unwrap_or(0);

    if byte_count > limits.max_dialog_bytes {
        warnings.push(format!(
            "dialog is {byte_count} bytes, limit is {}",
            limits.max_dialog_bytes
        ));
    }
    for (idx, len) in line_lengths.iter().enumerate() {
        if *len > limits.max_line_chars {
            warnings.push(format!(
                "line {} is {len} characters, limit is {}",
                idx + 1,
                limits.max_line_chars
            ));
        }
    }
    if box_overflow {
        warnings.push(format!(
            "more than {} lines without [CLEAR] or [PAGE]",
            limits.max_lines
        ));
    }
    if !has_break && char_count > limits.max_line_chars {
        warnings.push("text is longer than one line but has no line breaks".to_string());
    }
    if waits == 0 && char_count > limits.no_wait_chars {
        warnings.push(format!("{char_count} characters with no [WAIT]"));
    }
    for (open, close) in open_pairs {
        warnings.push(format!("[{open}] is never closed by [{close}]"));
    }

    DialogMetrics {
        byte_count,
        char_count,
        line_count: line_lengths.len(),
        max_line_length,
        estimated_display_time: char_count as f64 * limits.char_tick + waits as f64 * limits.wait_tick,
        control_codes,
        warnings,
    }
}

/// Check human-form text; errors make the result invalid, metric findings
/// are appended as `Warning: ...`.
pub fn validate(table: &CharTable, text: &str, limits: &TextLimits) -> (bool, Vec<String>) {
    let parsed = match LogicalString::parse(table, text) {
        Ok(parsed) => parsed,
        Err(err) => return (false, vec![err.to_string()]),
    };

    let mut messages = Vec::new();
    match encode(table, &parsed, limits.max_dialog_bytes) {
        Ok(_) => {}
        Err(QuestError::EncodeOverflow { needed, budget }) => {
            messages.push(format!("text needs {needed} bytes, limit is {budget}"));
        }
        Err(err) => messages.push(err.to_string()),
    }
    let ok = messages.is_empty();

    let metrics = calculate_metrics(table, &parsed, limits);
    messages.extend(
        metrics
            .warnings
            .into_iter()
            .filter(|w| !w.starts_with("cannot encode") && !w.starts_with("dialog is"))
            .map(|w| format!("Warning: {w}")),
    );
    (ok, messages)
}
