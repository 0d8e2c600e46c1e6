//! Text-encoding tables (`.tbl` files).
//!
//! A table maps byte sequences to glyph runs and names the control bytes.
//! Decoding prefers the longest byte key; encoding prefers the longest glyph
//! run and, among runs of equal length, the one declared first.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::{QuestError, Result};

/// Control codes known to the dialog engine, as (byte, name, parameter bytes).
/// Table files may rename or replace any of them.
const BUILTIN_CONTROLS: &[(u8, &str, u8)] = &[
    /* 00 */ (0x00, "END", 0),
    /* 01 */ (0x01, "NEWLINE", 0),
    /* 02 */ (0x02, "WAIT", 0),
    /* 03 */ (0x03, "ASTERISK", 0),
    /* 04 */ (0x04, "NAME", 0),
    /* 05 */ (0x05, "ITEM", 0),
    /* 06 */ (0x06, "SPACE", 0),
    /* 07 */ (0x07, "SLOW", 0),
    /* 08 */ (0x08, "NORMAL", 0),
    /* 09 */ (0x09, "FAST", 0),
    /* 0A */ (0x0A, "DELAY", 0),
    /* 0B */ (0x0B, "UNK_0B", 0),
    /* 0C */ (0x0C, "UNK_0C", 0),
    /* 0D */ (0x0D, "UNK_0D", 1),
    /* 0E */ (0x0E, "UNK_0E", 0),
    /* 0F */ (0x0F, "UNK_0F", 0),
    /* 1A */ (0x1A, "TEXTBOX_BELOW", 0),
    /* 1B */ (0x1B, "TEXTBOX_ABOVE", 0),
    /* 1F */ (0x1F, "CRYSTAL", 0),
    /* 23 */ (0x23, "CLEAR", 0),
    /* 30 */ (0x30, "PARA", 0),
    /* 36 */ (0x36, "PAGE", 0),
];

pub const END_CONTROL: &str = "END";
pub const NEWLINE_CONTROL: &str = "NEWLINE";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableMode {
    /// One byte, one glyph.
    Simple,
    /// Adds multi-character expansions and multi-byte keys.
    #[default]
    Complex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOptions {
    pub mode: TableMode,
    pub builtin_controls: bool,
    /// Inclusive byte range single-byte expansions must live in, when set.
    pub expansion_range: Option<(u8, u8)>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            mode: TableMode::Complex,
            builtin_controls: true,
            expansion_range: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlCode {
    pub name: String,
    pub byte: u8,
    pub param_bytes: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded<'a> {
    Glyph(&'a str),
    Control(&'a ControlCode),
}

#[derive(Debug, Clone)]
pub struct CharTable {
    mode: TableMode,
    decode: HashMap<Vec<u8>, String>,
    longest_key: usize,
    encode: HashMap<String, Vec<u8>>,
    longest_glyph: usize,
    controls: BTreeMap<u8, ControlCode>,
}

enum Entry {
    Glyph(String),
    Control { name: String, params: u8 },
}

fn parse_key(line: usize, key: &str) -> Result<Vec<u8>> {
    let key = key.trim();
    if key.is_empty() || key.len() % 2 != 0 {
        return Err(QuestError::TableSyntax {
            line,
            message: format!("key '{key}' must be an even number of hex digits"),
        });
    }
    (0..key.len())
        .step_by(2)
        .map(|i| {
            key.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| QuestError::TableSyntax {
                    line,
                    message: format!("'{key}' is not valid hex"),
                })
        })
        .collect()
}

fn parse_value(line: usize, value: &str) -> Result<Option<Entry>> {
    if value.is_empty() {
        return Err(QuestError::TableSyntax {
            line,
            message: "entry has no glyph".to_string(),
        });
    }
    if value == "#" {
        return Ok(None);
    }
    if value == "_" {
        return Ok(Some(Entry::Glyph(" ".to_string())));
    }

    let tag = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .or_else(|| value.strip_prefix('<').and_then(|v| v.strip_suffix('>')))
        .or_else(|| value.strip_prefix('{').and_then(|v| v.strip_suffix('}')));

    if let Some(tag) = tag {
        let (name, params) = match tag.split_once(':') {
            Some((name, count)) => {
                let params = count.trim().parse::<u8>().map_err(|_| QuestError::TableSyntax {
                    line,
                    message: format!("bad parameter count in '{value}'"),
                })?;
                (name, params)
            }
            None => (tag, 0),
        };
        let name = name.trim().to_ascii_uppercase();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(QuestError::TableSyntax {
                line,
                message: format!("bad control name in '{value}'"),
            });
        }
        return Ok(Some(Entry::Control { name, params }));
    }

    Ok(Some(Entry::Glyph(value.replace("{newline}", "\n"))))
}

impl CharTable {
    pub fn load(path: &Path, options: &TableOptions) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let table = Self::parse(&text, options)?;
        debug!(
            "loaded {} glyphs and {} control codes from {}",
            table.glyph_count(),
            table.controls.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn parse(text: &str, options: &TableOptions) -> Result<Self> {
        let mut table = CharTable {
            mode: options.mode,
            decode: HashMap::new(),
            longest_key: 1,
            encode: HashMap::new(),
            longest_glyph: 1,
            controls: BTreeMap::new(),
        };

        let mut seen_keys: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut declared_controls: BTreeMap<u8, ControlCode> = BTreeMap::new();
        let mut glyph_order: Vec<(Vec<u8>, String)> = Vec::new();

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            // Trailing spaces are significant inside glyph runs.
            let line = raw_line.trim_end_matches(['\r', '\n']).trim_start();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| QuestError::TableSyntax {
                line: line_no,
                message: format!("expected HEX=glyph, got '{line}'"),
            })?;
            let key = parse_key(line_no, key)?;

            if let Some(first) = seen_keys.get(&key) {
                return Err(QuestError::TableConflict {
                    line: line_no,
                    message: format!("key {} already defined on line {first}", hex_key(&key)),
                });
            }
            seen_keys.insert(key.clone(), line_no);

            match parse_value(line_no, value)? {
                None => {}
                Some(Entry::Control { name, params }) => {
                    if key.len() != 1 {
                        return Err(QuestError::TableSyntax {
                            line: line_no,
                            message: format!("control [{name}] must use a single-byte key"),
                        });
                    }
                    if declared_controls.values().any(|c| c.name == name) {
                        return Err(QuestError::TableConflict {
                            line: line_no,
                            message: format!("control [{name}] declared twice"),
                        });
                    }
                    declared_controls.insert(
                        key[0],
                        ControlCode {
                            name,
                            byte: key[0],
                            param_bytes: params,
                        },
                    );
                }
                Some(Entry::Glyph(glyph)) => {
                    let glyph_len = glyph.chars().count();
                    if options.mode == TableMode::Simple && (key.len() > 1 || glyph_len > 1) {
                        debug!("line {line_no}: skipping expansion '{glyph}' in simple mode");
                        continue;
                    }
                    if let (Some((lo, hi)), 1) = (options.expansion_range, key.len()) {
                        if glyph_len > 1 && !(lo..=hi).contains(&key[0]) {
                            return Err(QuestError::TableSyntax {
                                line: line_no,
                                message: format!(
                                    "expansion '{glyph}' at {:02X} is outside the reserved range {lo:02X}-{hi:02X}",
                                    key[0]
                                ),
                            });
                        }
                    }
                    glyph_order.push((key, glyph));
                }
            }
        }

        if options.builtin_controls {
            for &(byte, name, params) in BUILTIN_CONTROLS {
                let shadowed = declared_controls.contains_key(&byte)
                    || declared_controls.values().any(|c| c.name == name)
                    || glyph_order.iter().any(|(k, _)| k.as_slice() == [byte]);
                if !shadowed {
                    table.controls.insert(
                        byte,
                        ControlCode {
                            name: name.to_string(),
                            byte,
                            param_bytes: params,
                        },
                    );
                }
            }
        }
        table.controls.extend(declared_controls);

        for (key, glyph) in glyph_order {
            if table.controls.values().any(|c| c.name == glyph) {
                return Err(QuestError::TableConflict {
                    line: seen_keys.get(&key).copied().unwrap_or(0),
                    message: format!("glyph '{glyph}' collides with a control name"),
                });
            }
            table.longest_key = table.longest_key.max(key.len());
            table.longest_glyph = table.longest_glyph.max(glyph.chars().count());
            table.encode.entry(glyph.clone()).or_insert_with(|| key.clone());
            table.decode.insert(key, glyph);
        }

        Ok(table)
    }

    pub fn mode(&self) -> TableMode {
        self.mode
    }

    pub fn glyph_count(&self) -> usize {
        self.decode.len()
    }

    pub fn controls(&self) -> impl Iterator<Item = &ControlCode> {
        self.controls.values()
    }

    pub fn control(&self, byte: u8) -> Option<&ControlCode> {
        self.controls.get(&byte)
    }

    pub fn control_by_name(&self, name: &str) -> Option<&ControlCode> {
        self.controls.values().find(|c| c.name == name)
    }

    /// Byte of the `END` control, `0x00` when the table does not name one.
    pub fn end_byte(&self) -> u8 {
        self.control_by_name(END_CONTROL).map_or(0x00, |c| c.byte)
    }

    pub fn decode_byte(&self, byte: u8) -> Option<Decoded<'_>> {
        if let Some(control) = self.controls.get(&byte) {
            return Some(Decoded::Control(control));
        }
        self.decode.get([byte].as_slice()).map(|g| Decoded::Glyph(g.as_str()))
    }

    /// Longest glyph key that prefixes `bytes`, as (key length, glyph).
    pub fn match_bytes(&self, bytes: &[u8]) -> Option<(usize, &str)> {
        let max = self.longest_key.min(bytes.len());
        (1..=max)
            .rev()
            .find_map(|len| self.decode.get(&bytes[..len]).map(|g| (len, g.as_str())))
    }

    pub fn encode_glyph_run(&self, run: &str) -> Result<Vec<u8>> {
        let starts: Vec<usize> = run.char_indices().map(|(i, _)| i).collect();
        let mut out = Vec::with_capacity(run.len());
        let mut i = 0usize;

        while i < starts.len() {
            let remaining = starts.len() - i;
            let mut matched = None;
            for len in (1..=self.longest_glyph.min(remaining)).rev() {
                let end = starts.get(i + len).copied().unwrap_or(run.len());
                if let Some(bytes) = self.encode.get(&run[starts[i]..end]) {
                    matched = Some((len, bytes));
                    break;
                }
            }

            match matched {
                Some((len, bytes)) => {
                    out.extend_from_slice(bytes);
                    i += len;
                }
                None => {
                    let glyph = run[starts[i]..].chars().next().unwrap_or('?');
                    return Err(QuestError::UnmappedGlyph { glyph, position: i });
                }
            }
        }

        Ok(out)
    }
}

fn hex_key(key: &[u8]) -> String {
    key.iter().map(|b| format!("{b:02X}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complex(text: &str) -> CharTable {
        CharTable::parse(text, &TableOptions::default()).unwrap()
    }

    #[test]
    fn parses_single_byte_glyphs_and_controls() {
        let table = complex("# spells\nA0=F\nA1=i\nA2=r\nA3=e\n00=<end>\n");
        assert_eq!(table.decode_byte(0xA0), Some(Decoded::Glyph("F")));
        assert_eq!(table.end_byte(), 0x00);
        assert_eq!(table.control(0x00).map(|c| c.name.as_str()), Some("END"));
        assert_eq!(table.encode_glyph_run("Fire").unwrap(), vec![0xA0, 0xA1, 0xA2, 0xA3]);
    }

    #[test]
    fn placeholders_are_ignored_and_underscore_is_space() {
        let table = complex("40=#\n41=_\n");
        assert_eq!(table.decode_byte(0x40), None);
        assert_eq!(table.decode_byte(0x41), Some(Decoded::Glyph(" ")));
    }

    #[test]
    fn longest_expansion_wins_and_earlier_wins_ties() {
        let table = complex("50=t\n51=h\n52=e\n53=the\n54=th\n55=the\n");
        assert_eq!(table.encode_glyph_run("the").unwrap(), vec![0x53]);
        assert_eq!(table.encode_glyph_run("th").unwrap(), vec![0x54]);
        assert_eq!(table.encode_glyph_run("tet").unwrap(), vec![0x50, 0x52, 0x50]);
    }

    #[test]
    fn multi_byte_keys_match_greedily() {
        let table = complex("F0=x\nF001=ox\n");
        assert_eq!(table.match_bytes(&[0xF0, 0x01, 0x00]), Some((2, "ox")));
        assert_eq!(table.match_bytes(&[0xF0, 0x02]), Some((1, "x")));
    }

    #[test]
    fn simple_mode_skips_expansions() {
        let opts = TableOptions {
            mode: TableMode::Simple,
            ..TableOptions::default()
        };
        let table = CharTable::parse("60=a\n61=and\n6162=b\n", &opts).unwrap();
        assert_eq!(table.glyph_count(), 1);
        assert!(table.encode_glyph_run("and").is_err());
    }

    #[test]
    fn expansion_range_is_enforced() {
        let opts = TableOptions {
            expansion_range: Some((0x3D, 0x8F)),
            ..TableOptions::default()
        };
        assert!(CharTable::parse("40=the \n", &opts).is_ok());
        assert!(matches!(
            CharTable::parse("A0=the \n", &opts),
            Err(QuestError::TableSyntax { line: 1, .. })
        ));
    }

    #[test]
    fn duplicate_keys_conflict() {
        let err = CharTable::parse("A0=F\nA0=G\n", &TableOptions::default()).unwrap_err();
        assert!(matches!(err, QuestError::TableConflict { line: 2, .. }));
    }

    #[test]
    fn bad_hex_is_a_syntax_error() {
        let err = CharTable::parse("ZZ=F\n", &TableOptions::default()).unwrap_err();
        assert!(matches!(err, QuestError::TableSyntax { line: 1, .. }));
        let err = CharTable::parse("A=F\n", &TableOptions::default()).unwrap_err();
        assert!(matches!(err, QuestError::TableSyntax { .. }));
    }

    #[test]
    fn glyph_on_builtin_byte_replaces_the_control() {
        let table = complex("06=_\n");
        assert_eq!(table.decode_byte(0x06), Some(Decoded::Glyph(" ")));
        assert!(table.control_by_name("SPACE").is_none());
    }

    #[test]
    fn declared_controls_carry_parameter_counts() {
        let table = complex("1C=[COLOR:1]\n");
        let color = table.control_by_name("COLOR").unwrap();
        assert_eq!((color.byte, color.param_bytes), (0x1C, 1));
    }

    #[test]
    fn unmapped_glyph_reports_position() {
        let table = complex("A0=F\n");
        let err = table.encode_glyph_run("FQ").unwrap_err();
        assert!(matches!(err, QuestError::UnmappedGlyph { glyph: 'Q', position: 1 }));
    }
}
