use log::debug;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::commands;
use crate::script::{Command, DialogBlock, Item, Param, Radix, Script, ScriptError, SourceLine};

static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^DIALOG\s+([A-Za-z0-9_]+)\s*:$").expect("header regex"));
static LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("label regex"));
static MNEMONIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("mnemonic regex"));
static BANK_OFFSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0[xX]([0-9A-Fa-f]{2})/([0-9A-Fa-f]{4})$").expect("bank/offset regex"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Unknown mnemonics become errors instead of warnings.
    pub strict: bool,
}

/// Parse a script, failing on the first error.
pub fn parse_script(src: &str, options: &ParseOptions) -> Result<Script, ScriptError> {
    let (script, errors) = parse_script_recovering(src, options);
    match errors.into_iter().next() {
        Some(err) => Err(err),
        None => Ok(script),
    }
}

/// Parse a script, collecting every error. Lines that fail are skipped.
pub fn parse_script_recovering(src: &str, options: &ParseOptions) -> (Script, Vec<ScriptError>) {
    let mut parser = Parser {
        options: *options,
        script: Script::default(),
        block: DialogBlock::new("MAIN", 0, false),
        labels: HashMap::new(),
        errors: Vec::new(),
    };

    for (idx, raw_line) in src.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if let Err(err) = parser.line(line_no, line) {
            parser.errors.push(err);
        }
    }

    parser.finish()
}

struct Parser {
    options: ParseOptions,
    script: Script,
    block: DialogBlock,
    /// Label name -> defining line, for the current block.
    labels: HashMap<String, usize>,
    errors: Vec<ScriptError>,
}

/// A parameter token before classification.
enum Tok {
    Bare(String),
    Quoted(String),
}

fn syntax(line: usize, column: usize, message: impl Into<String>) -> ScriptError {
    ScriptError::Syntax {
        line,
        column,
        message: message.into(),
    }
}

/// Split off a `;` comment that is not inside a quoted string.
fn strip_comment(line: &str) -> &str {
    let mut in_quote = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quote => escaped = true,
            '"' => in_quote = !in_quote,
            ';' if !in_quote => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Read a quoted string starting at `chars[start] == '"'`.
/// Returns the body and the index just past the closing quote.
fn read_quoted(chars: &[(usize, char)], start: usize) -> Option<(String, usize)> {
    let mut body = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i].1 {
            '\\' if i + 1 < chars.len() => {
                body.push(chars[i + 1].1);
                i += 2;
            }
            '"' => return Some((body, i + 1)),
            c => {
                body.push(c);
                i += 1;
            }
        }
    }
    None
}

fn classify(token: &str) -> Param {
    if let Some(caps) = BANK_OFFSET.captures(token) {
        if let (Ok(bank), Ok(offset)) = (
            u8::from_str_radix(&caps[1], 16),
            u16::from_str_radix(&caps[2], 16),
        ) {
            return Param::BankOffset { bank, offset };
        }
    }

    let number = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        hex_digits(hex).map(|value| (value, Radix::Hex))
    } else if let Some(hex) = token.strip_prefix('$') {
        hex_digits(hex).map(|value| (value, Radix::Dollar))
    } else if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
        token.parse::<u32>().ok().map(|value| (value, Radix::Decimal))
    } else {
        None
    };
    if let Some((value, radix)) = number {
        return Param::Number { value, radix };
    }

    if LABEL.is_match(token) {
        Param::Ident(token.to_string())
    } else {
        Param::Raw(token.to_string())
    }
}

fn hex_digits(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

impl Parser {
    fn line(&mut self, line_no: usize, line: &str) -> Result<(), ScriptError> {
        let code = strip_comment(line);
        let trimmed = code.trim();
        let indent = code.len() - code.trim_start().len();
        let column = code[..indent].chars().count() + 1;

        if trimmed.starts_with("DIALOG") && (trimmed.len() == 6 || trimmed[6..].starts_with(char::is_whitespace)) {
            let caps = HEADER
                .captures(trimmed)
                .ok_or_else(|| syntax(line_no, column, "expected 'DIALOG <id>:'"))?;
            self.start_block(&caps[1], line_no);
            self.block.lines.push(SourceLine {
                number: line_no,
                text: line.to_string(),
            });
            return Ok(());
        }

        self.block.lines.push(SourceLine {
            number: line_no,
            text: line.to_string(),
        });
        if trimmed.is_empty() {
            return Ok(());
        }

        if trimmed.starts_with('"') {
            let chars: Vec<(usize, char)> = trimmed.char_indices().collect();
            let (text, end) = read_quoted(&chars, 0)
                .ok_or_else(|| syntax(line_no, column, "unterminated string"))?;
            if end < chars.len() {
                return Err(syntax(line_no, column + end, "unexpected text after string"));
            }
            self.block.items.push(Item::Text { text, line: line_no });
            return Ok(());
        }

        if let Some(name) = trimmed.strip_suffix(':') {
            if !name.contains(char::is_whitespace) {
                return self.label(line_no, column, name);
            }
        }

        self.command(line_no, column, trimmed)
    }

    fn start_block(&mut self, id: &str, line_no: usize) {
        let previous = std::mem::replace(&mut self.block, DialogBlock::new(id, line_no, true));
        if !previous.explicit_header && previous.items.is_empty() {
            // Leading comments and blanks move into the first real block.
            self.block.lines = previous.lines;
        } else {
            self.script.dialogs.push(previous);
        }
        self.labels.clear();
    }

    fn label(&mut self, line_no: usize, column: usize, name: &str) -> Result<(), ScriptError> {
        if !LABEL.is_match(name) {
            return Err(syntax(line_no, column, format!("invalid label name '{name}'")));
        }
        if let Some(&first) = self.labels.get(name) {
            return Err(ScriptError::DuplicateLabel {
                line: line_no,
                name: name.to_string(),
                first,
            });
        }
        self.labels.insert(name.to_string(), line_no);
        self.block.items.push(Item::Label {
            name: name.to_string(),
            line: line_no,
        });
        Ok(())
    }

    fn command(&mut self, line_no: usize, column: usize, text: &str) -> Result<(), ScriptError> {
        let (mnemonic, rest) = match text.find(char::is_whitespace) {
            Some(pos) => (&text[..pos], &text[pos..]),
            None => (text, ""),
        };
        if !MNEMONIC.is_match(mnemonic) {
            return Err(syntax(line_no, column, format!("invalid command '{mnemonic}'")));
        }

        let param_column = column + mnemonic.chars().count();
        let mut params = Vec::new();
        for tok in tokenize(rest, line_no, param_column)? {
            params.push(match tok {
                Tok::Quoted(s) => Param::Str(s),
                Tok::Bare(t) => classify(&t),
            });
        }

        let known = commands::lookup(mnemonic).is_some();
        let command = Command {
            mnemonic: mnemonic.to_string(),
            params,
            line: line_no,
            column,
            known,
        };
        self.block.items.push(Item::Command(command));

        if !known {
            let err = ScriptError::UnknownCommand {
                line: line_no,
                mnemonic: mnemonic.to_string(),
            };
            if self.options.strict {
                return Err(err);
            }
            debug!("{err}");
            self.script.warnings.push(err);
        }
        Ok(())
    }

    fn finish(mut self) -> (Script, Vec<ScriptError>) {
        self.script.dialogs.push(self.block);
        (self.script, self.errors)
    }
}

/// Split a parameter list on commas and whitespace, keeping quoted strings whole.
fn tokenize(rest: &str, line_no: usize, base_column: usize) -> Result<Vec<Tok>, ScriptError> {
    let chars: Vec<(usize, char)> = rest.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    let mut after_comma = false;
    let mut expect_separator = false;

    while i < chars.len() {
        let c = chars[i].1;
        if c.is_whitespace() {
            expect_separator = false;
            i += 1;
            continue;
        }
        if c == ',' {
            if tokens.is_empty() || after_comma {
                return Err(syntax(line_no, base_column + i, "empty parameter"));
            }
            after_comma = true;
            expect_separator = false;
            i += 1;
            continue;
        }
        if expect_separator {
            return Err(syntax(line_no, base_column + i, "missing separator between parameters"));
        }

        if c == '"' {
            let (body, end) = read_quoted(&chars, i)
                .ok_or_else(|| syntax(line_no, base_column + i, "unterminated string"))?;
            tokens.push(Tok::Quoted(body));
            i = end;
        } else {
            let start = i;
            while i < chars.len() && !chars[i].1.is_whitespace() && chars[i].1 != ',' && chars[i].1 != '"' {
                i += 1;
            }
            let token: String = chars[start..i].iter().map(|&(_, ch)| ch).collect();
            tokens.push(Tok::Bare(token));
        }
        after_comma = false;
        expect_separator = true;
    }

    if after_comma {
        return Err(syntax(line_no, base_column + chars.len(), "trailing comma"));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{serialize_script, ItemShape};
    use proptest::prelude::*;

    const SAMPLE: &str = "\
; intro scene
DIALOG INTRO:
    SHOW_TEXTBOX
    \"Welcome to Foresta!\"   ; greeting
    CHECK_FLAG 0x1F
    JUMP_IF seen
    GIVE_ITEM 5, 1
    SET_FLAG $1F
seen:
    MEMORY_WRITE 0x7E/8000 0x10
    END

DIALOG OUTRO:
    WAIT 5
    RETURN
";

    fn parse(src: &str) -> Script {
        parse_script(src, &ParseOptions::default()).unwrap()
    }

    #[test]
    fn parses_blocks_labels_and_params() {
        let script = parse(SAMPLE);
        assert_eq!(script.dialogs.len(), 2);
        let intro = &script.dialogs[0];
        assert_eq!((intro.id.as_str(), intro.header_line), ("INTRO", 2));
        assert_eq!(intro.lines.first().map(|l| l.number), Some(1));
        assert_eq!(intro.labels().get("seen"), Some(&9));

        let cmds: Vec<&Command> = intro.commands().collect();
        assert_eq!(cmds[1].params, vec![Param::Number { value: 0x1F, radix: Radix::Hex }]);
        assert_eq!(cmds[1].line, 5);
        assert_eq!(cmds[1].column, 5);
        assert_eq!(cmds[2].target(), Some("seen"));
        assert_eq!(cmds[3].params.len(), 2);
        assert_eq!(cmds[4].params, vec![Param::Number { value: 0x1F, radix: Radix::Dollar }]);
        assert_eq!(
            cmds[5].params,
            vec![
                Param::BankOffset { bank: 0x7E, offset: 0x8000 },
                Param::Number { value: 0x10, radix: Radix::Hex }
            ]
        );
        assert_eq!(intro.texts().next(), Some(("Welcome to Foresta!", 4)));
    }

    #[test]
    fn file_without_header_is_main() {
        let script = parse("WAIT 1\nEND\n");
        assert_eq!(script.dialogs.len(), 1);
        assert_eq!(script.dialogs[0].id, "MAIN");
        assert!(!script.dialogs[0].explicit_header);
    }

    #[test]
    fn unknown_mnemonic_warns_or_fails_in_strict_mode() {
        let script = parse("FROBNICATE 1\nEND\n");
        assert_eq!(script.warnings.len(), 1);
        assert!(!script.dialogs[0].commands().next().unwrap().known);

        let err = parse_script("FROBNICATE 1\n", &ParseOptions { strict: true }).unwrap_err();
        assert_eq!(
            err,
            ScriptError::UnknownCommand {
                line: 1,
                mnemonic: "FROBNICATE".into()
            }
        );
    }

    #[test]
    fn duplicate_labels_are_scoped_per_block() {
        let err = parse_script("a:\nEND\na:\n", &ParseOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ScriptError::DuplicateLabel {
                line: 3,
                name: "a".into(),
                first: 1
            }
        );
        assert!(parse_script("DIALOG A:\nx:\nEND\nDIALOG B:\nx:\nEND\n", &ParseOptions::default()).is_ok());
    }

    #[test]
    fn malformed_lines_report_position() {
        let cases = [
            ("  \"open", 1, 3),
            ("wait 5", 1, 1),
            ("9bad:", 1, 1),
            ("GIVE_ITEM 1,,2", 1, 13),
            ("DIALOG :", 1, 1),
        ];
        for (src, line, column) in cases {
            match parse_script(src, &ParseOptions::default()) {
                Err(ScriptError::Syntax { line: l, column: c, .. }) => {
                    assert_eq!((l, c), (line, column), "{src}")
                }
                other => panic!("{src}: {other:?}"),
            }
        }
    }

    #[test]
    fn odd_tokens_become_raw_params() {
        let script = parse("WAIT -3\nWAIT 0xZZ\nWAIT 12ab\n");
        let params: Vec<&Param> = script.dialogs[0].commands().map(|c| &c.params[0]).collect();
        assert!(params.iter().all(|p| matches!(p, Param::Raw(_))));
    }

    #[test]
    fn semicolons_inside_strings_are_kept() {
        let script = parse("\"a; b\" ; trailing\n");
        assert_eq!(script.dialogs[0].texts().next(), Some(("a; b", 1)));
    }

    #[test]
    fn recovering_parse_collects_every_error() {
        let (script, errors) = parse_script_recovering("wait\n\"x\nEND\n", &ParseOptions::default());
        assert_eq!(errors.len(), 2);
        assert_eq!(script.dialogs[0].commands().count(), 1);
        assert_eq!(script.dialogs[0].lines.len(), 3);
    }

    #[test]
    fn serialize_then_parse_keeps_structure() {
        let first = parse(SAMPLE);
        let again = parse(&serialize_script(&first));
        assert_eq!(again.structure(), first.structure());
    }

    fn item_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z_][a-z0-9_]{0,6}".prop_map(|l| format!("{l}:")),
            (0u32..300).prop_map(|n| format!("WAIT {n}")),
            (0u32..0x1_0000).prop_map(|n| format!("CHECK_FLAG 0x{n:X}")),
            (0u32..256, 0u32..256).prop_map(|(a, b)| format!("GIVE_ITEM ${a:X} {b}")),
            "[a-z_][a-z0-9_]{0,6}".prop_map(|l| format!("JUMP {l}")),
            "[A-Za-z !?,.]{0,20}".prop_map(|t| format!("\"{t}\"")),
            Just("END".to_string()),
            Just("; note".to_string()),
            Just(String::new()),
        ]
    }

    proptest! {
        #[test]
        fn parse_serialize_parse_is_stable(lines in prop::collection::vec(item_strategy(), 0..25)) {
            let src = lines.join("\n");
            if let Ok(first) = parse_script(&src, &ParseOptions::default()) {
                let again = parse_script(&serialize_script(&first), &ParseOptions::default()).unwrap();
                prop_assert_eq!(again.structure(), first.structure());
            }
        }
    }

    #[test]
    fn structure_ignores_line_numbers() {
        let a = parse("WAIT 1\n\n\nEND\n");
        let b = parse("WAIT 1\nEND\n");
        assert_eq!(a.structure(), b.structure());
        assert!(matches!(a.structure()[0].1[1], ItemShape::Command(ref m, _) if m == "END"));
    }
}
