//! Translation memory built from a source script and its translation.
//!
//! Text literals of blocks sharing an id are aligned into translation units.
//! Units are keyed by a hash of their source and target text, so the same
//! pair always gets the same id.

use log::{debug, warn};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use crate::output::{csv_row, xml_escape};
use crate::script::{DialogBlock, Script};
use crate::Result;

static SOURCE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z]+\b").expect("source word regex"));
static TARGET_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("target word regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "from", "is",
    "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will", "would", "could",
    "should", "may", "might", "can", "this", "that", "these", "those",
];

const MIN_TERM_FREQUENCY: usize = 2;
const MAX_TERM_CONTEXTS: usize = 5;
const TOOL_NAME: &str = "QuestKit";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationUnit {
    pub tu_id: String,
    pub source_text: String,
    pub target_text: String,
    pub source_dialog: String,
    pub target_dialog: String,
    pub source_line: usize,
    pub target_line: usize,
    pub quality_score: f64,
    pub fuzzy: bool,
    pub context: String,
    pub creation_date: String,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermEntry {
    pub source_term: String,
    pub target_term: String,
    pub frequency: usize,
    pub contexts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationMetrics {
    pub total_segments: usize,
    pub translated_segments: usize,
    pub fuzzy_matches: usize,
    pub exact_matches: usize,
    pub coverage_percent: f64,
    pub average_quality: f64,
    pub consistency: f64,
    pub terminology_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationMemory {
    pub source_language: String,
    pub target_language: String,
    pub creator: String,
    pub creation_date: String,
    pub original: String,
    pub units: Vec<TranslationUnit>,
    pub terminology: Vec<TermEntry>,
    pub metrics: TranslationMetrics,
}

#[derive(Debug, Clone)]
pub struct TmBuilder {
    pub source_lang: String,
    pub target_lang: String,
    /// Minimum length similarity for a fuzzy pairing.
    pub fuzzy_threshold: f64,
    pub creator: String,
    /// TMX date form, `YYYYMMDDTHHMMSSZ`.
    pub creation_date: String,
    /// Name written as the XLIFF `original` attribute.
    pub original: String,
}

/// First 16 hex digits of `blake3("source|target")`.
pub fn tu_id(source: &str, target: &str) -> String {
    let hash = blake3::hash(format!("{source}|{target}").as_bytes());
    hash.to_hex()[..16].to_string()
}

fn normalize(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

fn length_similarity(a: &str, b: &str) -> f64 {
    let (la, lb) = (a.chars().count() as f64, b.chars().count() as f64);
    let longest = la.max(lb);
    if longest == 0.0 {
        1.0
    } else {
        1.0 - (la - lb).abs() / longest
    }
}

fn segments(block: &DialogBlock) -> Vec<(&str, usize)> {
    block.texts().collect()
}

impl TmBuilder {
    pub fn new(source_lang: &str, target_lang: &str) -> Self {
        Self {
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            fuzzy_threshold: 0.8,
            creator: TOOL_NAME.to_string(),
            creation_date: chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
            original: "script".to_string(),
        }
    }

    pub fn build(&self, source: &Script, target: &Script) -> TranslationMemory {
        let targets: HashMap<&str, &DialogBlock> = target.dialogs.iter().map(|d| (d.id.as_str(), d)).collect();
        let mut units = Vec::new();
        let mut total_segments = 0;

        for block in &source.dialogs {
            let src = segments(block);
            total_segments += src.len();
            let Some(tgt_block) = targets.get(block.id.as_str()) else {
                warn!("dialog {} has no translation; skipped", block.id);
                continue;
            };
            let tgt = segments(tgt_block);
            if src.len() == tgt.len() {
                self.align_exact(block, &src, &tgt, &mut units);
            } else {
                debug!("fuzzy aligning {}: {} source, {} target lines", block.id, src.len(), tgt.len());
                self.align_fuzzy(block, &src, &tgt, &mut units);
            }
        }

        let terminology = extract_terminology(&units);
        let metrics = metrics(total_segments, &units, terminology.len());
        TranslationMemory {
            source_language: self.source_lang.clone(),
            target_language: self.target_lang.clone(),
            creator: self.creator.clone(),
            creation_date: self.creation_date.clone(),
            original: self.original.clone(),
            units,
            terminology,
            metrics,
        }
    }

    fn unit(&self, block: &DialogBlock, src: (&str, usize), tgt: (&str, usize), quality: f64, fuzzy: bool) -> TranslationUnit {
        TranslationUnit {
            tu_id: tu_id(src.0, tgt.0),
            source_text: src.0.to_string(),
            target_text: tgt.0.to_string(),
            source_dialog: block.id.clone(),
            target_dialog: block.id.clone(),
            source_line: src.1,
            target_line: tgt.1,
            quality_score: quality,
            fuzzy,
            context: format!("Dialog {}", block.id),
            creation_date: self.creation_date.clone(),
            notes: if fuzzy {
                format!("Fuzzy aligned (similarity: {quality:.2})")
            } else {
                String::new()
            },
        }
    }

    fn align_exact(&self, block: &DialogBlock, src: &[(&str, usize)], tgt: &[(&str, usize)], out: &mut Vec<TranslationUnit>) {
        for (&s, &t) in src.iter().zip(tgt) {
            if s.0.trim().is_empty() || t.0.trim().is_empty() {
                continue;
            }
            let ratio = t.0.chars().count() as f64 / s.0.chars().count().max(1) as f64;
            let quality = if (0.5..=2.0).contains(&ratio) { 1.0 } else { 0.7 };
            out.push(self.unit(block, s, t, quality, false));
        }
    }

    fn align_fuzzy(&self, block: &DialogBlock, src: &[(&str, usize)], tgt: &[(&str, usize)], out: &mut Vec<TranslationUnit>) {
        let mut used = vec![false; tgt.len()];
        for &s in src {
            if s.0.trim().is_empty() {
                continue;
            }
            let mut best: Option<(usize, f64)> = None;
            for (j, t) in tgt.iter().enumerate() {
                if used[j] || t.0.trim().is_empty() {
                    continue;
                }
                let sim = length_similarity(s.0, t.0);
                if best.map_or(true, |(_, b)| sim > b) {
                    best = Some((j, sim));
                }
            }
            if let Some((j, sim)) = best.filter(|&(_, sim)| sim >= self.fuzzy_threshold) {
                used[j] = true;
                out.push(self.unit(block, s, tgt[j], sim, true));
            }
        }
    }
}

fn extract_terminology(units: &[TranslationUnit]) -> Vec<TermEntry> {
    let mut pairs: BTreeMap<(String, String), Vec<&str>> = BTreeMap::new();
    for unit in units {
        let targets: Vec<&str> = TARGET_WORD
            .find_iter(&unit.target_text)
            .map(|m| m.as_str())
            .filter(|w| w.chars().count() >= 2)
            .collect();
        for m in SOURCE_WORD.find_iter(&unit.source_text) {
            let word = m.as_str();
            if word.len() < 3 || STOP_WORDS.contains(&word.to_lowercase().as_str()) {
                continue;
            }
            for t in &targets {
                pairs
                    .entry((word.to_string(), t.to_string()))
                    .or_default()
                    .push(&unit.context);
            }
        }
    }

    let mut terms: Vec<TermEntry> = pairs
        .into_iter()
        .filter(|(_, contexts)| contexts.len() >= MIN_TERM_FREQUENCY)
        .map(|((source_term, target_term), contexts)| {
            let mut unique: Vec<String> = Vec::new();
            for c in &contexts {
                if unique.len() < MAX_TERM_CONTEXTS && !unique.iter().any(|u| u.as_str() == *c) {
                    unique.push(c.to_string());
                }
            }
            TermEntry {
                source_term,
                target_term,
                frequency: contexts.len(),
                contexts: unique,
            }
        })
        .collect();
    terms.sort_by(|a, b| b.frequency.cmp(&a.frequency));
    terms
}

fn metrics(total_segments: usize, units: &[TranslationUnit], terminology_count: usize) -> TranslationMetrics {
    let translated = units.len();
    let fuzzy = units.iter().filter(|u| u.fuzzy).count();

    let mut targets_by_source: HashMap<String, HashSet<&str>> = HashMap::new();
    for u in units {
        targets_by_source
            .entry(normalize(&u.source_text))
            .or_default()
            .insert(&u.target_text);
    }
    let consistent = targets_by_source.values().filter(|t| t.len() == 1).count();

    TranslationMetrics {
        total_segments,
        translated_segments: translated,
        fuzzy_matches: fuzzy,
        exact_matches: translated - fuzzy,
        coverage_percent: if total_segments == 0 {
            0.0
        } else {
            translated as f64 * 100.0 / total_segments as f64
        },
        average_quality: if translated == 0 {
            0.0
        } else {
            units.iter().map(|u| u.quality_score).sum::<f64>() / translated as f64
        },
        consistency: if targets_by_source.is_empty() {
            0.0
        } else {
            consistent as f64 / targets_by_source.len() as f64
        },
        terminology_count,
    }
}

impl TranslationMemory {
    pub fn to_tmx(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<tmx version=\"1.4\">\n");
        out.push_str(&format!(
            "  <header creationtool=\"{TOOL_NAME}\" creationtoolversion=\"{}\" datatype=\"plaintext\" segtype=\"sentence\" adminlang=\"{}\" srclang=\"{}\" o-tmf=\"{TOOL_NAME}\" creationdate=\"{}\"/>\n",
            env!("CARGO_PKG_VERSION"),
            xml_escape(&self.source_language),
            xml_escape(&self.source_language),
            xml_escape(&self.creation_date)
        ));
        out.push_str("  <body>\n");
        for u in &self.units {
            out.push_str(&format!("    <tu tuid=\"{}\">\n", u.tu_id));
            for (lang, text) in [(&self.source_language, &u.source_text), (&self.target_language, &u.target_text)] {
                out.push_str(&format!(
                    "      <tuv xml:lang=\"{}\"><seg>{}</seg></tuv>\n",
                    xml_escape(lang),
                    xml_escape(text)
                ));
            }
            out.push_str("    </tu>\n");
        }
        out.push_str("  </body>\n</tmx>\n");
        out
    }

    pub fn to_xliff(&self) -> String {
        let mut out = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<xliff version=\"1.2\" xmlns=\"urn:oasis:names:tc:xliff:document:1.2\">\n",
        );
        out.push_str(&format!(
            "  <file source-language=\"{}\" target-language=\"{}\" datatype=\"plaintext\" original=\"{}\">\n    <body>\n",
            xml_escape(&self.source_language),
            xml_escape(&self.target_language),
            xml_escape(&self.original)
        ));
        for u in &self.units {
            out.push_str(&format!(
                "      <trans-unit id=\"{}\">\n        <source>{}</source>\n        <target>{}</target>\n      </trans-unit>\n",
                u.tu_id,
                xml_escape(&u.source_text),
                xml_escape(&u.target_text)
            ));
        }
        out.push_str("    </body>\n  </file>\n</xliff>\n");
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::from("ID,Source,Target,Context,Quality,Fuzzy,Notes\n");
        for u in &self.units {
            out.push_str(&csv_row(&[
                u.tu_id.clone(),
                u.source_text.clone(),
                u.target_text.clone(),
                u.context.clone(),
                format!("{:.2}", u.quality_score),
                if u.fuzzy { "Yes" } else { "No" }.to_string(),
                u.notes.clone(),
            ]));
            out.push('\n');
        }
        out
    }

    pub fn terminology_csv(&self) -> String {
        let mut out = String::from("Source Term,Target Term,Frequency,Contexts\n");
        for t in &self.terminology {
            out.push_str(&csv_row(&[
                t.source_term.clone(),
                t.target_term.clone(),
                t.frequency.to_string(),
                t.contexts.iter().take(3).cloned().collect::<Vec<_>>().join("; "),
            ]));
            out.push('\n');
        }
        out
    }

    pub fn to_markdown(&self) -> String {
        let m = &self.metrics;
        let mut out = String::from("# Translation Memory Report\n\n## Overview\n\n");
        out.push_str(&format!(
            "- **Languages**: {} -> {}\n- **Creator**: {}\n- **Created**: {}\n\n",
            self.source_language, self.target_language, self.creator, self.creation_date
        ));
        out.push_str(&format!(
            "## Metrics\n\n- **Segments**: {}\n- **Translated**: {} ({:.1}% coverage)\n- **Exact**: {}\n- **Fuzzy**: {}\n- **Average quality**: {:.2}\n- **Consistency**: {:.1}%\n- **Terms**: {}\n",
            m.total_segments,
            m.translated_segments,
            m.coverage_percent,
            m.exact_matches,
            m.fuzzy_matches,
            m.average_quality,
            m.consistency * 100.0,
            m.terminology_count
        ));

        let bands = [
            ("Excellent (1.0)", self.units.iter().filter(|u| u.quality_score >= 1.0).count()),
            ("Good (0.8-0.99)", self.units.iter().filter(|u| (0.8..1.0).contains(&u.quality_score)).count()),
            ("Fair (0.6-0.79)", self.units.iter().filter(|u| (0.6..0.8).contains(&u.quality_score)).count()),
            ("Poor (<0.6)", self.units.iter().filter(|u| u.quality_score < 0.6).count()),
        ];
        out.push_str("\n## Quality\n\n");
        for (band, count) in bands {
            let percent = if self.units.is_empty() {
                0.0
            } else {
                count as f64 * 100.0 / self.units.len() as f64
            };
            out.push_str(&format!("- **{band}**: {count} ({percent:.1}%)\n"));
        }

        if !self.terminology.is_empty() {
            out.push_str("\n## Top terms\n\n");
            for (i, t) in self.terminology.iter().take(20).enumerate() {
                out.push_str(&format!(
                    "{}. **{}** -> **{}** ({} occurrences)\n",
                    i + 1,
                    t.source_term,
                    t.target_term,
                    t.frequency
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_script, ParseOptions};

    fn script(src: &str) -> Script {
        parse_script(src, &ParseOptions::default()).unwrap()
    }

    fn builder() -> TmBuilder {
        TmBuilder {
            creation_date: "20260101T000000Z".to_string(),
            original: "intro.evs".to_string(),
            ..TmBuilder::new("en", "fr")
        }
    }

    #[test]
    fn identical_pairs_share_an_id() {
        assert_eq!(tu_id("Hello", "Bonjour"), tu_id("Hello", "Bonjour"));
        assert_ne!(tu_id("Hello", "Bonjour"), tu_id("Hello", "Salut"));
        assert_eq!(tu_id("Hello", "Bonjour").len(), 16);
    }

    #[test]
    fn equal_line_counts_align_one_to_one() {
        let source = script("DIALOG A:\n    \"Welcome to Foresta\"\n    \"Go\"\n    END\n");
        let target = script("DIALOG A:\n    \"Bienvenue a Foresta\"\n    \"Allez, allez, allez vite\"\n    END\n");
        let tm = builder().build(&source, &target);
        assert_eq!(tm.units.len(), 2);
        assert_eq!(tm.units[0].quality_score, 1.0);
        assert_eq!(tm.units[1].quality_score, 0.7);
        assert!(!tm.units[0].fuzzy);
        assert_eq!((tm.units[0].source_line, tm.units[0].target_line), (2, 2));
        assert_eq!(tm.metrics.exact_matches, 2);
        assert_eq!(tm.metrics.coverage_percent, 100.0);
    }

    #[test]
    fn mismatched_counts_align_fuzzily() {
        let source = script("DIALOG A:\n    \"The crystal shines\"\n    \"Bye\"\n    END\n");
        let target = script("DIALOG A:\n    \"Le cristal brille\"\n    END\n");
        let tm = builder().build(&source, &target);
        assert_eq!(tm.units.len(), 1);
        let unit = &tm.units[0];
        assert!(unit.fuzzy);
        assert!(unit.quality_score >= 0.8);
        assert!(unit.notes.starts_with("Fuzzy aligned (similarity: 0.9"));
        assert_eq!(tm.metrics.total_segments, 2);
        assert_eq!(tm.metrics.coverage_percent, 50.0);
    }

    #[test]
    fn missing_target_block_is_skipped() {
        let source = script("DIALOG A:\n    \"One\"\n    END\nDIALOG B:\n    \"Two\"\n    END\n");
        let target = script("DIALOG A:\n    \"Un\"\n    END\n");
        let tm = builder().build(&source, &target);
        assert_eq!(tm.units.len(), 1);
        assert_eq!(tm.units[0].source_dialog, "A");
    }

    #[test]
    fn terminology_needs_two_occurrences() {
        let source = script("DIALOG A:\n    \"Benjamin runs\"\nDIALOG B:\n    \"Benjamin the hero\"\n");
        let target = script("DIALOG A:\n    \"Benjamin court\"\nDIALOG B:\n    \"Benjamin le héros\"\n");
        let tm = builder().build(&source, &target);
        let top = &tm.terminology[0];
        assert_eq!((top.source_term.as_str(), top.target_term.as_str()), ("Benjamin", "Benjamin"));
        assert_eq!(top.frequency, 2);
        assert_eq!(top.contexts, ["Dialog A", "Dialog B"]);
        assert!(tm.terminology.iter().all(|t| t.source_term != "the"));
        assert!(tm.terminology.iter().all(|t| t.frequency >= 2));
    }

    #[test]
    fn exports_have_the_expected_shape() {
        let source = script("DIALOG A:\n    \"Tom & Jerry\"\n    END\n");
        let target = script("DIALOG A:\n    \"Tom <et> Jerry\"\n    END\n");
        let tm = builder().build(&source, &target);

        let tmx = tm.to_tmx();
        assert!(tmx.contains("<tmx version=\"1.4\">"));
        assert!(tmx.contains("datatype=\"plaintext\" segtype=\"sentence\" adminlang=\"en\" srclang=\"en\""));
        assert!(tmx.contains("creationdate=\"20260101T000000Z\""));
        assert!(tmx.contains("<tuv xml:lang=\"en\"><seg>Tom &amp; Jerry</seg></tuv>"));
        assert!(tmx.contains("<tuv xml:lang=\"fr\"><seg>Tom &lt;et&gt; Jerry</seg></tuv>"));

        let xliff = tm.to_xliff();
        assert!(xliff.contains("<xliff version=\"1.2\" xmlns=\"urn:oasis:names:tc:xliff:document:1.2\">"));
        assert!(xliff.contains("source-language=\"en\" target-language=\"fr\" datatype=\"plaintext\" original=\"intro.evs\""));
        assert!(xliff.contains(&format!("<trans-unit id=\"{}\">", tm.units[0].tu_id)));

        let csv = tm.to_csv();
        assert!(csv.starts_with("ID,Source,Target,Context,Quality,Fuzzy,Notes\n"));
        assert!(csv.contains(",Tom & Jerry,Tom <et> Jerry,Dialog A,1.00,No,"));
        assert!(tm.to_json().unwrap().contains("\"source_language\": \"en\""));
        assert!(tm.to_markdown().contains("# Translation Memory Report"));
    }
}
