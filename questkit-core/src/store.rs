//! Pointer-table dialog database.
//!
//! Entries are extracted from a banked pointer table, edited in memory and
//! written back in place. Pointers are never rewritten, so every entry must
//! fit the slot it was extracted from.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::path::Path;

use crate::address::{self, BankAddress};
use crate::codec::{self, LogicalString, Token};
use crate::output::write_atomic;
use crate::table::CharTable;
use crate::{QuestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointerTable {
    /// Flat offset of the first pointer.
    pub address: usize,
    pub count: u16,
    /// Bank every 16-bit pointer is relocated into.
    pub bank: u8,
    pub max_string_length: usize,
}

impl Default for PointerTable {
    fn default() -> Self {
        Self {
            address: 0x00_D636,
            count: 256,
            bank: 0x03,
            max_string_length: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogEntry {
    pub id: u16,
    /// Flat offset of the first byte.
    pub address: usize,
    pub pointer_value: u16,
    pub raw_bytes: Vec<u8>,
    pub text: LogicalString,
    /// Slot size: the string plus the zero padding after it, cut short at
    /// the next dialog's start.
    pub original_length: usize,
    pub modified: bool,
    pub tags: BTreeSet<String>,
    pub notes: String,
    /// Other dialog ids whose pointers resolve to the same string.
    pub references: Vec<u16>,
    /// Dialogs at lower addresses whose strings run through this one's start.
    pub enclosed_by: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchScope {
    pub text: bool,
    pub tags: bool,
    pub notes: bool,
}

impl Default for SearchScope {
    fn default() -> Self {
        Self {
            text: true,
            tags: true,
            notes: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogStatistics {
    pub total_dialogs: usize,
    pub total_bytes: usize,
    pub average_length: f64,
    pub modified_count: usize,
    pub tagged_count: usize,
    pub control_code_usage: BTreeMap<String, usize>,
    /// Slack between current lengths and slot sizes.
    pub free_bytes: usize,
}

/// Interchange record for [`DialogStore::export_json`] / [`DialogStore::import_json`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogRecord {
    pub id: u16,
    pub address: String,
    pub pointer_value: u16,
    pub text: String,
    pub length: usize,
    pub original_length: usize,
    pub modified: bool,
    pub tags: BTreeSet<String>,
    pub notes: String,
}

pub struct DialogStore<'t> {
    image: Vec<u8>,
    pointers: PointerTable,
    table: &'t CharTable,
    entries: BTreeMap<u16, DialogEntry>,
}

impl<'t> DialogStore<'t> {
    pub fn new(image: Vec<u8>, pointers: PointerTable, table: &'t CharTable) -> Self {
        Self {
            image,
            pointers,
            table,
            entries: BTreeMap::new(),
        }
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn pointer_table(&self) -> &PointerTable {
        &self.pointers
    }

    pub fn extract_all(&mut self) -> Result<usize> {
        let start = self.pointers.address;
        let end = start + usize::from(self.pointers.count) * 2;
        if end > self.image.len() {
            return Err(QuestError::AddressOutOfRange(format!(
                "pointer table {start:#08X}..{end:#08X} runs past a {:#X} byte image",
                self.image.len()
            )));
        }

        let mut located: Vec<(u16, u16, usize)> = Vec::new();
        for id in 0..self.pointers.count {
            let at = start + usize::from(id) * 2;
            let value = u16::from_le_bytes([self.image[at], self.image[at + 1]]);
            let flat = BankAddress::in_bank(self.pointers.bank, value)
                .and_then(|addr| addr.to_flat_in(self.image.len()));
            match flat {
                Ok(flat) => located.push((id, value, flat)),
                Err(err) => warn!("dialog {id}: skipping pointer {value:#06X}: {err}"),
            }
        }

        let starts: BTreeSet<usize> = located.iter().map(|&(_, _, flat)| flat).collect();
        let mut by_address: BTreeMap<usize, Vec<u16>> = BTreeMap::new();
        for &(id, _, flat) in &located {
            by_address.entry(flat).or_default().push(id);
        }

        let mut decoded_all = Vec::with_capacity(located.len());
        for (id, pointer_value, flat) in located {
            let decoded = codec::decode(self.table, &self.image[flat..], self.pointers.max_string_length);
            for w in &decoded.warnings {
                debug!("dialog {id}: {w}");
            }
            if !decoded.terminated {
                warn!("dialog {id} at {flat:#08X} has no end byte, skipping");
                continue;
            }
            decoded_all.push((id, pointer_value, flat, decoded));
        }
        let spans: Vec<(u16, usize, usize)> = decoded_all
            .iter()
            .map(|(id, _, flat, d)| (*id, *flat, flat + d.consumed))
            .collect();

        self.entries.clear();
        for (id, pointer_value, flat, decoded) in decoded_all {
            let slot_cap = starts
                .range(flat + 1..)
                .next()
                .copied()
                .unwrap_or(usize::MAX)
                .min(flat + self.pointers.max_string_length)
                .min(self.image.len());
            let mut slot_end = flat + decoded.consumed;
            while slot_end < slot_cap && self.image[slot_end] == 0 {
                slot_end += 1;
            }
            // A string that runs into the next start only owns the bytes before it.
            let slot_end = slot_end.min(slot_cap);
            let enclosed_by: Vec<u16> = spans
                .iter()
                .filter(|&&(_, start, end)| start < flat && flat < end)
                .map(|&(other, _, _)| other)
                .collect();
            if !enclosed_by.is_empty() {
                debug!("dialog {id} lies inside dialog(s) {enclosed_by:?}");
            }

            let references = by_address
                .get(&flat)
                .map(|ids| ids.iter().copied().filter(|&other| other != id).collect())
                .unwrap_or_default();

            self.entries.insert(
                id,
                DialogEntry {
                    id,
                    address: flat,
                    pointer_value,
                    raw_bytes: self.image[flat..flat + decoded.consumed].to_vec(),
                    text: decoded.text,
                    original_length: slot_end - flat,
                    modified: false,
                    tags: BTreeSet::new(),
                    notes: String::new(),
                    references,
                    enclosed_by,
                },
            );
        }

        info!(
            "extracted {} of {} dialogs from pointer table at {}",
            self.entries.len(),
            self.pointers.count,
            address::format_flat(start).unwrap_or_else(|_| format!("{start:#08X}"))
        );
        Ok(self.entries.len())
    }

    pub fn get(&self, id: u16) -> Option<&DialogEntry> {
        self.entries.get(&id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &DialogEntry> {
        self.entries.values()
    }

    pub fn modified_ids(&self) -> Vec<u16> {
        self.entries.values().filter(|e| e.modified).map(|e| e.id).collect()
    }

    fn entry_mut(&mut self, id: u16) -> Result<&mut DialogEntry> {
        self.entries.get_mut(&id).ok_or(QuestError::UnknownDialog(id))
    }

    /// An entry that may be rewritten: known, and not the tail of another string.
    fn editable(&self, id: u16) -> Result<&DialogEntry> {
        let entry = self.entries.get(&id).ok_or(QuestError::UnknownDialog(id))?;
        match entry.enclosed_by.first() {
            Some(&other) => Err(QuestError::OverlappingDialog { id, other }),
            None => Ok(entry),
        }
    }

    /// Store new contents on `id` and every alias sharing its address.
    fn commit(&mut self, id: u16, bytes: Vec<u8>, text: LogicalString) {
        let aliases = self.entries.get(&id).map(|e| e.references.clone()).unwrap_or_default();
        for alias in std::iter::once(id).chain(aliases) {
            if let Some(entry) = self.entries.get_mut(&alias) {
                entry.raw_bytes = bytes.clone();
                entry.text = text.clone();
                entry.modified = true;
            }
        }
    }

    /// Re-encode `new_text` into the entry's slot. Nothing changes on error.
    pub fn update(&mut self, id: u16, new_text: &str) -> Result<()> {
        let table = self.table;
        let entry = self.editable(id)?;
        let text = LogicalString::parse(table, new_text)?;
        let bytes = codec::encode(table, &text, entry.original_length)?;

        debug!(
            "dialog {id}: {} -> {} bytes (slot {})",
            entry.raw_bytes.len(),
            bytes.len(),
            entry.original_length
        );
        self.commit(id, bytes, text);
        Ok(())
    }

    /// Patch an entry with pre-encoded bytes. The slot size is checked by `save_rom`.
    pub fn replace_bytes(&mut self, id: u16, bytes: Vec<u8>) -> Result<()> {
        let table = self.table;
        let end = table.end_byte();
        self.editable(id)?;
        if bytes.last() != Some(&end) {
            return Err(QuestError::TextSyntax {
                position: bytes.len(),
                message: format!("raw bytes for dialog {id} must end with {end:02X}"),
            });
        }
        let text = codec::decode(table, &bytes, bytes.len()).text;
        self.commit(id, bytes, text);
        Ok(())
    }

    /// Write the image with every modified entry to `path`.
    ///
    /// Fails with `DialogTooLong` before touching the disk if any entry
    /// outgrew its slot.
    pub fn save_rom(&mut self, path: &Path) -> Result<()> {
        let modified: Vec<&DialogEntry> = self.entries.values().filter(|e| e.modified).collect();

        if let Some(e) = modified.iter().find(|e| e.raw_bytes.len() > e.original_length) {
            return Err(QuestError::DialogTooLong {
                id: e.id,
                length: e.raw_bytes.len(),
                original_length: e.original_length,
            });
        }

        let mut out = self.image.clone();
        for e in &modified {
            let start = e.address;
            let len = e.raw_bytes.len();
            out[start..start + len].copy_from_slice(&e.raw_bytes);
            out[start + len..start + e.original_length].fill(0);
        }

        write_atomic(path, &out)?;
        info!("wrote {} modified dialogs to {}", modified.len(), path.display());
        self.image = out;
        Ok(())
    }

    /// Case-insensitive substring search, returning matching ids in order.
    pub fn search(&self, query: &str, scope: SearchScope) -> Vec<u16> {
        let needle = query.to_lowercase();
        self.entries
            .values()
            .filter(|e| {
                (scope.text && e.text.to_string().to_lowercase().contains(&needle))
                    || (scope.tags && e.tags.iter().any(|t| t.to_lowercase().contains(&needle)))
                    || (scope.notes && e.notes.to_lowercase().contains(&needle))
            })
            .map(|e| e.id)
            .collect()
    }

    pub fn add_tag(&mut self, id: u16, tag: &str) -> Result<bool> {
        Ok(self.entry_mut(id)?.tags.insert(tag.to_string()))
    }

    pub fn remove_tag(&mut self, id: u16, tag: &str) -> Result<bool> {
        Ok(self.entry_mut(id)?.tags.remove(tag))
    }

    pub fn set_notes(&mut self, id: u16, notes: &str) -> Result<()> {
        self.entry_mut(id)?.notes = notes.to_string();
        Ok(())
    }

    pub fn statistics(&self) -> DialogStatistics {
        let mut control_code_usage: BTreeMap<String, usize> = BTreeMap::new();
        for e in self.entries.values() {
            for token in e.text.tokens() {
                if let Token::Control { name, .. } = token {
                    *control_code_usage.entry(name.clone()).or_default() += 1;
                }
            }
        }

        let total_dialogs = self.entries.len();
        let total_bytes: usize = self.entries.values().map(|e| e.raw_bytes.len()).sum();
        DialogStatistics {
            total_dialogs,
            total_bytes,
            average_length: if total_dialogs == 0 {
                0.0
            } else {
                total_bytes as f64 / total_dialogs as f64
            },
            modified_count: self.entries.values().filter(|e| e.modified).count(),
            tagged_count: self.entries.values().filter(|e| !e.tags.is_empty()).count(),
            control_code_usage,
            free_bytes: self
                .entries
                .values()
                .map(|e| e.original_length.saturating_sub(e.raw_bytes.len()))
                .sum(),
        }
    }

    /// Merged `[start, end)` ranges covered by dialog slots.
    pub fn used_regions(&self) -> Vec<Range<usize>> {
        let mut spans: Vec<Range<usize>> = self
            .entries
            .values()
            .map(|e| e.address..e.address + e.original_length)
            .collect();
        spans.sort_by_key(|r| (r.start, r.end));

        let mut merged: Vec<Range<usize>> = Vec::new();
        for span in spans {
            match merged.last_mut() {
                Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
                _ => merged.push(span),
            }
        }
        merged
    }

    /// First run of `size` identical fill bytes (`00` or `FF`) inside
    /// `region` that no dialog slot overlaps.
    pub fn find_free_space(&self, size: usize, region: Range<usize>) -> Option<usize> {
        if size == 0 {
            return None;
        }
        let used = self.used_regions();
        let region = region.start..region.end.min(self.image.len());

        let mut run_start = region.start;
        let mut run_len = 0usize;
        for pos in region {
            let byte = self.image[pos];
            let is_fill = (byte == 0x00 || byte == 0xFF)
                && (run_len == 0 || self.image[run_start] == byte)
                && !used.iter().any(|r| r.contains(&pos));
            if is_fill {
                if run_len == 0 {
                    run_start = pos;
                }
                run_len += 1;
                if run_len == size {
                    return Some(run_start);
                }
            } else {
                run_len = 0;
                if (byte == 0x00 || byte == 0xFF) && !used.iter().any(|r| r.contains(&pos)) {
                    run_start = pos;
                    run_len = 1;
                    if size == 1 {
                        return Some(pos);
                    }
                }
            }
        }
        None
    }

    pub fn export_json(&self) -> Result<String> {
        let records: Vec<DialogRecord> = self
            .entries
            .values()
            .map(|e| DialogRecord {
                id: e.id,
                address: address::format_flat(e.address).unwrap_or_else(|_| format!("{:#08X}", e.address)),
                pointer_value: e.pointer_value,
                text: e.text.to_string(),
                length: e.raw_bytes.len(),
                original_length: e.original_length,
                modified: e.modified,
                tags: e.tags.clone(),
                notes: e.notes.clone(),
            })
            .collect();
        Ok(serde_json::to_string_pretty(&records)?)
    }

    /// Apply text, tags and notes from an export. On the first failure every
    /// entry is restored and the error returned.
    pub fn import_json(&mut self, json: &str) -> Result<usize> {
        let records: Vec<DialogRecord> = serde_json::from_str(json)?;
        let snapshot = self.entries.clone();

        let mut applied = 0usize;
        for record in records {
            // Compare against the pre-import text so an untouched alias
            // record does not undo an edit made through its twin.
            let Some(before) = snapshot.get(&record.id) else {
                warn!("import: no dialog with id {}, skipping", record.id);
                continue;
            };
            let text_changed = before.text.to_string() != record.text;

            let result = if text_changed {
                self.update(record.id, &record.text)
            } else {
                Ok(())
            };
            if let Err(err) = result {
                self.entries = snapshot;
                return Err(err);
            }

            let entry = self.entry_mut(record.id)?;
            entry.tags = record.tags;
            entry.notes = record.notes;
            applied += 1;
        }

        info!("imported {applied} dialog records");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableOptions;
    use std::fs;
    use std::path::PathBuf;

    fn ascii_table() -> CharTable {
        let mut text = String::from("00=[END]\n");
        for (i, c) in ('A'..='Z').enumerate() {
            text.push_str(&format!("{:02X}={c}\n", 0x90 + i));
        }
        for (i, c) in ('a'..='z').enumerate() {
            text.push_str(&format!("{:02X}={c}\n", 0xB4 + i));
        }
        text.push_str("CE=!\nFF=_\n");
        CharTable::parse(&text, &TableOptions::default()).unwrap()
    }

    const HI: [u8; 4] = [0x97, 0xBC, 0xCE, 0x00];
    const BYE: [u8; 4] = [0x91, 0xCC, 0xB8, 0x00];

    /// "Hi!" at 0x018036 and "Bye" at `second`, with the pointer table at 0x0D636.
    fn image(second: u16) -> Vec<u8> {
        let mut rom = vec![0xEEu8; 0x2_0000];
        rom[0xD636..0xD638].copy_from_slice(&0x8036u16.to_le_bytes());
        rom[0xD638..0xD63A].copy_from_slice(&second.to_le_bytes());
        rom[0x1_8036..0x1_803A].copy_from_slice(&HI);
        let flat = 0x1_8000 + usize::from(second - 0x8000);
        rom[0x1_803A..flat].fill(0);
        rom[flat..flat + 4].copy_from_slice(&BYE);
        rom
    }

    fn two_entry_table() -> PointerTable {
        PointerTable {
            count: 2,
            ..PointerTable::default()
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("questkit-store-{}-{name}", std::process::id()))
    }

    #[test]
    fn extracts_pointer_indexed_dialogs() {
        let table = ascii_table();
        let mut store = DialogStore::new(image(0x8040), two_entry_table(), &table);
        assert_eq!(store.extract_all().unwrap(), 2);

        let hi = store.get(0).unwrap();
        assert_eq!((hi.address, hi.text.to_string().as_str()), (0x01_8036, "Hi!"));
        assert_eq!(hi.pointer_value, 0x8036);
        assert_eq!(hi.raw_bytes, HI);
        assert_eq!(hi.original_length, 10);

        let bye = store.get(1).unwrap();
        assert_eq!((bye.address, bye.text.to_string().as_str()), (0x01_8040, "Bye"));
        assert_eq!(bye.original_length, 4);
    }

    #[test]
    fn overflowing_update_is_rejected_and_nothing_is_written() {
        let table = ascii_table();
        let mut store = DialogStore::new(image(0x803C), two_entry_table(), &table);
        store.extract_all().unwrap();
        assert_eq!(store.get(0).unwrap().original_length, 6);

        let err = store.update(0, "Hello World").unwrap_err();
        assert!(matches!(err, QuestError::EncodeOverflow { needed: 12, budget: 6 }));
        assert!(!store.get(0).unwrap().modified);
        assert_eq!(store.get(0).unwrap().text.to_string(), "Hi!");
        assert!(store.modified_ids().is_empty());
    }

    #[test]
    fn save_rejects_oversized_patch_atomically() {
        let table = ascii_table();
        let rom = image(0x803C);
        let mut store = DialogStore::new(rom.clone(), two_entry_table(), &table);
        store.extract_all().unwrap();

        let path = temp_path("atomic.sfc");
        fs::write(&path, &rom).unwrap();
        store.replace_bytes(0, vec![0x90; 8].into_iter().chain([0x00]).collect()).unwrap();

        let err = store.save_rom(&path).unwrap_err();
        assert!(matches!(err, QuestError::DialogTooLong { id: 0, length: 9, original_length: 6 }));
        assert_eq!(fs::read(&path).unwrap(), rom);
        assert_eq!(store.image(), rom.as_slice());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn save_writes_in_place_and_zero_fills_slack() {
        let table = ascii_table();
        let mut store = DialogStore::new(image(0x8040), two_entry_table(), &table);
        store.extract_all().unwrap();
        store.update(0, "Yo").unwrap();
        assert!(store.get(0).unwrap().raw_bytes.len() <= store.get(0).unwrap().original_length);

        let path = temp_path("saved.sfc");
        store.save_rom(&path).unwrap();
        let written = fs::read(&path).unwrap();
        assert_eq!(&written[0x1_8036..0x1_8039], &[0xA8, 0xC2, 0x00]);
        assert!(written[0x1_8039..0x1_8040].iter().all(|&b| b == 0));
        assert_eq!(&written[0x1_8040..0x1_8044], &BYE);
        assert_eq!(&written[0xD636..0xD63A], &[0x36, 0x80, 0x40, 0x80]);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn update_grows_into_reclaimed_padding() {
        let table = ascii_table();
        let mut store = DialogStore::new(image(0x8040), two_entry_table(), &table);
        store.extract_all().unwrap();
        store.update(0, "Hello!!!!").unwrap();
        assert_eq!(store.get(0).unwrap().raw_bytes.len(), 10);
        assert!(store.update(0, "Hello!!!!!").is_err());
    }

    #[test]
    fn bad_pointers_are_skipped() {
        let table = ascii_table();
        let mut rom = image(0x8040);
        rom[0xD638..0xD63A].copy_from_slice(&0x1234u16.to_le_bytes());
        let mut store = DialogStore::new(rom, two_entry_table(), &table);
        assert_eq!(store.extract_all().unwrap(), 1);
        assert!(store.get(1).is_none());
        assert!(matches!(store.update(1, "x"), Err(QuestError::UnknownDialog(1))));
    }

    #[test]
    fn pointer_table_outside_image_fails() {
        let table = ascii_table();
        let pointers = PointerTable {
            address: 0x1_FFFF,
            ..two_entry_table()
        };
        let mut store = DialogStore::new(image(0x8040), pointers, &table);
        assert!(matches!(store.extract_all(), Err(QuestError::AddressOutOfRange(_))));
    }

    #[test]
    fn shared_pointers_reference_each_other() {
        let table = ascii_table();
        let mut rom = image(0x8040);
        rom[0xD638..0xD63A].copy_from_slice(&0x8036u16.to_le_bytes());
        let mut store = DialogStore::new(rom, two_entry_table(), &table);
        store.extract_all().unwrap();
        assert_eq!(store.get(0).unwrap().references, vec![1]);
        assert_eq!(store.get(1).unwrap().references, vec![0]);
    }

    /// "Hi!!" at 0x018036 with dialog 1 pointing at its "!!" tail.
    fn tail_shared_image() -> Vec<u8> {
        let mut rom = vec![0xEEu8; 0x2_0000];
        rom[0xD636..0xD638].copy_from_slice(&0x8036u16.to_le_bytes());
        rom[0xD638..0xD63A].copy_from_slice(&0x8038u16.to_le_bytes());
        rom[0x1_8036..0x1_803B].copy_from_slice(&[0x97, 0xBC, 0xCE, 0xCE, 0x00]);
        rom
    }

    #[test]
    fn tail_shared_strings_keep_their_neighbour_intact() {
        let table = ascii_table();
        let mut store = DialogStore::new(tail_shared_image(), two_entry_table(), &table);
        store.extract_all().unwrap();

        let head = store.get(0).unwrap();
        assert_eq!(head.text.to_string(), "Hi!!");
        assert_eq!(head.original_length, 2);
        assert!(head.enclosed_by.is_empty());
        let tail = store.get(1).unwrap();
        assert_eq!(tail.text.to_string(), "!!");
        assert_eq!(tail.enclosed_by, vec![0]);

        assert!(matches!(store.update(0, "Yoyo"), Err(QuestError::EncodeOverflow { needed: 5, budget: 2 })));
        assert!(matches!(
            store.update(1, "Yo"),
            Err(QuestError::OverlappingDialog { id: 1, other: 0 })
        ));
        assert!(store.replace_bytes(1, vec![0xA8, 0x00]).is_err());

        store.update(0, "Y").unwrap();
        let path = temp_path("tail.sfc");
        store.save_rom(&path).unwrap();
        let mut reread = DialogStore::new(fs::read(&path).unwrap(), two_entry_table(), &table);
        reread.extract_all().unwrap();
        assert_eq!(reread.get(0).unwrap().text.to_string(), "Y");
        assert_eq!(reread.get(1).unwrap().text.to_string(), "!!");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn editing_one_alias_updates_the_other() {
        let table = ascii_table();
        let mut rom = image(0x8040);
        rom[0xD638..0xD63A].copy_from_slice(&0x8036u16.to_le_bytes());
        let mut store = DialogStore::new(rom, two_entry_table(), &table);
        store.extract_all().unwrap();

        store.update(0, "Yo").unwrap();
        assert_eq!(store.get(1).unwrap().text.to_string(), "Yo");
        assert_eq!(store.modified_ids(), vec![0, 1]);

        store.extract_all().unwrap();
        let mut records: Vec<DialogRecord> = serde_json::from_str(&store.export_json().unwrap()).unwrap();
        records[0].text = "Yo".to_string();
        store.import_json(&serde_json::to_string(&records).unwrap()).unwrap();
        assert_eq!(store.get(0).unwrap().text.to_string(), "Yo");
        assert_eq!(store.get(1).unwrap().text.to_string(), "Yo");
    }

    #[test]
    fn search_tags_and_notes() {
        let table = ascii_table();
        let mut store = DialogStore::new(image(0x8040), two_entry_table(), &table);
        store.extract_all().unwrap();
        assert!(store.add_tag(1, "Farewell").unwrap());
        assert!(!store.add_tag(1, "Farewell").unwrap());
        store.set_notes(0, "greeting in Foresta").unwrap();

        assert_eq!(store.search("hi", SearchScope::default()), vec![0]);
        assert_eq!(store.search("farewell", SearchScope::default()), vec![1]);
        let text_only = SearchScope {
            text: true,
            tags: false,
            notes: false,
        };
        assert!(store.search("foresta", text_only).is_empty());
        assert!(store.remove_tag(1, "Farewell").unwrap());
        assert!(store.search("farewell", SearchScope::default()).is_empty());
    }

    #[test]
    fn statistics_and_regions() {
        let table = ascii_table();
        let mut store = DialogStore::new(image(0x8040), two_entry_table(), &table);
        store.extract_all().unwrap();
        let stats = store.statistics();
        assert_eq!(stats.total_dialogs, 2);
        assert_eq!(stats.total_bytes, 8);
        assert_eq!(stats.free_bytes, 6);
        assert_eq!(store.used_regions(), vec![0x1_8036..0x1_8044]);
        assert_eq!(store.find_free_space(4, 0x1_8000..0x1_8100), None);

        let mut rom = image(0x8040);
        rom[0x1_9000..0x1_9010].fill(0xFF);
        let mut store = DialogStore::new(rom, two_entry_table(), &table);
        store.extract_all().unwrap();
        assert_eq!(store.find_free_space(16, 0x1_8000..0x1_A000), Some(0x1_9000));
    }

    #[test]
    fn json_import_rolls_back_on_failure() {
        let table = ascii_table();
        let mut store = DialogStore::new(image(0x803C), two_entry_table(), &table);
        store.extract_all().unwrap();

        let mut records: Vec<DialogRecord> = serde_json::from_str(&store.export_json().unwrap()).unwrap();
        records[0].text = "Yo".to_string();
        records[0].tags.insert("edited".to_string());
        records[1].text = "Far too long for this slot".to_string();
        let err = store.import_json(&serde_json::to_string(&records).unwrap()).unwrap_err();
        assert!(matches!(err, QuestError::EncodeOverflow { .. }));
        assert_eq!(store.get(0).unwrap().text.to_string(), "Hi!");
        assert!(store.get(0).unwrap().tags.is_empty());

        records[1].text = "Bye".to_string();
        assert_eq!(store.import_json(&serde_json::to_string(&records).unwrap()).unwrap(), 2);
        assert_eq!(store.get(0).unwrap().text.to_string(), "Yo");
        assert_eq!(store.modified_ids(), vec![0]);
    }
}
