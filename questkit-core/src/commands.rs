//! Event-script command table.
//!
//! Parser, CFG builder, linter, validator, optimizer and parameter database
//! all read command arity, flow and size from [`COMMANDS`].

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Byte,
    Word,
    Label,
    Address,
    Flag,
    Str,
}

impl ParamType {
    pub fn name(self) -> &'static str {
        match self {
            ParamType::Byte => "byte",
            ParamType::Word => "word",
            ParamType::Label => "label",
            ParamType::Address => "address",
            ParamType::Flag => "flag",
            ParamType::Str => "string",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Dialog,
    Flow,
    Flags,
    Items,
    Map,
    Battle,
    Special,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Flow {
    Linear,
    /// Conditional transfer to a label; falls through otherwise.
    Branch,
    /// Unconditional transfer to a label.
    Jump,
    Call,
    Return,
    End,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CommandSpec {
    pub mnemonic: &'static str,
    pub params: &'static [ParamType],
    pub category: Category,
    pub flow: Flow,
    /// Reads or writes game memory (flags included).
    pub memory: bool,
    /// Encoded size in bytes.
    pub size: usize,
    pub description: &'static str,
    pub syntax: &'static str,
}

impl CommandSpec {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.flow, Flow::End | Flow::Return)
    }

    pub fn transfers_control(&self) -> bool {
        !matches!(self.flow, Flow::Linear)
    }
}

use Category as C;
use Flow as F;
use ParamType as P;

const fn cmd(
    mnemonic: &'static str,
    params: &'static [ParamType],
    category: Category,
    flow: Flow,
    size: usize,
    description: &'static str,
    syntax: &'static str,
) -> CommandSpec {
    CommandSpec {
        mnemonic,
        params,
        category,
        flow,
        memory: false,
        size,
        description,
        syntax,
    }
}

const fn mem(spec: CommandSpec) -> CommandSpec {
    CommandSpec { memory: true, ..spec }
}

pub static COMMANDS: &[CommandSpec] = &[
    // dialog
    cmd("SHOW_DIALOG", &[P::Word], C::Dialog, F::Linear, 1, "Display dialog by id", "SHOW_DIALOG id"),
    cmd("SHOW_TEXTBOX", &[], C::Dialog, F::Linear, 1, "Open the text box", "SHOW_TEXTBOX"),
    cmd("CHOICE", &[P::Byte, P::Byte], C::Dialog, F::Linear, 1, "Present a choice menu", "CHOICE options, default"),
    cmd("NEWLINE", &[], C::Dialog, F::Linear, 1, "Line break in the text box", "NEWLINE"),
    cmd("WAIT", &[P::Byte], C::Dialog, F::Linear, 1, "Wait for frames", "WAIT frames"),
    cmd("DELAY", &[P::Byte], C::Dialog, F::Linear, 1, "Delay text output", "DELAY frames"),
    // flow
    cmd("END", &[], C::Flow, F::End, 1, "End of script", "END"),
    cmd("RETURN", &[], C::Flow, F::Return, 1, "Return from subroutine", "RETURN"),
    cmd("JUMP", &[P::Label], C::Flow, F::Jump, 1, "Unconditional jump", "JUMP label"),
    cmd("JUMP_IF", &[P::Label], C::Flow, F::Branch, 1, "Jump if the last check passed", "JUMP_IF label"),
    cmd("BRANCH", &[P::Label], C::Flow, F::Branch, 1, "Conditional branch", "BRANCH label"),
    cmd("CHECK_FLAG", &[P::Flag], C::Flow, F::Branch, 2, "Test an event flag", "CHECK_FLAG flag"),
    cmd("CHECK_ITEM", &[P::Byte], C::Flow, F::Branch, 1, "Test for an item", "CHECK_ITEM item"),
    cmd("CALL", &[P::Address], C::Flow, F::Call, 3, "Call a routine", "CALL address"),
    cmd("CALL_SUBROUTINE", &[P::Address], C::Flow, F::Call, 3, "Call a script subroutine", "CALL_SUBROUTINE address"),
    // flags and memory
    mem(cmd("SET_FLAG", &[P::Flag], C::Flags, F::Linear, 2, "Set an event flag", "SET_FLAG flag")),
    mem(cmd("CLEAR_FLAG", &[P::Flag], C::Flags, F::Linear, 2, "Clear an event flag", "CLEAR_FLAG flag")),
    mem(cmd("TOGGLE_FLAG", &[P::Flag], C::Flags, F::Linear, 2, "Toggle an event flag", "TOGGLE_FLAG flag")),
    mem(cmd("MEMORY_WRITE", &[P::Address, P::Byte], C::Flags, F::Linear, 4, "Write a byte to memory", "MEMORY_WRITE address, value")),
    mem(cmd("MEMORY_READ", &[P::Address], C::Flags, F::Linear, 4, "Read a byte from memory", "MEMORY_READ address")),
    cmd("MEMORY_COMPARE", &[P::Address, P::Byte], C::Flags, F::Linear, 1, "Compare a memory byte", "MEMORY_COMPARE address, value"),
    cmd("VARIABLE_SET", &[P::Word, P::Word], C::Flags, F::Linear, 1, "Set a script variable", "VARIABLE_SET var, value"),
    cmd("VARIABLE_ADD", &[P::Word, P::Word], C::Flags, F::Linear, 1, "Add to a script variable", "VARIABLE_ADD var, value"),
    cmd("VARIABLE_CHECK", &[P::Word, P::Word], C::Flags, F::Linear, 1, "Compare a script variable", "VARIABLE_CHECK var, value"),
    // items and party
    cmd("GIVE_ITEM", &[P::Byte, P::Byte], C::Items, F::Linear, 1, "Give an item", "GIVE_ITEM item, count"),
    cmd("REMOVE_ITEM", &[P::Byte, P::Byte], C::Items, F::Linear, 1, "Take an item", "REMOVE_ITEM item, count"),
    cmd("GIVE_GP", &[P::Word], C::Items, F::Linear, 1, "Give gold", "GIVE_GP amount"),
    cmd("REMOVE_GP", &[P::Word], C::Items, F::Linear, 1, "Take gold", "REMOVE_GP amount"),
    cmd("CHECK_GP", &[P::Word], C::Items, F::Linear, 1, "Compare gold", "CHECK_GP amount"),
    cmd("ADD_PARTY_MEMBER", &[P::Byte], C::Items, F::Linear, 1, "Add a party member", "ADD_PARTY_MEMBER id"),
    cmd("REMOVE_PARTY_MEMBER", &[P::Byte], C::Items, F::Linear, 1, "Remove a party member", "REMOVE_PARTY_MEMBER id"),
    cmd("HEAL_PARTY", &[], C::Items, F::Linear, 1, "Restore the party", "HEAL_PARTY"),
    // map and sprites
    cmd("SHOW_SPRITE", &[P::Byte, P::Byte, P::Byte], C::Map, F::Linear, 1, "Show a sprite", "SHOW_SPRITE id, x, y"),
    cmd("HIDE_SPRITE", &[P::Byte], C::Map, F::Linear, 1, "Hide a sprite", "HIDE_SPRITE id"),
    cmd("MOVE_SPRITE", &[P::Byte, P::Byte, P::Byte], C::Map, F::Linear, 1, "Move a sprite", "MOVE_SPRITE id, x, y"),
    cmd("ANIMATE_SPRITE", &[P::Byte, P::Byte], C::Map, F::Linear, 1, "Animate a sprite", "ANIMATE_SPRITE id, animation"),
    cmd("LOAD_MAP", &[P::Byte], C::Map, F::Linear, 1, "Load a map", "LOAD_MAP map"),
    cmd("TELEPORT", &[P::Byte, P::Byte, P::Byte], C::Map, F::Linear, 1, "Teleport the party", "TELEPORT map, x, y"),
    cmd("CAMERA_MOVE", &[P::Byte, P::Byte], C::Map, F::Linear, 1, "Pan the camera", "CAMERA_MOVE x, y"),
    // battle and effects
    cmd("BATTLE", &[P::Byte], C::Battle, F::Linear, 1, "Start a battle", "BATTLE formation"),
    cmd("GAME_OVER", &[], C::Battle, F::Linear, 1, "Game over", "GAME_OVER"),
    cmd("PLAY_SOUND", &[P::Byte], C::Special, F::Linear, 1, "Play a sound effect", "PLAY_SOUND id"),
    cmd("PLAY_MUSIC", &[P::Byte], C::Special, F::Linear, 1, "Play a music track", "PLAY_MUSIC id"),
    cmd("STOP_MUSIC", &[], C::Special, F::Linear, 1, "Stop the music", "STOP_MUSIC"),
    cmd("FADE_OUT", &[], C::Special, F::Linear, 1, "Fade the screen out", "FADE_OUT"),
    cmd("FADE_IN", &[], C::Special, F::Linear, 1, "Fade the screen in", "FADE_IN"),
    cmd("SHAKE_SCREEN", &[P::Byte, P::Byte], C::Special, F::Linear, 1, "Shake the screen", "SHAKE_SCREEN strength, frames"),
    cmd("FLASH_SCREEN", &[P::Byte, P::Byte], C::Special, F::Linear, 1, "Flash the screen", "FLASH_SCREEN colour, frames"),
    // shops and saves
    cmd("SHOP", &[P::Byte], C::Special, F::Linear, 1, "Open a shop", "SHOP id"),
    cmd("INN", &[P::Byte], C::Special, F::Linear, 1, "Open an inn", "INN price"),
    cmd("SAVE_GAME", &[], C::Special, F::Linear, 1, "Open the save menu", "SAVE_GAME"),
];

pub fn lookup(mnemonic: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|c| c.mnemonic == mnemonic)
}

/// Encoded size of a command; unknown mnemonics count as one byte.
pub fn command_size(mnemonic: &str) -> usize {
    lookup(mnemonic).map_or(1, |c| c.size)
}

pub fn flow_of(mnemonic: &str) -> Flow {
    lookup(mnemonic).map_or(Flow::Linear, |c| c.flow)
}

pub fn is_terminal(mnemonic: &str) -> bool {
    lookup(mnemonic).is_some_and(CommandSpec::is_terminal)
}

pub fn is_memory(mnemonic: &str) -> bool {
    lookup(mnemonic).is_some_and(|c| c.memory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn mnemonics_are_unique_and_uppercase() {
        let mut seen = HashSet::new();
        for c in COMMANDS {
            assert!(seen.insert(c.mnemonic), "{} listed twice", c.mnemonic);
            assert!(c.mnemonic.chars().all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_'));
            assert!(c.syntax.starts_with(c.mnemonic));
        }
    }

    #[test]
    fn flow_sets_match_the_engine() {
        let branches: Vec<_> = COMMANDS.iter().filter(|c| c.flow == Flow::Branch).map(|c| c.mnemonic).collect();
        assert_eq!(branches, ["JUMP_IF", "BRANCH", "CHECK_FLAG", "CHECK_ITEM"]);
        assert_eq!(flow_of("JUMP"), Flow::Jump);
        assert!(is_terminal("END") && is_terminal("RETURN"));
        assert!(!is_terminal("JUMP"));
        let memory: Vec<_> = COMMANDS.iter().filter(|c| c.memory).map(|c| c.mnemonic).collect();
        assert_eq!(memory, ["SET_FLAG", "CLEAR_FLAG", "TOGGLE_FLAG", "MEMORY_WRITE", "MEMORY_READ"]);
    }

    #[test]
    fn sizes_follow_command_class() {
        assert_eq!(command_size("WAIT"), 1);
        assert_eq!(command_size("SET_FLAG"), 2);
        assert_eq!(command_size("CALL_SUBROUTINE"), 3);
        assert_eq!(command_size("MEMORY_WRITE"), 4);
        assert_eq!(command_size("NOT_A_COMMAND"), 1);
    }
}
