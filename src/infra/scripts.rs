//! Used-Script Store
//!
//! Remembers every script that ever appeared in a coinjoin output so a
//! destination is never handed out twice. Address reuse across rounds
//! would link a participant's outputs together.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::core::coin::ScriptPubkey;

/// Process-lifetime memory of scripts already used as outputs.
#[derive(Debug, Default)]
pub struct UsedScripts {
    scripts: Mutex<HashSet<ScriptPubkey>>,
}

impl UsedScripts {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the script was seen before.
    pub fn contains(&self, script: &ScriptPubkey) -> bool {
        self.scripts.lock().unwrap().contains(script)
    }

    /// Record a script. Returns false if it was already known.
    pub fn insert(&self, script: ScriptPubkey) -> bool {
        self.scripts.lock().unwrap().insert(script)
    }

    /// Number of remembered scripts.
    pub fn len(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
