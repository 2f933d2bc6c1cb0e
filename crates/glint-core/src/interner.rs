//! Identifier interning.
//!
//! Every identifier spelling is interned once per
//! [`Context`](crate::context::Context) and handled as a [`Name`]
//! afterwards, so symbol tables and overload sets compare names as
//! integers. `Name` is an ordinary arena index; the spellings live in a
//! name-indexed [`IndexVec`] with a reverse map for deduplication.
//! Diagnostics are the main consumer that needs the characters back,
//! so [`Interner::str`] hands out owned text.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::index_vec::{IndexVec, Name};

/// Deduplicating identifier storage, shared behind a mutex so it can be
/// queried through the context's shared references.
pub struct Interner {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// Spelling of each name, indexed by the name itself.
    texts: IndexVec<Name, Arc<str>>,
    /// Reverse lookup from spelling to name.
    lookup: HashMap<Arc<str>, Name>,
}

impl Interner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Intern a spelling, returning its [`Name`].
    ///
    /// Interning the same spelling again returns the same name.
    pub fn intern(&self, text: &str) -> Name {
        let mut state = self.state.lock();
        if let Some(&name) = state.lookup.get(text) {
            return name;
        }
        let spelling: Arc<str> = Arc::from(text);
        let name = state.texts.push(Arc::clone(&spelling));
        state.lookup.insert(spelling, name);
        name
    }

    /// The spelling behind a previously interned name.
    pub fn str(&self, name: Name) -> String {
        self.state.lock().texts[name].to_string()
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_deduplicates() {
        let interner = Interner::new();

        let main = interner.intern("main");
        assert_eq!(main, interner.intern("main"));

        let foo = interner.intern("foo");
        assert_eq!(foo, interner.intern("foo"));
        assert_ne!(main, foo);
    }

    #[test]
    fn test_spelling_round_trip() {
        let interner = Interner::new();
        let name = interner.intern("dangling_dynarrays");
        assert_eq!(interner.str(name), "dangling_dynarrays");
    }

    #[test]
    fn test_names_are_arena_indices() {
        let interner = Interner::new();
        let first = interner.intern("a");
        let second = interner.intern("b");
        assert_eq!(first, Name(0));
        assert_eq!(second, Name(1));
        assert_eq!(format!("{first}"), "name#0");
    }
}
