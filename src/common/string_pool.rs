//! String interning pool (spec §4.1), backed by `lasso` the same way the
//! donor repository family's lexer interns identifiers. Symbol names,
//! inline-asm templates, and string-literal data initializers all go
//! through this pool so that equality comparisons (symbol lookups, GVN's
//! `string-ref` immediate family) are pointer/key comparisons rather than
//! byte comparisons.

use lasso::{Rodeo, Spur};

/// An interned string reference. Cheap to copy, compare, and hash.
pub type InternedStr = Spur;

#[derive(Debug, Default)]
pub struct StringPool {
    rodeo: Rodeo,
}

impl StringPool {
    pub fn new() -> Self {
        Self { rodeo: Rodeo::new() }
    }

    pub fn intern(&mut self, s: &str) -> InternedStr {
        self.rodeo.get_or_intern(s)
    }

    pub fn resolve(&self, key: InternedStr) -> &str {
        self.rodeo.resolve(&key)
    }

    pub fn len(&self) -> usize {
        self.rodeo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rodeo.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_interns_to_same_key() {
        let mut pool = StringPool::new();
        let a = pool.intern("hello");
        let b = pool.intern("hello");
        let c = pool.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.resolve(a), "hello");
    }
}
