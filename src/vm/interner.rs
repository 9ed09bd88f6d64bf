use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::{Arc, OnceLock};

/// Process-wide pool of local names and namespace URIs
/// Every context interns its string pool here so that names coming from
/// different ABC blobs share one allocation and compare by pointer first.
pub struct Interner {
    pool: Mutex<FxHashSet<Arc<str>>>,
}

impl Interner {
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(FxHashSet::default()),
        }
    }

    pub fn global() -> &'static Self {
        static INTERNER: OnceLock<Interner> = OnceLock::new();
        INTERNER.get_or_init(Self::new)
    }

    pub fn intern(&self, s: &str) -> Arc<str> {
        let mut pool = self.pool.lock();
        if let Some(interned) = pool.get(s) {
            return interned.clone();
        }

        let interned: Arc<str> = Arc::from(s);
        pool.insert(interned.clone());
        interned
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

/// Intern through the global interner
pub fn intern(s: &str) -> Arc<str> {
    Interner::global().intern(s)
}
