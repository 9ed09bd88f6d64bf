// Compiled tier context - code cache and compilation policy state

use std::sync::{Arc, Weak};

use log::warn;
use rustc_hash::{FxHashMap, FxHashSet};

use super::compiler::{compile_body, CompiledMethod};
use crate::error::{runtime_error, VmResult};
use crate::vm::context::AbcContext;

type MethodKey = (usize, u32);

fn key(context: &Arc<AbcContext>, method: u32) -> MethodKey {
    (Arc::as_ptr(context) as usize, method)
}

struct CacheEntry {
    /// Guards against a reused allocation address
    context: Weak<AbcContext>,
    code: Arc<CompiledMethod>,
}

/// Manages the code cache of the compiled tier
pub struct JitContext {
    code_cache: FxHashMap<MethodKey, CacheEntry>,
    /// Methods that failed to compile; they stay on the interpreter
    failed: FxHashSet<MethodKey>,
    enabled: bool,
}

impl JitContext {
    pub fn new(enabled: bool) -> Self {
        Self {
            code_cache: FxHashMap::default(),
            failed: FxHashSet::default(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Cached code for a method, if it has been compiled
    pub fn get_compiled(&self, context: &Arc<AbcContext>, method: u32) -> Option<Arc<CompiledMethod>> {
        if !self.enabled {
            return None;
        }
        let entry = self.code_cache.get(&key(context, method))?;
        match entry.context.upgrade() {
            Some(owner) if Arc::ptr_eq(&owner, context) => Some(entry.code.clone()),
            _ => None,
        }
    }

    pub fn compile(&mut self, context: &Arc<AbcContext>, method: u32) -> VmResult<Arc<CompiledMethod>> {
        let k = key(context, method);
        if self.failed.contains(&k) {
            return Err(runtime_error(format!("Method {} previously failed to compile", method)));
        }
        let body = context
            .body(method)
            .ok_or_else(|| runtime_error(format!("Method {} has no body", method)))?;
        let name = format!("{}#{}", context.name, method);
        match compile_body(&name, body) {
            Ok(code) => {
                let code = Arc::new(code);
                self.code_cache.insert(
                    k,
                    CacheEntry {
                        context: Arc::downgrade(context),
                        code: code.clone(),
                    },
                );
                Ok(code)
            }
            Err(e) => {
                warn!("Compilation of {} failed: {}", name, e.message);
                self.failed.insert(k);
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> JitStats {
        JitStats {
            compiled_methods: self.code_cache.len(),
            failed_methods: self.failed.len(),
        }
    }
}

impl Default for JitContext {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Compiled tier statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitStats {
    pub compiled_methods: usize,
    pub failed_methods: usize,
}
