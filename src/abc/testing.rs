// Test fixtures: assembles ABC files and bytecode in memory

use rustc_hash::FxHashMap;

use super::file::{serialize, AbcFile};
use super::pool::{ConstantKind, MultinameInfo, NamespaceInfo, NamespaceKind, NsSetInfo};
use super::tables::{
    instance_flags, method_flags, trait_attrs, ClassInfo, ExceptionInfo, InstanceInfo,
    MethodBody, MethodInfo, OptionDetail, ScriptInfo, TraitData, TraitInfo, TraitKind,
};
use super::writer::AbcWriter;

pub(crate) struct AbcBuilder {
    pub file: AbcFile,
    strings: FxHashMap<String, u32>,
}

impl AbcBuilder {
    pub fn new() -> Self {
        Self {
            file: AbcFile::new(),
            strings: FxHashMap::default(),
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        serialize(&self.file)
    }

    pub fn string(&mut self, s: &str) -> u32 {
        if let Some(i) = self.strings.get(s) {
            return *i;
        }
        self.file.pool.strings.push(s.to_string());
        let i = (self.file.pool.strings.len() - 1) as u32;
        self.strings.insert(s.to_string(), i);
        i
    }

    pub fn int(&mut self, v: i32) -> u32 {
        self.file.pool.ints.push(v);
        (self.file.pool.ints.len() - 1) as u32
    }

    pub fn uint(&mut self, v: u32) -> u32 {
        self.file.pool.uints.push(v);
        (self.file.pool.uints.len() - 1) as u32
    }

    pub fn double(&mut self, v: f64) -> u32 {
        self.file.pool.doubles.push(v);
        (self.file.pool.doubles.len() - 1) as u32
    }

    pub fn namespace(&mut self, kind: NamespaceKind, uri: &str) -> u32 {
        let name = self.string(uri);
        let info = NamespaceInfo { kind, name };
        if let Some(i) = self.file.pool.namespaces.iter().skip(1).position(|n| *n == info) {
            return i as u32 + 1;
        }
        self.file.pool.namespaces.push(info);
        (self.file.pool.namespaces.len() - 1) as u32
    }

    pub fn public_ns(&mut self) -> u32 {
        self.namespace(NamespaceKind::Package, "")
    }

    pub fn ns_set(&mut self, namespaces: &[u32]) -> u32 {
        self.file.pool.ns_sets.push(NsSetInfo {
            namespaces: namespaces.to_vec(),
        });
        (self.file.pool.ns_sets.len() - 1) as u32
    }

    pub fn add_multiname(&mut self, m: MultinameInfo) -> u32 {
        self.file.pool.multinames.push(m);
        (self.file.pool.multinames.len() - 1) as u32
    }

    pub fn qname(&mut self, ns: u32, name: &str) -> u32 {
        let name = self.string(name);
        self.add_multiname(MultinameInfo::QName {
            ns,
            name,
            attribute: false,
        })
    }

    pub fn public_qname(&mut self, name: &str) -> u32 {
        let ns = self.public_ns();
        self.qname(ns, name)
    }

    pub fn multiname(&mut self, ns_set: u32, name: &str) -> u32 {
        let name = self.string(name);
        self.add_multiname(MultinameInfo::Multiname {
            ns_set,
            name,
            attribute: false,
        })
    }

    pub fn multiname_l(&mut self, ns_set: u32) -> u32 {
        self.add_multiname(MultinameInfo::MultinameL {
            ns_set,
            attribute: false,
        })
    }

    pub fn rtq_name(&mut self, name: &str) -> u32 {
        let name = self.string(name);
        self.add_multiname(MultinameInfo::RtqName {
            name,
            attribute: false,
        })
    }

    /// Method with `param_count` untyped parameters and a body
    pub fn method(&mut self, param_count: usize, code: &[u8]) -> u32 {
        let info = MethodInfo {
            return_type: 0,
            param_types: vec![0; param_count],
            name: 0,
            flags: 0,
            options: Vec::new(),
            param_names: Vec::new(),
            body: None,
        };
        self.method_with(info, code)
    }

    pub fn method_with(&mut self, info: MethodInfo, code: &[u8]) -> u32 {
        let local_count = info.param_count() as u32 + 2;
        self.file.methods.push(info);
        let index = (self.file.methods.len() - 1) as u32;
        self.file.bodies.push(MethodBody {
            method: index,
            max_stack: 16,
            local_count: local_count.max(4),
            init_scope_depth: 0,
            max_scope_depth: 8,
            code: code.to_vec(),
            exceptions: Vec::new(),
            traits: Vec::new(),
        });
        index
    }

    /// Method taking optional parameters with integer defaults
    pub fn method_with_defaults(&mut self, param_count: usize, defaults: &[i32], code: &[u8]) -> u32 {
        let options = defaults
            .iter()
            .map(|d| OptionDetail {
                kind: ConstantKind::Int,
                index: self.int(*d),
            })
            .collect();
        let info = MethodInfo {
            return_type: 0,
            param_types: vec![0; param_count],
            name: 0,
            flags: method_flags::HAS_OPTIONAL,
            options,
            param_names: Vec::new(),
            body: None,
        };
        self.method_with(info, code)
    }

    pub fn method_with_flags(&mut self, param_count: usize, flags: u8, code: &[u8]) -> u32 {
        let info = MethodInfo {
            return_type: 0,
            param_types: vec![0; param_count],
            name: 0,
            flags,
            options: Vec::new(),
            param_names: Vec::new(),
            body: None,
        };
        self.method_with(info, code)
    }

    pub fn abstract_method(&mut self, param_count: usize) -> u32 {
        self.file.methods.push(MethodInfo {
            return_type: 0,
            param_types: vec![0; param_count],
            name: 0,
            flags: 0,
            options: Vec::new(),
            param_names: Vec::new(),
            body: None,
        });
        (self.file.methods.len() - 1) as u32
    }

    pub fn body_mut(&mut self, method: u32) -> &mut MethodBody {
        self.file
            .bodies
            .iter_mut()
            .find(|b| b.method == method)
            .expect("method has a body")
    }

    pub fn exception(&mut self, method: u32, from: u32, to: u32, target: u32, exc_type: u32) {
        self.body_mut(method).exceptions.push(ExceptionInfo {
            from,
            to,
            target,
            exc_type,
            var_name: 0,
        });
    }

    pub fn script(&mut self, init: u32, traits: Vec<TraitInfo>) -> u32 {
        self.file.scripts.push(ScriptInfo { init, traits });
        (self.file.scripts.len() - 1) as u32
    }

    /// Declare a class; returns its index in the class tables
    pub fn class(&mut self, instance: InstanceInfo, class: ClassInfo) -> u32 {
        self.file.instances.push(instance);
        self.file.classes.push(class);
        (self.file.instances.len() - 1) as u32
    }

    /// Plain class with empty initializers and the given instance traits
    pub fn simple_class(
        &mut self,
        name: u32,
        super_name: u32,
        protected_ns: Option<u32>,
        traits: Vec<TraitInfo>,
    ) -> u32 {
        let iinit = self.method(0, &[0xd0, 0x30, 0xd0, 0x49, 0x00, 0x47]);
        let cinit = self.method(0, &[0x47]);
        let flags = instance_flags::SEALED
            | if protected_ns.is_some() {
                instance_flags::PROTECTED_NS
            } else {
                0
            };
        self.class(
            InstanceInfo {
                name,
                super_name,
                flags,
                protected_ns: protected_ns.unwrap_or(0),
                interfaces: Vec::new(),
                init: iinit,
                traits,
            },
            ClassInfo {
                init: cinit,
                traits: Vec::new(),
            },
        )
    }

    pub fn slot_trait(name: u32, slot_id: u32, type_name: u32, value: Option<OptionDetail>) -> TraitInfo {
        TraitInfo {
            name,
            kind: TraitKind::Slot,
            attrs: 0,
            data: TraitData::Slot {
                slot_id,
                type_name,
                value,
            },
            metadata: Vec::new(),
        }
    }

    pub fn const_trait(name: u32, int_index: u32) -> TraitInfo {
        TraitInfo {
            name,
            kind: TraitKind::Const,
            attrs: 0,
            data: TraitData::Slot {
                slot_id: 0,
                type_name: 0,
                value: Some(OptionDetail {
                    kind: ConstantKind::Int,
                    index: int_index,
                }),
            },
            metadata: Vec::new(),
        }
    }

    pub fn method_trait(kind: TraitKind, name: u32, method: u32, is_override: bool) -> TraitInfo {
        TraitInfo {
            name,
            kind,
            attrs: if is_override { trait_attrs::OVERRIDE } else { 0 },
            data: TraitData::Method { disp_id: 0, method },
            metadata: Vec::new(),
        }
    }

    pub fn class_trait(name: u32, class: u32) -> TraitInfo {
        TraitInfo {
            name,
            kind: TraitKind::Class,
            attrs: 0,
            data: TraitData::Class { slot_id: 0, class },
            metadata: Vec::new(),
        }
    }
}

/// Bytecode assembler with forward labels
#[derive(Default)]
pub(crate) struct Asm {
    out: AbcWriter,
    labels: FxHashMap<&'static str, usize>,
    fixups: Vec<(usize, &'static str)>,
    bytes: Vec<u8>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    fn sync(&mut self) {
        let written = std::mem::take(&mut self.out).into_bytes();
        self.bytes.extend_from_slice(&written);
    }

    pub fn op(mut self, byte: u8) -> Self {
        self.out.write_u8(byte);
        self
    }

    pub fn u30(mut self, value: u32) -> Self {
        self.out.write_u30(value);
        self
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.out.write_u8(value);
        self
    }

    pub fn label(mut self, name: &'static str) -> Self {
        self.sync();
        self.labels.insert(name, self.bytes.len());
        self
    }

    /// Branch instruction whose s24 operand targets `name`
    pub fn branch(mut self, op: u8, name: &'static str) -> Self {
        self.out.write_u8(op);
        self.sync();
        self.fixups.push((self.bytes.len(), name));
        self.bytes.extend_from_slice(&[0, 0, 0]);
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.sync();
        for (at, name) in &self.fixups {
            let target = *self.labels.get(name).expect("label defined") as i64;
            let offset = (target - (*at as i64 + 3)) as i32;
            let le = offset.to_le_bytes();
            self.bytes[*at..*at + 3].copy_from_slice(&le[..3]);
        }
        self.bytes
    }
}
