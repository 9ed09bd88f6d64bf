// ABC method, metadata, class, script and body tables

use serde::Serialize;

use super::pool::{ConstantKind, ConstantPool};
use super::reader::AbcReader;
use super::writer::AbcWriter;
use crate::error::{corrupt, VmResult};

pub mod method_flags {
    pub const NEED_ARGUMENTS: u8 = 0x01;
    pub const NEED_ACTIVATION: u8 = 0x02;
    pub const NEED_REST: u8 = 0x04;
    pub const HAS_OPTIONAL: u8 = 0x08;
    pub const SET_DXNS: u8 = 0x40;
    pub const HAS_PARAM_NAMES: u8 = 0x80;
}

pub mod instance_flags {
    pub const SEALED: u8 = 0x01;
    pub const FINAL: u8 = 0x02;
    pub const INTERFACE: u8 = 0x04;
    pub const PROTECTED_NS: u8 = 0x08;
}

pub mod trait_attrs {
    pub const FINAL: u8 = 0x1;
    pub const OVERRIDE: u8 = 0x2;
    pub const METADATA: u8 = 0x4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OptionDetail {
    pub kind: ConstantKind,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodInfo {
    pub return_type: u32,
    pub param_types: Vec<u32>,
    pub name: u32,
    pub flags: u8,
    pub options: Vec<OptionDetail>,
    pub param_names: Vec<u32>,
    /// Index into the body table once linked
    pub body: Option<u32>,
}

impl MethodInfo {
    pub fn param_count(&self) -> usize {
        self.param_types.len()
    }

    pub fn needs_rest(&self) -> bool {
        self.flags & method_flags::NEED_REST != 0
    }

    pub fn needs_arguments(&self) -> bool {
        self.flags & method_flags::NEED_ARGUMENTS != 0
    }

    pub fn needs_activation(&self) -> bool {
        self.flags & method_flags::NEED_ACTIVATION != 0
    }

    fn read(r: &mut AbcReader<'_>, pool: &ConstantPool) -> VmResult<Self> {
        let param_count = r.read_u30()?;
        let return_type = r.read_u30()?;
        pool.check_multiname(return_type)?;
        let mut param_types = Vec::with_capacity(param_count.min(64) as usize);
        for _ in 0..param_count {
            let t = r.read_u30()?;
            pool.check_multiname(t)?;
            param_types.push(t);
        }
        let name = r.read_u30()?;
        pool.check_string(name, "method name")?;
        let flags = r.read_u8()?;
        if flags & method_flags::NEED_REST != 0 && flags & method_flags::NEED_ARGUMENTS != 0 {
            return Err(corrupt("Method declares both rest arguments and an arguments object"));
        }

        let mut options = Vec::new();
        if flags & method_flags::HAS_OPTIONAL != 0 {
            let count = r.read_u30()?;
            if count > param_count {
                return Err(corrupt(format!(
                    "Method has {} optional values for {} parameters",
                    count, param_count
                )));
            }
            for _ in 0..count {
                let index = r.read_u30()?;
                let byte = r.read_u8()?;
                let kind = ConstantKind::from_byte(byte)
                    .ok_or_else(|| corrupt(format!("Unknown constant kind 0x{:02x}", byte)))?;
                pool.check_constant(kind, index)?;
                options.push(OptionDetail { kind, index });
            }
        }

        let mut param_names = Vec::new();
        if flags & method_flags::HAS_PARAM_NAMES != 0 {
            for _ in 0..param_count {
                let n = r.read_u30()?;
                pool.check_string(n, "parameter name")?;
                param_names.push(n);
            }
        }

        Ok(MethodInfo {
            return_type,
            param_types,
            name,
            flags,
            options,
            param_names,
            body: None,
        })
    }

    fn write(&self, w: &mut AbcWriter) {
        w.write_u30(self.param_types.len() as u32);
        w.write_u30(self.return_type);
        for t in &self.param_types {
            w.write_u30(*t);
        }
        w.write_u30(self.name);
        w.write_u8(self.flags);
        if self.flags & method_flags::HAS_OPTIONAL != 0 {
            w.write_u30(self.options.len() as u32);
            for option in &self.options {
                w.write_u30(option.index);
                w.write_u8(option.kind.as_byte());
            }
        }
        if self.flags & method_flags::HAS_PARAM_NAMES != 0 {
            for n in &self.param_names {
                w.write_u30(*n);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataInfo {
    pub name: u32,
    /// (key, value) string indices; key 0 means a keyless entry
    pub items: Vec<(u32, u32)>,
}

impl MetadataInfo {
    fn read(r: &mut AbcReader<'_>, pool: &ConstantPool) -> VmResult<Self> {
        let name = r.read_u30()?;
        pool.check_string(name, "metadata name")?;
        let count = r.read_u30()? as usize;
        let mut keys = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            keys.push(r.read_u30()?);
        }
        let mut items = Vec::with_capacity(count.min(64));
        for key in keys {
            let value = r.read_u30()?;
            pool.check_string(key, "metadata key")?;
            pool.check_string(value, "metadata value")?;
            items.push((key, value));
        }
        Ok(MetadataInfo { name, items })
    }

    fn write(&self, w: &mut AbcWriter) {
        w.write_u30(self.name);
        w.write_u30(self.items.len() as u32);
        for (key, _) in &self.items {
            w.write_u30(*key);
        }
        for (_, value) in &self.items {
            w.write_u30(*value);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TraitKind {
    Slot,
    Method,
    Getter,
    Setter,
    Class,
    Function,
    Const,
}

impl TraitKind {
    fn from_nibble(n: u8) -> Option<Self> {
        Some(match n {
            0 => TraitKind::Slot,
            1 => TraitKind::Method,
            2 => TraitKind::Getter,
            3 => TraitKind::Setter,
            4 => TraitKind::Class,
            5 => TraitKind::Function,
            6 => TraitKind::Const,
            _ => return None,
        })
    }

    fn as_nibble(self) -> u8 {
        match self {
            TraitKind::Slot => 0,
            TraitKind::Method => 1,
            TraitKind::Getter => 2,
            TraitKind::Setter => 3,
            TraitKind::Class => 4,
            TraitKind::Function => 5,
            TraitKind::Const => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TraitData {
    /// Slot and Const
    Slot {
        slot_id: u32,
        type_name: u32,
        value: Option<OptionDetail>,
    },
    /// Method, Getter and Setter
    Method { disp_id: u32, method: u32 },
    Class { slot_id: u32, class: u32 },
    Function { slot_id: u32, function: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraitInfo {
    pub name: u32,
    pub kind: TraitKind,
    /// Upper nibble of the kind byte
    pub attrs: u8,
    pub data: TraitData,
    pub metadata: Vec<u32>,
}

impl TraitInfo {
    pub fn is_override(&self) -> bool {
        self.attrs & trait_attrs::OVERRIDE != 0
    }

    pub fn slot_id(&self) -> u32 {
        match self.data {
            TraitData::Slot { slot_id, .. }
            | TraitData::Class { slot_id, .. }
            | TraitData::Function { slot_id, .. } => slot_id,
            TraitData::Method { .. } => 0,
        }
    }

    fn read(r: &mut AbcReader<'_>, pool: &ConstantPool, counts: &TableCounts) -> VmResult<Self> {
        let name = r.read_u30()?;
        pool.check_multiname(name)?;
        if name == 0 {
            return Err(corrupt("Trait without a name"));
        }
        let byte = r.read_u8()?;
        let kind = TraitKind::from_nibble(byte & 0x0f)
            .ok_or_else(|| corrupt(format!("Unknown trait kind {}", byte & 0x0f)))?;
        let attrs = byte >> 4;
        let data = match kind {
            TraitKind::Slot | TraitKind::Const => {
                let slot_id = r.read_u30()?;
                let type_name = r.read_u30()?;
                pool.check_multiname(type_name)?;
                let vindex = r.read_u30()?;
                let value = if vindex != 0 {
                    let b = r.read_u8()?;
                    let vkind = ConstantKind::from_byte(b)
                        .ok_or_else(|| corrupt(format!("Unknown constant kind 0x{:02x}", b)))?;
                    pool.check_constant(vkind, vindex)?;
                    Some(OptionDetail {
                        kind: vkind,
                        index: vindex,
                    })
                } else {
                    None
                };
                TraitData::Slot {
                    slot_id,
                    type_name,
                    value,
                }
            }
            TraitKind::Method | TraitKind::Getter | TraitKind::Setter => {
                let disp_id = r.read_u30()?;
                let method = r.read_u30()?;
                counts.check_method(method)?;
                TraitData::Method { disp_id, method }
            }
            TraitKind::Class => {
                let slot_id = r.read_u30()?;
                let class = r.read_u30()?;
                if class as usize >= counts.classes {
                    return Err(corrupt(format!("Class index {} out of range", class)));
                }
                TraitData::Class { slot_id, class }
            }
            TraitKind::Function => {
                let slot_id = r.read_u30()?;
                let function = r.read_u30()?;
                counts.check_method(function)?;
                TraitData::Function { slot_id, function }
            }
        };
        let mut metadata = Vec::new();
        if attrs & trait_attrs::METADATA != 0 {
            let count = r.read_u30()?;
            for _ in 0..count {
                let m = r.read_u30()?;
                if m as usize >= counts.metadata {
                    return Err(corrupt(format!("Metadata index {} out of range", m)));
                }
                metadata.push(m);
            }
        }
        Ok(TraitInfo {
            name,
            kind,
            attrs,
            data,
            metadata,
        })
    }

    fn write(&self, w: &mut AbcWriter) {
        w.write_u30(self.name);
        w.write_u8(self.kind.as_nibble() | (self.attrs << 4));
        match &self.data {
            TraitData::Slot {
                slot_id,
                type_name,
                value,
            } => {
                w.write_u30(*slot_id);
                w.write_u30(*type_name);
                match value {
                    Some(v) => {
                        w.write_u30(v.index);
                        w.write_u8(v.kind.as_byte());
                    }
                    None => w.write_u30(0),
                }
            }
            TraitData::Method { disp_id, method } => {
                w.write_u30(*disp_id);
                w.write_u30(*method);
            }
            TraitData::Class { slot_id, class } => {
                w.write_u30(*slot_id);
                w.write_u30(*class);
            }
            TraitData::Function { slot_id, function } => {
                w.write_u30(*slot_id);
                w.write_u30(*function);
            }
        }
        if self.attrs & trait_attrs::METADATA != 0 {
            w.write_u30(self.metadata.len() as u32);
            for m in &self.metadata {
                w.write_u30(*m);
            }
        }
    }
}

/// Table sizes known while reading, used to range-check references
pub(crate) struct TableCounts {
    pub methods: usize,
    pub metadata: usize,
    pub classes: usize,
}

impl TableCounts {
    fn check_method(&self, index: u32) -> VmResult<()> {
        if (index as usize) < self.methods {
            Ok(())
        } else {
            Err(corrupt(format!("Method index {} out of range", index)))
        }
    }
}

fn read_traits(
    r: &mut AbcReader<'_>,
    pool: &ConstantPool,
    counts: &TableCounts,
) -> VmResult<Vec<TraitInfo>> {
    let count = r.read_u30()?;
    let mut traits = Vec::with_capacity(count.min(256) as usize);
    for _ in 0..count {
        traits.push(TraitInfo::read(r, pool, counts)?);
    }
    Ok(traits)
}

fn write_traits(w: &mut AbcWriter, traits: &[TraitInfo]) {
    w.write_u30(traits.len() as u32);
    for t in traits {
        t.write(w);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceInfo {
    pub name: u32,
    pub super_name: u32,
    pub flags: u8,
    pub protected_ns: u32,
    pub interfaces: Vec<u32>,
    pub init: u32,
    pub traits: Vec<TraitInfo>,
}

impl InstanceInfo {
    pub fn is_interface(&self) -> bool {
        self.flags & instance_flags::INTERFACE != 0
    }

    pub fn uses_protected_ns(&self) -> bool {
        self.flags & instance_flags::PROTECTED_NS != 0
    }

    pub fn is_sealed(&self) -> bool {
        self.flags & instance_flags::SEALED != 0
    }

    fn read(r: &mut AbcReader<'_>, pool: &ConstantPool, counts: &TableCounts) -> VmResult<Self> {
        let name = r.read_u30()?;
        pool.check_multiname(name)?;
        let super_name = r.read_u30()?;
        pool.check_multiname(super_name)?;
        let flags = r.read_u8()?;
        let protected_ns = if flags & instance_flags::PROTECTED_NS != 0 {
            let ns = r.read_u30()?;
            pool.check_namespace(ns)?;
            ns
        } else {
            0
        };
        let count = r.read_u30()?;
        let mut interfaces = Vec::with_capacity(count.min(32) as usize);
        for _ in 0..count {
            let i = r.read_u30()?;
            pool.check_multiname(i)?;
            interfaces.push(i);
        }
        let init = r.read_u30()?;
        counts.check_method(init)?;
        let traits = read_traits(r, pool, counts)?;
        Ok(InstanceInfo {
            name,
            super_name,
            flags,
            protected_ns,
            interfaces,
            init,
            traits,
        })
    }

    fn write(&self, w: &mut AbcWriter) {
        w.write_u30(self.name);
        w.write_u30(self.super_name);
        w.write_u8(self.flags);
        if self.flags & instance_flags::PROTECTED_NS != 0 {
            w.write_u30(self.protected_ns);
        }
        w.write_u30(self.interfaces.len() as u32);
        for i in &self.interfaces {
            w.write_u30(*i);
        }
        w.write_u30(self.init);
        write_traits(w, &self.traits);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassInfo {
    pub init: u32,
    pub traits: Vec<TraitInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptInfo {
    pub init: u32,
    pub traits: Vec<TraitInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionInfo {
    pub from: u32,
    pub to: u32,
    pub target: u32,
    pub exc_type: u32,
    pub var_name: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodBody {
    pub method: u32,
    pub max_stack: u32,
    pub local_count: u32,
    pub init_scope_depth: u32,
    pub max_scope_depth: u32,
    #[serde(skip)]
    pub code: Vec<u8>,
    pub exceptions: Vec<ExceptionInfo>,
    pub traits: Vec<TraitInfo>,
}

impl MethodBody {
    fn read(r: &mut AbcReader<'_>, pool: &ConstantPool, counts: &TableCounts) -> VmResult<Self> {
        let method = r.read_u30()?;
        counts.check_method(method)?;
        let max_stack = r.read_u30()?;
        let local_count = r.read_u30()?;
        let init_scope_depth = r.read_u30()?;
        let max_scope_depth = r.read_u30()?;
        let code_len = r.read_u30()? as usize;
        let code = r.read_bytes(code_len)?.to_vec();
        let count = r.read_u30()?;
        let mut exceptions = Vec::with_capacity(count.min(32) as usize);
        for _ in 0..count {
            let exc = ExceptionInfo {
                from: r.read_u30()?,
                to: r.read_u30()?,
                target: r.read_u30()?,
                exc_type: r.read_u30()?,
                var_name: r.read_u30()?,
            };
            if exc.from > exc.to || exc.to as usize > code.len() || exc.target as usize >= code.len() {
                return Err(corrupt(format!(
                    "Exception range {}..{} -> {} outside of {} code bytes",
                    exc.from,
                    exc.to,
                    exc.target,
                    code.len()
                )));
            }
            pool.check_multiname(exc.exc_type)?;
            pool.check_multiname(exc.var_name)?;
            exceptions.push(exc);
        }
        let traits = read_traits(r, pool, counts)?;
        Ok(MethodBody {
            method,
            max_stack,
            local_count,
            init_scope_depth,
            max_scope_depth,
            code,
            exceptions,
            traits,
        })
    }

    fn write(&self, w: &mut AbcWriter) {
        w.write_u30(self.method);
        w.write_u30(self.max_stack);
        w.write_u30(self.local_count);
        w.write_u30(self.init_scope_depth);
        w.write_u30(self.max_scope_depth);
        w.write_u30(self.code.len() as u32);
        w.write_bytes(&self.code);
        w.write_u30(self.exceptions.len() as u32);
        for e in &self.exceptions {
            w.write_u30(e.from);
            w.write_u30(e.to);
            w.write_u30(e.target);
            w.write_u30(e.exc_type);
            w.write_u30(e.var_name);
        }
        write_traits(w, &self.traits);
    }
}

pub(crate) fn read_methods(r: &mut AbcReader<'_>, pool: &ConstantPool) -> VmResult<Vec<MethodInfo>> {
    let count = r.read_u30()?;
    let mut methods = Vec::with_capacity(count.min(4096) as usize);
    for i in 0..count {
        let method = MethodInfo::read(r, pool)
            .map_err(|e| corrupt(format!("{} (method {} of {})", e.message, i, count)))?;
        methods.push(method);
    }
    Ok(methods)
}

pub(crate) fn read_metadata(r: &mut AbcReader<'_>, pool: &ConstantPool) -> VmResult<Vec<MetadataInfo>> {
    let count = r.read_u30()?;
    let mut metadata = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        metadata.push(MetadataInfo::read(r, pool)?);
    }
    Ok(metadata)
}

pub(crate) fn read_classes(
    r: &mut AbcReader<'_>,
    pool: &ConstantPool,
    counts: &mut TableCounts,
) -> VmResult<(Vec<InstanceInfo>, Vec<ClassInfo>)> {
    let count = r.read_u30()? as usize;
    counts.classes = count;
    let mut instances = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        instances.push(InstanceInfo::read(r, pool, counts)?);
    }
    let mut classes = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let init = r.read_u30()?;
        counts.check_method(init)?;
        let traits = read_traits(r, pool, counts)?;
        classes.push(ClassInfo { init, traits });
    }
    Ok((instances, classes))
}

pub(crate) fn read_scripts(
    r: &mut AbcReader<'_>,
    pool: &ConstantPool,
    counts: &TableCounts,
) -> VmResult<Vec<ScriptInfo>> {
    let count = r.read_u30()?;
    let mut scripts = Vec::with_capacity(count.min(256) as usize);
    for _ in 0..count {
        let init = r.read_u30()?;
        counts.check_method(init)?;
        let traits = read_traits(r, pool, counts)?;
        scripts.push(ScriptInfo { init, traits });
    }
    Ok(scripts)
}

pub(crate) fn read_bodies(
    r: &mut AbcReader<'_>,
    pool: &ConstantPool,
    counts: &TableCounts,
) -> VmResult<Vec<MethodBody>> {
    let count = r.read_u30()?;
    let mut bodies = Vec::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        bodies.push(MethodBody::read(r, pool, counts)?);
    }
    Ok(bodies)
}

pub(crate) fn write_methods(w: &mut AbcWriter, methods: &[MethodInfo]) {
    w.write_u30(methods.len() as u32);
    for m in methods {
        m.write(w);
    }
}

pub(crate) fn write_metadata(w: &mut AbcWriter, metadata: &[MetadataInfo]) {
    w.write_u30(metadata.len() as u32);
    for m in metadata {
        m.write(w);
    }
}

pub(crate) fn write_classes(w: &mut AbcWriter, instances: &[InstanceInfo], classes: &[ClassInfo]) {
    w.write_u30(instances.len() as u32);
    for i in instances {
        i.write(w);
    }
    for c in classes {
        w.write_u30(c.init);
        write_traits(w, &c.traits);
    }
}

pub(crate) fn write_scripts(w: &mut AbcWriter, scripts: &[ScriptInfo]) {
    w.write_u30(scripts.len() as u32);
    for s in scripts {
        w.write_u30(s.init);
        write_traits(w, &s.traits);
    }
}

pub(crate) fn write_bodies(w: &mut AbcWriter, bodies: &[MethodBody]) {
    w.write_u30(bodies.len() as u32);
    for b in bodies {
        b.write(w);
    }
}
