//! Metadata facade — the `windows-metadata` reader behind a typed cache.
//!
//! Every use of the reader API lives in this module, so the projection
//! engine only ever sees the cache, the row handles re-exported here, and
//! the derived shapes below ([`MethodSig`], [`PropertyInfo`], [`EventInfo`]).
//! A different metadata backend can be substituted without touching the
//! rest of the crate.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use windows_metadata::HasAttributes;
use windows_metadata::reader::{File, TypeIndex};
pub use windows_metadata::{
    FieldAttributes, MethodAttributes, ParamAttributes, Type, TypeAttributes, Value,
};

/// These are fixed at `'static` because [`TypeCache`] owns the
/// [`TypeIndex`] its rows borrow from (see the `Safety` note on
/// [`TypeCache::load`]); every other module refers to these row handles by
/// their bare (lifetime-free) name.
pub type Attribute = windows_metadata::reader::Attribute<'static>;
pub type Field = windows_metadata::reader::Field<'static>;
pub type GenericParam = windows_metadata::reader::GenericParam<'static>;
pub type InterfaceImpl = windows_metadata::reader::InterfaceImpl<'static>;
pub type MethodDef = windows_metadata::reader::MethodDef<'static>;
pub type Param = windows_metadata::reader::MethodParam<'static>;
pub type TypeDef = windows_metadata::reader::TypeDef<'static>;

/// Assembly name and version as printed in the generated file banners.
///
/// The reader does not surface the Assembly table, so the name is derived
/// from the first input file's stem (`Windows.winmd` → `Windows`) and the
/// version comes from the options file, defaulting to `0.0.0.0`.
#[derive(Debug, Clone)]
pub struct AssemblyIdentity {
    pub name: String,
    pub version: (u16, u16, u16, u16),
}

/// Broad classification of a TypeDef, derived from its flags and base type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Enum,
    Struct,
    Interface,
    Class,
    Delegate,
    Other,
}

/// All type definitions from the loaded metadata files, keyed by
/// `(namespace, name)` with deterministic iteration order.
pub struct TypeCache {
    namespaces: BTreeMap<String, BTreeMap<String, TypeDef>>,
    runtime_namespaces: BTreeSet<String>,
    assembly: AssemblyIdentity,
    _index: Box<TypeIndex>,
}

impl TypeCache {
    /// Read and index the given `.winmd` files.
    pub fn load(paths: &[PathBuf], version: (u16, u16, u16, u16)) -> Result<TypeCache> {
        let Some(first) = paths.first() else {
            bail!("no metadata files supplied");
        };
        let assembly_name = first
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut files = Vec::new();
        for path in paths {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading metadata from {}", path.display()))?;
            let file = File::new(bytes)
                .with_context(|| format!("parsing metadata from {}", path.display()))?;
            files.push(file);
        }
        let index = Box::new(TypeIndex::new(files));
        // Safety: `index` is heap-allocated and moves into the returned
        // `TypeCache` below without reallocating, so this reference stays
        // valid for as long as the `TypeCache` (and thus `index`) is alive.
        // The borrowed rows produced here never outlive that box.
        let static_index: &'static TypeIndex = unsafe { &*(&*index as *const TypeIndex) };

        let mut namespaces: BTreeMap<String, BTreeMap<String, TypeDef>> = BTreeMap::new();
        let mut runtime_namespaces = BTreeSet::new();
        for td in static_index.types() {
            let ns = td.namespace();
            let name = td.name();
            // Skip the synthetic <Module> type and global-namespace rows.
            if ns.is_empty() || name == "<Module>" {
                continue;
            }
            namespaces
                .entry(ns.to_string())
                .or_default()
                .insert(name.to_string(), td);
            if td.flags().contains(TypeAttributes::WindowsRuntime) {
                runtime_namespaces.insert(ns.to_string());
            }
        }
        debug!(
            namespaces = namespaces.len(),
            runtime = runtime_namespaces.len(),
            "indexed metadata"
        );

        Ok(TypeCache {
            namespaces,
            runtime_namespaces,
            assembly: AssemblyIdentity {
                name: assembly_name,
                version,
            },
            _index: index,
        })
    }

    pub fn assembly(&self) -> &AssemblyIdentity {
        &self.assembly
    }

    /// All namespaces in sorted order, each with its types sorted by simple
    /// name.
    pub fn namespaces(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, TypeDef>)> {
        self.namespaces.iter()
    }

    /// Whether the namespace contains at least one `WindowsRuntime` type.
    /// Only these namespaces are processed.
    pub fn is_runtime_namespace(&self, namespace: &str) -> bool {
        self.runtime_namespaces.contains(namespace)
    }

    pub fn find(&self, namespace: &str, name: &str) -> Option<TypeDef> {
        self.namespaces.get(namespace)?.get(name).copied()
    }

    /// Look up a type by its fully-qualified dotted name.
    pub fn find_full(&self, full_name: &str) -> Option<TypeDef> {
        let (namespace, name) = full_name.rsplit_once('.')?;
        self.find(namespace, name)
    }

    pub fn kind(&self, td: TypeDef) -> TypeKind {
        if td.flags().contains(TypeAttributes::Interface) {
            return TypeKind::Interface;
        }
        match td.extends() {
            Some(extends) => match (extends.namespace(), extends.name()) {
                ("System", "Enum") => TypeKind::Enum,
                ("System", "ValueType") => TypeKind::Struct,
                ("System", "MulticastDelegate") => TypeKind::Delegate,
                _ => TypeKind::Class,
            },
            None => TypeKind::Other,
        }
    }

    /// The base type's `(namespace, name)`, if any.
    pub fn extends(&self, td: TypeDef) -> Option<(String, String)> {
        td.extends()
            .map(|t| (t.namespace().to_string(), t.name().to_string()))
    }

    /// Declared generic parameter names, in slot order.
    pub fn generic_param_names(&self, td: TypeDef) -> Vec<String> {
        td.generic_params().map(|g| g.name().to_string()).collect()
    }

    /// Implemented interfaces in declaration order, with the
    /// `DefaultAttribute` marker.
    pub fn interfaces(&self, td: TypeDef) -> Vec<InterfaceRef> {
        td.interface_impls()
            .map(|i| InterfaceRef {
                is_default: find_attribute(
                    i.attributes(),
                    "Windows.Foundation.Metadata",
                    "DefaultAttribute",
                )
                .is_some(),
                ty: i.interface(&[]),
            })
            .collect()
    }

    pub fn is_exclusive_to(&self, td: TypeDef) -> bool {
        self.kind(td) == TypeKind::Interface
            && has_type_attribute(td, "Windows.Foundation.Metadata", "ExclusiveToAttribute")
    }

    pub fn is_flags_enum(&self, td: TypeDef) -> bool {
        self.kind(td) == TypeKind::Enum && has_type_attribute(td, "System", "FlagsAttribute")
    }

    pub fn is_api_contract(&self, td: TypeDef) -> bool {
        self.kind(td) == TypeKind::Struct
            && has_type_attribute(td, "Windows.Foundation.Metadata", "ApiContractAttribute")
    }

    pub fn is_activatable(&self, td: TypeDef) -> bool {
        has_type_attribute(td, "Windows.Foundation.Metadata", "ActivatableAttribute")
    }

    /// Extract the interface GUID from `GuidAttribute`.
    pub fn guid_of(&self, td: TypeDef) -> Result<TypeGuid> {
        let attribute =
            type_attribute(td, "Windows.Foundation.Metadata", "GuidAttribute").with_context(
                || {
                    format!(
                        "GuidAttribute for type {}.{} not found",
                        td.namespace(),
                        td.name()
                    )
                },
            )?;
        TypeGuid::from_args(&attribute.value())
            .with_context(|| format!("malformed GuidAttribute on {}.{}", td.namespace(), td.name()))
    }

    /// The delegate's special-name `Invoke` method.
    pub fn delegate_invoke(&self, td: TypeDef) -> Result<MethodDef> {
        td.methods()
            .find(|m| m.flags().contains(MethodAttributes::SpecialName) && m.name() == "Invoke")
            .with_context(|| {
                format!(
                    "Invoke method not found on delegate {}.{}",
                    td.namespace(),
                    td.name()
                )
            })
    }

    /// Properties derived from their `get_`/`put_` special-name accessors,
    /// in accessor declaration order. The property type comes from the
    /// getter's return signature (or the setter's value parameter when no
    /// getter exists).
    pub fn properties(&self, td: TypeDef) -> Vec<PropertyInfo> {
        let mut properties: Vec<PropertyInfo> = Vec::new();
        for method in td.methods() {
            if !method.flags().contains(MethodAttributes::SpecialName) {
                continue;
            }
            if let Some(name) = method.name().strip_prefix("get_") {
                let sig = MethodSig::new(method);
                let Some(ret) = sig.return_sig else {
                    continue;
                };
                match properties.iter_mut().find(|p| p.name == name) {
                    Some(existing) => existing.getter = existing.getter.or(Some(method)),
                    None => properties.push(PropertyInfo {
                        name: name.to_string(),
                        getter: Some(method),
                        setter: None,
                        ty: ret.ty,
                        is_array: ret.is_array,
                    }),
                }
            } else if let Some(name) = method.name().strip_prefix("put_") {
                let sig = MethodSig::new(method);
                let Some(value) = sig.params.into_iter().next() else {
                    continue;
                };
                match properties.iter_mut().find(|p| p.name == name) {
                    Some(existing) => existing.setter = existing.setter.or(Some(method)),
                    None => properties.push(PropertyInfo {
                        name: name.to_string(),
                        getter: None,
                        setter: Some(method),
                        ty: value.ty,
                        is_array: value.is_array,
                    }),
                }
            }
        }
        properties
    }

    /// Events derived from their `add_`/`remove_` special-name accessors.
    /// The handler type is the `add_` accessor's first parameter; events
    /// with no `add` accessor are dropped with a warning.
    pub fn events(&self, td: TypeDef) -> Vec<EventInfo> {
        struct Pending {
            name: String,
            add: Option<MethodDef>,
            remove: Option<MethodDef>,
            handler: Option<Type>,
        }

        let mut pending: Vec<Pending> = Vec::new();
        let entry = |name: &str, collected: &mut Vec<Pending>| -> usize {
            match collected.iter().position(|e| e.name == name) {
                Some(i) => i,
                None => {
                    collected.push(Pending {
                        name: name.to_string(),
                        add: None,
                        remove: None,
                        handler: None,
                    });
                    collected.len() - 1
                }
            }
        };

        for method in td.methods() {
            if !method.flags().contains(MethodAttributes::SpecialName) {
                continue;
            }
            if let Some(name) = method.name().strip_prefix("add_") {
                let sig = MethodSig::new(method);
                let i = entry(name, &mut pending);
                pending[i].add = pending[i].add.or(Some(method));
                if let Some(handler) = sig.params.into_iter().next() {
                    pending[i].handler.get_or_insert(handler.ty);
                }
            } else if let Some(name) = method.name().strip_prefix("remove_") {
                let i = entry(name, &mut pending);
                pending[i].remove = pending[i].remove.or(Some(method));
            }
        }

        pending
            .into_iter()
            .filter_map(|e| match (e.add, e.handler) {
                (Some(add), Some(handler)) => Some(EventInfo {
                    name: e.name,
                    add,
                    remove: e.remove,
                    handler,
                }),
                _ => {
                    warn!(event = e.name, "dropping event without an add accessor");
                    None
                }
            })
            .collect()
    }
}

/// An implemented interface with its `DefaultAttribute` marker.
pub struct InterfaceRef {
    pub ty: Type,
    pub is_default: bool,
}

/// A property reconstructed from accessor methods.
pub struct PropertyInfo {
    pub name: String,
    pub getter: Option<MethodDef>,
    pub setter: Option<MethodDef>,
    pub ty: Type,
    pub is_array: bool,
}

/// An event reconstructed from accessor methods.
pub struct EventInfo {
    pub name: String,
    pub add: MethodDef,
    pub remove: Option<MethodDef>,
    pub handler: Type,
}

impl EventInfo {
    pub fn is_static(&self) -> bool {
        is_static(self.add) || self.remove.is_some_and(is_static)
    }
}

pub fn is_static(method: MethodDef) -> bool {
    method.flags().contains(MethodAttributes::Static)
}

pub fn is_special(method: MethodDef) -> bool {
    method.flags().contains(MethodAttributes::SpecialName)
}

pub fn is_constructor(method: MethodDef) -> bool {
    is_special(method) && method.name() == ".ctor"
}

// ---------------------------------------------------------------------------
// Attribute lookup
// ---------------------------------------------------------------------------

fn find_attribute(
    attributes: impl Iterator<Item = Attribute>,
    namespace: &str,
    name: &str,
) -> Option<Attribute> {
    let mut attributes = attributes;
    attributes.find(|attribute| {
        let parent = attribute.ctor().parent();
        parent.namespace() == namespace && parent.name() == name
    })
}

pub fn type_attribute(td: TypeDef, namespace: &str, name: &str) -> Option<Attribute> {
    find_attribute(td.attributes(), namespace, name)
}

pub fn has_type_attribute(td: TypeDef, namespace: &str, name: &str) -> bool {
    type_attribute(td, namespace, name).is_some()
}

/// The renamed overload from `OverloadAttribute`, if present.
pub fn overload_name(method: MethodDef) -> Option<String> {
    find_attribute(
        method.attributes(),
        "Windows.Foundation.Metadata",
        "OverloadAttribute",
    )
    .and_then(|attribute| {
        attribute.value().into_iter().find_map(|(_, value)| match value {
            Value::Utf8(name) | Value::Utf16(name) => Some(name),
            _ => None,
        })
    })
}

// ---------------------------------------------------------------------------
// GUID unpacking
// ---------------------------------------------------------------------------

/// A WinRT interface GUID, packed little-endian in the first three fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeGuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl TypeGuid {
    /// Build a guid from the eleven fixed arguments of `GuidAttribute`.
    pub fn from_args(args: &[(String, Value)]) -> Result<TypeGuid> {
        fn u32_arg(args: &[(String, Value)], index: usize) -> Result<u32> {
            match args.get(index) {
                Some((_, Value::U32(v))) => Ok(*v),
                other => bail!("expected u32 guid argument at {index}, got {other:?}"),
            }
        }
        fn u16_arg(args: &[(String, Value)], index: usize) -> Result<u16> {
            match args.get(index) {
                Some((_, Value::U16(v))) => Ok(*v),
                other => bail!("expected u16 guid argument at {index}, got {other:?}"),
            }
        }
        fn u8_arg(args: &[(String, Value)], index: usize) -> Result<u8> {
            match args.get(index) {
                Some((_, Value::U8(v))) => Ok(*v),
                other => bail!("expected u8 guid argument at {index}, got {other:?}"),
            }
        }

        let mut data4 = [0u8; 8];
        for (i, byte) in data4.iter_mut().enumerate() {
            *byte = u8_arg(args, 3 + i)?;
        }
        Ok(TypeGuid {
            data1: u32_arg(args, 0)?,
            data2: u16_arg(args, 1)?,
            data3: u16_arg(args, 2)?,
            data4,
        })
    }

    /// The 16-byte layout: first three fields little-endian, then the
    /// trailing eight bytes verbatim.
    pub fn to_bytes(self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&self.data1.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.data2.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.data3.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.data4);
        bytes
    }
}

impl fmt::Display for TypeGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

// ---------------------------------------------------------------------------
// Method signatures
// ---------------------------------------------------------------------------

/// One parameter of a decoded method signature: the Param row's name and
/// flags paired with the signature type, with array-ness peeled off.
#[derive(Clone)]
pub struct SigParam {
    pub name: String,
    pub flags: ParamAttributes,
    pub ty: Type,
    pub is_array: bool,
}

/// A decoded return signature. `None` at the [`MethodSig`] level means the
/// method returns void.
#[derive(Clone)]
pub struct SigReturn {
    pub ty: Type,
    pub is_array: bool,
}

/// A method signature with its Param rows resolved: the optional
/// sequence-0 row names the return value, the remaining rows pair with the
/// signature's parameter types by position.
pub struct MethodSig {
    pub return_sig: Option<SigReturn>,
    pub return_name: Option<String>,
    pub params: Vec<SigParam>,
}

impl MethodSig {
    pub fn new(method: MethodDef) -> MethodSig {
        let signature = method.signature(&[]);
        let mut rows: Vec<Param> = method.params().collect();

        let mut return_name = None;
        if !matches!(signature.return_type, Type::Void)
            && rows.first().is_some_and(|row| row.sequence() == 0)
        {
            return_name = Some(rows.remove(0).name().to_string());
        }

        let params = signature
            .types
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                let (name, flags) = rows
                    .get(i)
                    .map(|row| (row.name().to_string(), row.flags()))
                    .unwrap_or_else(|| (format!("param{i}"), ParamAttributes::default()));
                let (ty, is_array) = peel_array(ty.clone());
                SigParam {
                    name,
                    flags,
                    ty,
                    is_array,
                }
            })
            .collect();

        let return_sig = match signature.return_type {
            Type::Void => None,
            ty => {
                let (ty, is_array) = peel_array(ty);
                Some(SigReturn { ty, is_array })
            }
        };

        MethodSig {
            return_sig,
            return_name,
            params,
        }
    }

    /// The name for the return value in structured return records.
    pub fn return_param_name(&self, default: &str) -> String {
        self.return_name
            .clone()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn out_params(&self) -> Vec<SigParam> {
        self.params
            .iter()
            .filter(|p| p.flags.contains(ParamAttributes::Out))
            .cloned()
            .collect()
    }
}

/// Strip an array wrapper, reporting whether one was present.
pub fn peel_array(ty: Type) -> (Type, bool) {
    match ty {
        Type::Array(element) => (*element, true),
        other => (other, false),
    }
}

/// Read an enum field constant as its 32-bit pattern.
pub fn constant_u32(value: &Value) -> Result<u32> {
    match value {
        Value::I32(v) => Ok(*v as u32),
        Value::U32(v) => Ok(*v),
        Value::I16(v) => Ok(*v as u32),
        Value::U16(v) => Ok(u32::from(*v)),
        Value::U8(v) => Ok(u32::from(*v)),
        Value::I64(v) => Ok(*v as u32),
        other => bail!("unsupported enum constant {other:?}"),
    }
}
