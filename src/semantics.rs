//! Type semantics — the normalized meaning of every metadata type
//! reference, and the lexical generic-argument stack used while rendering
//! nested instantiations.

use anyhow::{Result, bail};

use crate::cache::{Type, TypeCache, TypeDef};

/// The projectable fundamental element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundamentalKind {
    Bool,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    F4,
    F8,
    String,
}

/// The resolved meaning of a type reference.
#[derive(Clone)]
pub enum TypeSemantics {
    Fundamental(FundamentalKind),
    /// The root reference marker — `System.Object`, `System.Attribute`, and
    /// the object element type.
    Object,
    /// `System.Guid`.
    Guid,
    /// `System.Type`.
    TypeMarker,
    /// A concrete metadata type.
    Definition(TypeDef),
    /// A reference to the N-th argument of the enclosing generic scope.
    GenericIndex(u32),
    /// A generic parameter declaration, rendered by its declared name.
    GenericParamDef(String),
    /// A closed or partially-closed generic instantiation.
    Instance(GenericInstance),
}

/// A generic definition combined with a vector of type arguments.
#[derive(Clone)]
pub struct GenericInstance {
    pub generic: TypeDef,
    pub args: Vec<TypeSemantics>,
}

/// Resolve a raw signature type.
pub fn of_type(ty: &Type, cache: &TypeCache) -> Result<TypeSemantics> {
    use FundamentalKind as F;
    let semantics = match ty {
        Type::Bool => TypeSemantics::Fundamental(F::Bool),
        Type::Char => TypeSemantics::Fundamental(F::Char),
        Type::I8 => TypeSemantics::Fundamental(F::I1),
        Type::U8 => TypeSemantics::Fundamental(F::U1),
        Type::I16 => TypeSemantics::Fundamental(F::I2),
        Type::U16 => TypeSemantics::Fundamental(F::U2),
        Type::I32 => TypeSemantics::Fundamental(F::I4),
        Type::U32 => TypeSemantics::Fundamental(F::U4),
        Type::I64 => TypeSemantics::Fundamental(F::I8),
        Type::U64 => TypeSemantics::Fundamental(F::U8),
        Type::F32 => TypeSemantics::Fundamental(F::F4),
        Type::F64 => TypeSemantics::Fundamental(F::F8),
        Type::String => TypeSemantics::Fundamental(F::String),
        Type::Object => TypeSemantics::Object,
        Type::Generic(index) => TypeSemantics::GenericIndex(u32::from(*index)),
        Type::Name(name) if name.generics.is_empty() => {
            return of_name(&name.namespace, &name.name, cache);
        }
        Type::Name(name) => {
            let Some(generic) = cache.find(&name.namespace, &name.name) else {
                bail!("unresolved generic type {}.{}", name.namespace, name.name);
            };
            let args = name
                .generics
                .iter()
                .map(|arg| of_type(arg, cache))
                .collect::<Result<Vec<_>>>()?;
            debug_assert_eq!(args.len(), cache.generic_param_names(generic).len());
            TypeSemantics::Instance(GenericInstance { generic, args })
        }
        // Generic method parameters, pointers and the rest of the element
        // zoo are not projected.
        other => bail!("unsupported signature element {other:?}"),
    };
    Ok(semantics)
}

/// Resolve a `TypeDefOrRef`-style `(namespace, name)` reference.
pub fn of_name(namespace: &str, name: &str, cache: &TypeCache) -> Result<TypeSemantics> {
    if namespace == "System" {
        match name {
            "Object" | "Attribute" => return Ok(TypeSemantics::Object),
            "Guid" => return Ok(TypeSemantics::Guid),
            "Type" => return Ok(TypeSemantics::TypeMarker),
            _ => {}
        }
    }
    match cache.find(namespace, name) {
        Some(td) => Ok(TypeSemantics::Definition(td)),
        None => bail!("unresolved type reference {namespace}.{name}"),
    }
}

/// The lexical chain of active generic argument vectors.
///
/// Pushes and pops must nest; pushes are wrapped in scoped blocks by the
/// writer, and [`GenericArgs::pop`] asserts against underflow. The scope
/// cursor threads `GenericIndex` resolution outward across nested
/// instantiations: a resolved argument is rendered with the cursor pinned
/// one level below the vector it resolved in, so indices inside the
/// argument's own subtree resolve against the correct enclosing scope.
#[derive(Default)]
pub struct GenericArgs {
    stack: Vec<Vec<TypeSemantics>>,
    scope: usize,
}

impl GenericArgs {
    /// Push the declared parameters of a generic definition as
    /// [`TypeSemantics::GenericParamDef`] values. Returns whether a vector
    /// was pushed (empty declarations push nothing).
    pub fn push_params(&mut self, names: &[String]) -> bool {
        if names.is_empty() {
            return false;
        }
        self.push_args(
            names
                .iter()
                .map(|name| TypeSemantics::GenericParamDef(name.clone()))
                .collect(),
        );
        true
    }

    /// Push an instantiation's argument vector.
    pub fn push_instance(&mut self, instance: &GenericInstance) {
        self.push_args(instance.args.clone());
    }

    /// Push an argument vector directly.
    pub fn push_args(&mut self, args: Vec<TypeSemantics>) {
        assert!(!args.is_empty(), "empty generic argument vector");
        self.stack.push(args);
    }

    pub fn pop(&mut self) {
        assert!(
            self.stack.pop().is_some(),
            "generic argument stack underflow"
        );
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Install a scope cursor, returning the previous one for restoration.
    pub fn set_scope(&mut self, scope: usize) -> usize {
        std::mem::replace(&mut self.scope, scope)
    }

    /// Resolve a generic parameter index against the active scope.
    ///
    /// Pass-through bindings (an argument that is itself a
    /// `GenericIndex`) are followed outward. Returns the resolved
    /// semantics together with the scope to pin while rendering it.
    pub fn resolve(&self, index: u32) -> Result<(TypeSemantics, usize)> {
        let mut index = index as usize;
        let start = if self.scope > 0 {
            self.scope - 1
        } else {
            self.stack.len()
        };
        for depth in (1..=start).rev() {
            let args = &self.stack[depth - 1];
            if index >= args.len() {
                bail!("generic index {index} out of range");
            }
            match &args[index] {
                TypeSemantics::GenericIndex(outer) => index = *outer as usize,
                semantics => return Ok((semantics.clone(), depth)),
            }
        }
        bail!("no generic arguments in scope");
    }
}
