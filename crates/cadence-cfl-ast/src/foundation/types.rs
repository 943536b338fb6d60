//! The structural type algebra.
//!
//! Type descriptors are immutable and `Arc`-shared; compatibility is
//! directional (`is_compatible_with(from)` asks "may a value of `from`
//! flow where `to` is expected"), not symmetric equality. Unions are kept
//! simplified: construction through [`Type::union_of`] removes members
//! subsumed by other members, so two simplified unions are equal exactly
//! when they denote the same set.
//!
//! Class and object references carry dotted hierarchical names
//! (`unit.vehicle.tank` is derived from `unit.vehicle`); explicit
//! derivations registered in a [`TypeRegistry`] extend that. Named types
//! declared externally resolve lazily through a [`TypeResolver`] so
//! mutually recursive declarations work.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::foundation::value::Value;

/// An immutable, cheaply clonable type descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type(Arc<TypeKind>);

/// The structural forms a type can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// Accepts every value.
    Any,
    /// The type of `null`. Only `null`, `any`, and unions containing
    /// `null` accept it.
    Null,
    Bool,
    Int,
    Decimal,
    String,
    /// Deferred side-effect values produced by `;` sequencing.
    Commands,
    /// Homogeneous list.
    List(Type),
    /// Fixed-arity tuple.
    SpecificList(Vec<Type>),
    /// Homogeneous map.
    Map { key: Type, value: Type },
    /// Record with exact known string keys.
    SpecificMap {
        required: IndexMap<String, Type>,
        optional: IndexMap<String, Type>,
    },
    /// Function signature. Arguments past `min_args` have defaults.
    Function {
        args: Vec<Type>,
        ret: Type,
        min_args: usize,
    },
    /// Closed set of admissible string values, kept sorted.
    Enum(Vec<String>),
    /// Reference to an engine class by dotted hierarchical name.
    Class(String),
    /// Reference to a custom object definition by dotted name.
    Object(String),
    /// Structural interface: any record/object providing these members.
    Interface(IndexMap<String, Type>),
    /// A generic type variable (capitalized identifier).
    Generic(String),
    /// One of several types; invariant: no member accepts another member.
    Union(Vec<Type>),
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Type(Arc::new(kind))
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0
    }

    pub fn any() -> Type {
        Type::new(TypeKind::Any)
    }
    pub fn null() -> Type {
        Type::new(TypeKind::Null)
    }
    pub fn bool() -> Type {
        Type::new(TypeKind::Bool)
    }
    pub fn int() -> Type {
        Type::new(TypeKind::Int)
    }
    pub fn decimal() -> Type {
        Type::new(TypeKind::Decimal)
    }
    pub fn string() -> Type {
        Type::new(TypeKind::String)
    }
    pub fn commands() -> Type {
        Type::new(TypeKind::Commands)
    }
    pub fn list(element: Type) -> Type {
        Type::new(TypeKind::List(element))
    }
    pub fn map(key: Type, value: Type) -> Type {
        Type::new(TypeKind::Map { key, value })
    }
    pub fn function(args: Vec<Type>, ret: Type, min_args: usize) -> Type {
        Type::new(TypeKind::Function { args, ret, min_args })
    }
    pub fn generic(name: impl Into<String>) -> Type {
        Type::new(TypeKind::Generic(name.into()))
    }

    pub fn enumeration(mut values: Vec<String>) -> Type {
        values.sort();
        values.dedup();
        Type::new(TypeKind::Enum(values))
    }

    pub fn is_any(&self) -> bool {
        matches!(self.kind(), TypeKind::Any)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.kind(), TypeKind::Int | TypeKind::Decimal)
    }

    pub fn contains_generic(&self) -> bool {
        match self.kind() {
            TypeKind::Generic(_) => true,
            TypeKind::List(t) => t.contains_generic(),
            TypeKind::SpecificList(ts) => ts.iter().any(Type::contains_generic),
            TypeKind::Map { key, value } => key.contains_generic() || value.contains_generic(),
            TypeKind::SpecificMap { required, optional } => required
                .values()
                .chain(optional.values())
                .any(Type::contains_generic),
            TypeKind::Function { args, ret, .. } => {
                args.iter().any(Type::contains_generic) || ret.contains_generic()
            }
            TypeKind::Interface(members) => members.values().any(Type::contains_generic),
            TypeKind::Union(ts) => ts.iter().any(Type::contains_generic),
            _ => false,
        }
    }

    /// Element type when indexing with an int, if this is list-like.
    pub fn index_element(&self) -> Option<Type> {
        match self.kind() {
            TypeKind::List(t) => Some(t.clone()),
            TypeKind::SpecificList(ts) => Some(Type::union_of(ts.clone(), &NullResolver)),
            TypeKind::Any => Some(Type::any()),
            _ => None,
        }
    }

    /// Member type for `.name` access on records and interfaces.
    pub fn member_type(&self, name: &str) -> Option<Type> {
        match self.kind() {
            TypeKind::SpecificMap { required, optional } => required
                .get(name)
                .cloned()
                .or_else(|| optional.get(name).cloned()),
            TypeKind::Interface(members) => members.get(name).cloned(),
            _ => None,
        }
    }

    /// Build a simplified union: flatten nested unions, drop structural
    /// duplicates, then drop members another member already accepts.
    pub fn union_of(types: Vec<Type>, resolver: &dyn TypeResolver) -> Type {
        let mut flat: Vec<Type> = Vec::new();
        let mut stack = types;
        stack.reverse();
        while let Some(t) = stack.pop() {
            match t.kind() {
                TypeKind::Union(members) => {
                    for m in members.iter().rev() {
                        stack.push(m.clone());
                    }
                }
                _ => {
                    if !flat.contains(&t) {
                        flat.push(t);
                    }
                }
            }
        }
        let mut kept: Vec<Type> = Vec::new();
        'outer: for (i, t) in flat.iter().enumerate() {
            for (j, other) in flat.iter().enumerate() {
                if i == j {
                    continue;
                }
                // drop t if some other member subsumes it; on mutual
                // subsumption keep the earlier one
                if other.is_compatible_with(t, resolver)
                    && !(t.is_compatible_with(other, resolver) && i < j)
                {
                    continue 'outer;
                }
            }
            kept.push(t.clone());
        }
        match kept.len() {
            0 => Type::any(),
            1 => kept.pop().expect("len checked"),
            _ => Type::new(TypeKind::Union(kept)),
        }
    }

    /// Directional compatibility: may a value of type `from` flow where
    /// `self` is expected?
    pub fn is_compatible_with(&self, from: &Type, resolver: &dyn TypeResolver) -> bool {
        if self == from {
            return true;
        }
        // unions distribute on both sides: every alternative the source
        // may take must be accepted by some alternative of the target
        if let TypeKind::Union(members) = from.kind() {
            return members.iter().all(|m| self.is_compatible_with(m, resolver));
        }
        match self.kind() {
            TypeKind::Any => true,
            TypeKind::Union(members) => members
                .iter()
                .any(|m| m.is_compatible_with(from, resolver)),
            TypeKind::Null => matches!(from.kind(), TypeKind::Null),
            TypeKind::Bool => matches!(from.kind(), TypeKind::Bool),
            TypeKind::Int => matches!(from.kind(), TypeKind::Int),
            // decimal accepts int, never the reverse
            TypeKind::Decimal => matches!(from.kind(), TypeKind::Decimal | TypeKind::Int),
            TypeKind::String => matches!(from.kind(), TypeKind::String),
            TypeKind::Commands => matches!(from.kind(), TypeKind::Commands | TypeKind::Null),
            TypeKind::List(elem) => match from.kind() {
                TypeKind::List(from_elem) => elem.is_compatible_with(from_elem, resolver),
                TypeKind::SpecificList(items) => {
                    items.iter().all(|t| elem.is_compatible_with(t, resolver))
                }
                _ => false,
            },
            TypeKind::SpecificList(slots) => match from.kind() {
                TypeKind::SpecificList(items) => {
                    slots.len() == items.len()
                        && slots
                            .iter()
                            .zip(items)
                            .all(|(s, i)| s.is_compatible_with(i, resolver))
                }
                _ => false,
            },
            TypeKind::Map { key, value } => match from.kind() {
                TypeKind::Map {
                    key: fk,
                    value: fv,
                } => key.is_compatible_with(fk, resolver) && value.is_compatible_with(fv, resolver),
                TypeKind::SpecificMap { required, optional } => {
                    let string_key = key.is_compatible_with(&Type::string(), resolver);
                    string_key
                        && required
                            .values()
                            .chain(optional.values())
                            .all(|t| value.is_compatible_with(t, resolver))
                }
                _ => false,
            },
            TypeKind::SpecificMap { required, optional } => match from.kind() {
                TypeKind::SpecificMap {
                    required: from_req,
                    optional: from_opt,
                } => {
                    // every required key must be supplied compatibly
                    required.iter().all(|(k, t)| {
                        from_req
                            .get(k)
                            .is_some_and(|ft| t.is_compatible_with(ft, resolver))
                    })
                    // and the source may not carry unknown keys
                    && from_req
                        .keys()
                        .chain(from_opt.keys())
                        .all(|k| required.contains_key(k) || optional.contains_key(k))
                    // optional keys that are supplied must match too
                    && optional.iter().all(|(k, t)| {
                        from_req
                            .get(k)
                            .or_else(|| from_opt.get(k))
                            .is_none_or(|ft| t.is_compatible_with(ft, resolver))
                    })
                }
                _ => false,
            },
            TypeKind::Function {
                args,
                ret,
                min_args,
            } => match from.kind() {
                TypeKind::Function {
                    args: fargs,
                    ret: fret,
                    min_args: fmin,
                } => {
                    args.len() == fargs.len()
                        && min_args == fmin
                        && ret.is_compatible_with(fret, resolver)
                        && args
                            .iter()
                            .zip(fargs)
                            .all(|(a, fa)| fa.is_compatible_with(a, resolver))
                }
                _ => false,
            },
            TypeKind::Enum(values) => match from.kind() {
                TypeKind::Enum(from_values) => {
                    from_values.iter().all(|v| values.contains(v))
                }
                _ => false,
            },
            TypeKind::Class(name) => match from.kind() {
                TypeKind::Class(from_name) => resolver.is_derived_from(from_name, name),
                _ => false,
            },
            TypeKind::Object(name) => match from.kind() {
                TypeKind::Object(from_name) => resolver.is_derived_from(from_name, name),
                _ => false,
            },
            TypeKind::Interface(members) => match from.kind() {
                TypeKind::Interface(from_members) => members.iter().all(|(k, t)| {
                    from_members
                        .get(k)
                        .is_some_and(|ft| t.is_compatible_with(ft, resolver))
                }),
                TypeKind::SpecificMap { required, .. } => members.iter().all(|(k, t)| {
                    required
                        .get(k)
                        .is_some_and(|ft| t.is_compatible_with(ft, resolver))
                }),
                _ => false,
            },
            TypeKind::Generic(name) => {
                matches!(from.kind(), TypeKind::Generic(n) if n == name)
            }
        }
    }

    /// The type after a successful truthiness test: unions lose their
    /// `null` member. Non-unions are unchanged.
    pub fn null_excluded(&self) -> Type {
        self.with_exclusion(&Type::null())
    }

    /// The type minus one excluded alternative, used for flow narrowing
    /// after `is not` and failed equality tests.
    pub fn with_exclusion(&self, excluded: &Type) -> Type {
        if let TypeKind::Union(members) = self.kind() {
            let kept: Vec<Type> = members
                .iter()
                .filter(|m| *m != excluded)
                .cloned()
                .collect();
            if kept.is_empty() || kept.len() == members.len() {
                return self.clone();
            }
            return match kept.len() {
                1 => kept.into_iter().next().expect("len checked"),
                _ => Type::new(TypeKind::Union(kept)),
            };
        }
        self.clone()
    }

    /// The alternatives of `self` that `narrow_to` accepts, for the true
    /// branch of an `is` test. Falls back to `narrow_to` itself when the
    /// static type has nothing narrower to offer.
    pub fn narrowed_to(&self, narrow_to: &Type, resolver: &dyn TypeResolver) -> Type {
        if let TypeKind::Union(members) = self.kind() {
            let kept: Vec<Type> = members
                .iter()
                .filter(|m| narrow_to.is_compatible_with(m, resolver))
                .cloned()
                .collect();
            if !kept.is_empty() {
                return Type::union_of(kept, resolver);
            }
        }
        narrow_to.clone()
    }

    /// Substitute generic variables per `bindings`.
    pub fn substitute(&self, bindings: &HashMap<String, Type>) -> Type {
        match self.kind() {
            TypeKind::Generic(name) => bindings.get(name).cloned().unwrap_or_else(|| self.clone()),
            TypeKind::List(t) => Type::list(t.substitute(bindings)),
            TypeKind::SpecificList(ts) => Type::new(TypeKind::SpecificList(
                ts.iter().map(|t| t.substitute(bindings)).collect(),
            )),
            TypeKind::Map { key, value } => {
                Type::map(key.substitute(bindings), value.substitute(bindings))
            }
            TypeKind::SpecificMap { required, optional } => Type::new(TypeKind::SpecificMap {
                required: required
                    .iter()
                    .map(|(k, t)| (k.clone(), t.substitute(bindings)))
                    .collect(),
                optional: optional
                    .iter()
                    .map(|(k, t)| (k.clone(), t.substitute(bindings)))
                    .collect(),
            }),
            TypeKind::Function {
                args,
                ret,
                min_args,
            } => Type::function(
                args.iter().map(|t| t.substitute(bindings)).collect(),
                ret.substitute(bindings),
                *min_args,
            ),
            TypeKind::Interface(members) => Type::new(TypeKind::Interface(
                members
                    .iter()
                    .map(|(k, t)| (k.clone(), t.substitute(bindings)))
                    .collect(),
            )),
            TypeKind::Union(ts) => Type::union_of(
                ts.iter().map(|t| t.substitute(bindings)).collect(),
                &NullResolver,
            ),
            _ => self.clone(),
        }
    }

    /// Unify a generic-bearing parameter type against a concrete argument
    /// type, extending `bindings`. Contradictory bindings fail.
    pub fn unify(
        &self,
        arg: &Type,
        bindings: &mut HashMap<String, Type>,
        resolver: &dyn TypeResolver,
    ) -> Result<(), String> {
        match (self.kind(), arg.kind()) {
            (TypeKind::Generic(name), _) => {
                if let Some(existing) = bindings.get(name) {
                    if existing != arg {
                        return Err(format!(
                            "generic {} bound to both {} and {}",
                            name, existing, arg
                        ));
                    }
                } else {
                    bindings.insert(name.clone(), arg.clone());
                }
                Ok(())
            }
            (TypeKind::List(t), TypeKind::List(a)) => t.unify(a, bindings, resolver),
            (TypeKind::List(t), TypeKind::SpecificList(items)) => {
                let elem = Type::union_of(items.clone(), resolver);
                t.unify(&elem, bindings, resolver)
            }
            (TypeKind::SpecificList(ts), TypeKind::SpecificList(items))
                if ts.len() == items.len() =>
            {
                for (t, a) in ts.iter().zip(items) {
                    t.unify(a, bindings, resolver)?;
                }
                Ok(())
            }
            (TypeKind::Map { key, value }, TypeKind::Map { key: ak, value: av }) => {
                key.unify(ak, bindings, resolver)?;
                value.unify(av, bindings, resolver)
            }
            (
                TypeKind::Function { args, ret, .. },
                TypeKind::Function {
                    args: aargs,
                    ret: aret,
                    ..
                },
            ) if args.len() == aargs.len() => {
                for (t, a) in args.iter().zip(aargs) {
                    t.unify(a, bindings, resolver)?;
                }
                ret.unify(aret, bindings, resolver)
            }
            _ => {
                if self.contains_generic() {
                    Err(format!("cannot unify {} with {}", self, arg))
                } else if self.is_compatible_with(arg, resolver) {
                    Ok(())
                } else {
                    Err(format!("{} is not compatible with {}", self, arg))
                }
            }
        }
    }

    /// Runtime check: does `value` inhabit this type?
    pub fn matches_value(&self, value: &Value, resolver: &dyn TypeResolver) -> bool {
        match self.kind() {
            TypeKind::Any => true,
            TypeKind::Null => value.is_null(),
            TypeKind::Bool => matches!(value, Value::Bool(_)),
            TypeKind::Int => matches!(value, Value::Int(_)),
            TypeKind::Decimal => value.is_numeric(),
            TypeKind::String => matches!(value, Value::Str(_)),
            TypeKind::Commands => matches!(value, Value::Command(_) | Value::Null),
            TypeKind::List(elem) => value
                .as_list()
                .is_some_and(|items| items.iter().all(|v| elem.matches_value(v, resolver))),
            TypeKind::SpecificList(slots) => value.as_list().is_some_and(|items| {
                items.len() == slots.len()
                    && slots
                        .iter()
                        .zip(items)
                        .all(|(t, v)| t.matches_value(v, resolver))
            }),
            TypeKind::Map { key, value: val } => value.as_map().is_some_and(|entries| {
                entries
                    .iter()
                    .all(|(k, v)| key.matches_value(k, resolver) && val.matches_value(v, resolver))
            }),
            TypeKind::SpecificMap { required, optional } => {
                value.as_map().is_some_and(|entries| {
                    required.iter().all(|(k, t)| {
                        entries
                            .get(&Value::string(k))
                            .is_some_and(|v| t.matches_value(v, resolver))
                    }) && entries.iter().all(|(k, v)| match k.as_str() {
                        Some(name) => match required.get(name).or_else(|| optional.get(name)) {
                            Some(t) => t.matches_value(v, resolver),
                            None => false,
                        },
                        None => false,
                    })
                })
            }
            TypeKind::Function { args, min_args, .. } => match value {
                Value::Function(f) => {
                    f.params().len() == args.len() && f.min_args() == *min_args
                }
                _ => false,
            },
            TypeKind::Enum(values) => value
                .as_str()
                .is_some_and(|s| values.iter().any(|v| v == s)),
            TypeKind::Class(name) | TypeKind::Object(name) => match value {
                Value::Object(obj) => obj
                    .query_class()
                    .is_some_and(|cls| resolver.is_derived_from(cls, name)),
                _ => false,
            },
            TypeKind::Interface(members) => value.as_map().is_some_and(|entries| {
                members.iter().all(|(k, t)| {
                    entries
                        .get(&Value::string(k))
                        .is_some_and(|v| t.matches_value(v, resolver))
                })
            }),
            TypeKind::Generic(_) => true,
            TypeKind::Union(types) => types.iter().any(|t| t.matches_value(value, resolver)),
        }
    }

    /// Best-effort static type of a literal value, used when freezing
    /// constants.
    pub fn of_value(value: &Value) -> Type {
        match value {
            Value::Null => Type::null(),
            Value::Bool(_) => Type::bool(),
            Value::Int(_) => Type::int(),
            Value::Decimal(_) => Type::decimal(),
            Value::Str(_) => Type::string(),
            Value::List(items) => {
                if items.is_empty() {
                    Type::list(Type::any())
                } else {
                    Type::list(Type::union_of(
                        items.iter().map(Type::of_value).collect(),
                        &NullResolver,
                    ))
                }
            }
            Value::Map(entries) => {
                if entries.is_empty() {
                    Type::map(Type::any(), Type::any())
                } else {
                    Type::map(
                        Type::union_of(entries.keys().map(Type::of_value).collect(), &NullResolver),
                        Type::union_of(
                            entries.values().map(Type::of_value).collect(),
                            &NullResolver,
                        ),
                    )
                }
            }
            Value::Object(_) => Type::any(),
            Value::Function(f) => f.signature(),
            Value::Command(_) => Type::commands(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            TypeKind::Any => write!(f, "any"),
            TypeKind::Null => write!(f, "null"),
            TypeKind::Bool => write!(f, "bool"),
            TypeKind::Int => write!(f, "int"),
            TypeKind::Decimal => write!(f, "decimal"),
            TypeKind::String => write!(f, "string"),
            TypeKind::Commands => write!(f, "commands"),
            TypeKind::List(t) => write!(f, "[{t}]"),
            TypeKind::SpecificList(ts) => {
                write!(f, "[")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, "]")
            }
            TypeKind::Map { key, value } => write!(f, "{{{key} -> {value}}}"),
            TypeKind::SpecificMap { required, optional } => {
                write!(f, "{{")?;
                let mut first = true;
                for (k, t) in required {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{k}: {t}")?;
                }
                for (k, t) in optional {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{k}?: {t}")?;
                }
                write!(f, "}}")
            }
            TypeKind::Function { args, ret, .. } => {
                write!(f, "function(")?;
                for (i, t) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ") -> {ret}")
            }
            TypeKind::Enum(values) => {
                write!(f, "enum{{")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "}}")
            }
            TypeKind::Class(name) => write!(f, "class {name}"),
            TypeKind::Object(name) => write!(f, "obj {name}"),
            TypeKind::Interface(members) => {
                write!(f, "interface{{")?;
                for (i, (k, t)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {t}")?;
                }
                write!(f, "}}")
            }
            TypeKind::Generic(name) => write!(f, "{name}"),
            TypeKind::Union(ts) => {
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{t}")?;
                }
                Ok(())
            }
        }
    }
}

/// Lookup interface the type algebra needs from its environment:
/// derived-from checks and lazy named-type resolution.
pub trait TypeResolver {
    fn is_derived_from(&self, sub: &str, base: &str) -> bool {
        // dotted hierarchy: `a.b.c` derives from `a.b` derives from `a`
        sub == base || sub.strip_prefix(base).is_some_and(|rest| rest.starts_with('.'))
    }

    fn resolve_named(&self, _name: &str) -> Option<Type> {
        None
    }
}

/// Resolver with no registry behind it: dotted-name derivation only.
pub struct NullResolver;

impl TypeResolver for NullResolver {}

/// Externally declared named types and class derivations, with push/pop
/// scoping. Later declaration levels shadow earlier ones. Declarations
/// resolve lazily: a level stores source text until something asks for
/// the type, then caches the parsed result at that level.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    levels: Vec<Level>,
    derived: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct Level {
    declared: HashMap<String, NamedType>,
}

/// A named type declaration in one registry level.
#[derive(Debug, Clone)]
pub enum NamedType {
    /// Declaration text not parsed yet.
    Unresolved(String),
    /// Marker set while the declaration is being parsed, to catch
    /// self-referential declarations.
    Resolving,
    Resolved(Type),
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            levels: vec![Level::default()],
            derived: HashMap::new(),
        }
    }

    /// Open a new declaration scope; its names shadow earlier levels.
    pub fn push_scope(&mut self) {
        self.levels.push(Level::default());
    }

    /// Drop the most recent declaration scope.
    ///
    /// # Panics
    ///
    /// Panics if only the root scope remains.
    pub fn pop_scope(&mut self) {
        assert!(self.levels.len() > 1, "cannot pop the root type scope");
        self.levels.pop();
    }

    /// Declare a named type by source text, resolved lazily on first use.
    pub fn declare(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.levels
            .last_mut()
            .expect("registry always has a root level")
            .declared
            .insert(name.into(), NamedType::Unresolved(source.into()));
    }

    /// Declare an already-resolved named type.
    pub fn declare_resolved(&mut self, name: impl Into<String>, ty: Type) {
        self.levels
            .last_mut()
            .expect("registry always has a root level")
            .declared
            .insert(name.into(), NamedType::Resolved(ty));
    }

    /// Register an explicit class derivation edge.
    pub fn register_derivation(&mut self, sub: impl Into<String>, base: impl Into<String>) {
        self.derived.insert(sub.into(), base.into());
    }

    /// Find the innermost declaration of `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<NamedType> {
        self.levels
            .iter()
            .rev()
            .find_map(|level| level.declared.get(name).cloned())
    }

    /// Replace the innermost declaration of `name`; used by the parser to
    /// cache a lazily resolved type (or its in-progress marker) at the
    /// level the declaration lives in.
    pub fn store(&mut self, name: &str, state: NamedType) {
        for level in self.levels.iter_mut().rev() {
            if let Some(slot) = level.declared.get_mut(name) {
                *slot = state;
                return;
            }
        }
        // a store for an unknown name is a fresh resolved declaration
        if let NamedType::Resolved(ty) = state {
            self.declare_resolved(name, ty);
        }
    }
}

impl TypeResolver for TypeRegistry {
    fn is_derived_from(&self, sub: &str, base: &str) -> bool {
        if sub == base || sub.strip_prefix(base).is_some_and(|rest| rest.starts_with('.')) {
            return true;
        }
        // follow explicit derivation edges
        let mut current = sub;
        let mut hops = 0;
        while let Some(parent) = self.derived.get(current) {
            if parent == base {
                return true;
            }
            current = parent;
            hops += 1;
            if hops > 64 {
                break; // defend against a cyclic derivation table
            }
        }
        false
    }

    fn resolve_named(&self, name: &str) -> Option<Type> {
        match self.lookup(name)? {
            NamedType::Resolved(ty) => Some(ty),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_accepts_int_not_reverse() {
        assert!(Type::decimal().is_compatible_with(&Type::int(), &NullResolver));
        assert!(!Type::int().is_compatible_with(&Type::decimal(), &NullResolver));
    }

    #[test]
    fn union_simplification_drops_subsumed() {
        let u = Type::union_of(
            vec![
                Type::int(),
                Type::union_of(vec![Type::int(), Type::string()], &NullResolver),
            ],
            &NullResolver,
        );
        match u.kind() {
            TypeKind::Union(members) => {
                assert_eq!(members.len(), 2);
                assert!(members.contains(&Type::int()));
                assert!(members.contains(&Type::string()));
            }
            other => panic!("expected union, got {other:?}"),
        }
    }

    #[test]
    fn union_simplification_order_independent() {
        let a = Type::union_of(vec![Type::int(), Type::string()], &NullResolver);
        let b = Type::union_of(vec![Type::string(), Type::int()], &NullResolver);
        // same member set either way
        for t in [Type::int(), Type::string()] {
            assert!(a.is_compatible_with(&t, &NullResolver));
            assert!(b.is_compatible_with(&t, &NullResolver));
        }
        assert!(a.is_compatible_with(&b, &NullResolver));
        assert!(b.is_compatible_with(&a, &NullResolver));
    }

    #[test]
    fn union_with_any_collapses() {
        let u = Type::union_of(vec![Type::any(), Type::int()], &NullResolver);
        assert!(u.is_any());
    }

    #[test]
    fn null_needs_a_union() {
        assert!(!Type::int().is_compatible_with(&Type::null(), &NullResolver));
        let nullable = Type::union_of(vec![Type::int(), Type::null()], &NullResolver);
        assert!(nullable.is_compatible_with(&Type::null(), &NullResolver));
        assert_eq!(nullable.null_excluded(), Type::int());
    }

    #[test]
    fn function_compatibility_is_contravariant() {
        // expecting function(decimal)->int
        let expected = Type::function(vec![Type::decimal()], Type::int(), 1);
        // a function taking any and returning int may stand in
        let wider = Type::function(vec![Type::any()], Type::int(), 1);
        assert!(expected.is_compatible_with(&wider, &NullResolver));
        // but one taking only int may not
        let narrower = Type::function(vec![Type::int()], Type::int(), 1);
        assert!(!expected.is_compatible_with(&narrower, &NullResolver));
    }

    #[test]
    fn specific_list_pointwise() {
        let tuple = Type::new(TypeKind::SpecificList(vec![Type::int(), Type::string()]));
        let list_any = Type::list(Type::any());
        assert!(list_any.is_compatible_with(&tuple, &NullResolver));
        assert!(!tuple.is_compatible_with(&list_any, &NullResolver));
    }

    #[test]
    fn dotted_names_derive() {
        let r = NullResolver;
        assert!(r.is_derived_from("unit.vehicle.tank", "unit.vehicle"));
        assert!(r.is_derived_from("unit", "unit"));
        assert!(!r.is_derived_from("unit_extra", "unit"));
    }

    #[test]
    fn registry_scoping_shadows() {
        let mut reg = TypeRegistry::new();
        reg.declare_resolved("Points", Type::int());
        reg.push_scope();
        reg.declare_resolved("Points", Type::decimal());
        assert_eq!(reg.resolve_named("Points"), Some(Type::decimal()));
        reg.pop_scope();
        assert_eq!(reg.resolve_named("Points"), Some(Type::int()));
    }

    #[test]
    fn generic_unification_binds_and_conflicts() {
        let mut bindings = HashMap::new();
        let param = Type::list(Type::generic("T"));
        let arg = Type::list(Type::int());
        param.unify(&arg, &mut bindings, &NullResolver).unwrap();
        assert_eq!(bindings.get("T"), Some(&Type::int()));

        let conflicting = Type::list(Type::string());
        assert!(param
            .unify(&conflicting, &mut bindings, &NullResolver)
            .is_err());
    }

    #[test]
    fn substitution_rewrites_nested() {
        let mut bindings = HashMap::new();
        bindings.insert("T".to_string(), Type::int());
        let f = Type::function(vec![Type::list(Type::generic("T"))], Type::generic("T"), 1);
        let g = f.substitute(&bindings);
        assert_eq!(
            g,
            Type::function(vec![Type::list(Type::int())], Type::int(), 1)
        );
    }
}
