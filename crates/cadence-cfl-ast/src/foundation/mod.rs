//! Foundation types: spans, values, the type algebra, and the host
//! callable protocol.

pub mod callable;
pub mod decimal;
pub mod rng;
pub mod span;
pub mod types;
pub mod value;

pub use callable::{
    get_slot_up, Callable, CommandAction, CommandSeq, CommandStep, MapCallable, ProbeCallable,
    ScopeEntry, ScopeLayout,
};
pub use decimal::Decimal;
pub use rng::RngStream;
pub use span::{DebugInfo, SourceEntry, SourceMap, Span};
pub use types::{NamedType, NullResolver, Type, TypeKind, TypeRegistry, TypeResolver};
pub use value::{Value, ValueMap};
