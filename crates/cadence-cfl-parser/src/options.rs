//! Parse-time configuration.

use std::sync::{Arc, RwLock};

use cadence_cfl_ast::{DebugInfo, FunctionTable, ScopeLayout, TypeRegistry};
use cadence_cfl_functions::standard_table;

/// How strict-mode static findings are handled. A build-level toggle,
/// not a per-error choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrictMode {
    /// No static checking beyond what the grammar requires.
    #[default]
    Off,
    /// Log findings through `tracing::warn` and keep parsing.
    Warn,
    /// Turn the first finding into a parse error.
    Abort,
}

/// Options threaded through one parse.
#[derive(Clone)]
pub struct ParseOptions {
    pub strict: StrictMode,
    /// Builtin registry call targets resolve against.
    pub functions: FunctionTable,
    /// Static description of the host scope, when the host has one.
    /// Without it identifiers stay dynamic lookups and strict mode
    /// cannot check them.
    pub layout: Option<ScopeLayout>,
    /// Whether the host scope implements slot access; when false,
    /// layout names type-check but resolve by name at runtime.
    pub host_slots: bool,
    /// Externally declared named types and class derivations.
    pub types: Option<Arc<RwLock<TypeRegistry>>>,
    /// Host-supplied origin record, used only for diagnostics.
    pub debug_info: Option<DebugInfo>,
    /// Source id recorded into spans.
    pub source_id: u16,
    /// Translation hook for `~...~` strings. Identity when absent.
    pub translate: Option<fn(&str) -> String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            strict: StrictMode::Off,
            functions: standard_table(),
            layout: None,
            host_slots: true,
            types: None,
            debug_info: None,
            source_id: 0,
            translate: None,
        }
    }
}

impl std::fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseOptions")
            .field("strict", &self.strict)
            .field("functions", &self.functions.len())
            .field("layout", &self.layout.as_ref().map(|l| l.len()))
            .field("host_slots", &self.host_slots)
            .field("debug_info", &self.debug_info)
            .field("source_id", &self.source_id)
            .finish()
    }
}
