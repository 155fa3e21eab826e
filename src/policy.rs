//! Projection policy — filters, identifier normalization, type remapping
//! and async-return shaping.

use crate::cache::{self, TypeAttributes, TypeCache, TypeDef};
use crate::config::Options;
use crate::semantics::FundamentalKind;

/// Metadata member names that collide with reserved or poisoned TypeScript
/// identifiers.
const BANNED_IDENTIFIERS: [&str; 3] = ["function", "arguments", "package"];

/// Whether a type is part of the projection.
pub fn should_project(cache: &TypeCache, td: TypeDef, options: &Options) -> bool {
    if !td.flags().contains(TypeAttributes::WindowsRuntime) {
        return false;
    }
    if cache.is_exclusive_to(td) && !options.include_exclusive {
        return false;
    }
    if cache::has_type_attribute(td, "Windows.Foundation.Metadata", "WebHostHiddenAttribute")
        && !options.allow_web_host_hidden
    {
        return false;
    }
    true
}

/// Well-known types rendered as a different name in fully-projected
/// positions (field types, parameter types, return types, property types).
pub fn mapped_type_name(namespace: &str, name: &str) -> Option<&'static str> {
    match (namespace, name) {
        ("Windows.Foundation", "DateTime") => Some("Date"),
        ("Windows.Foundation", "TimeSpan") => Some("number"),
        ("Windows.Foundation", "HResult") => Some("number"),
        _ => None,
    }
}

/// Camel-case a metadata member name.
///
/// An uppercase leading run is lowercased up to (but not including) the
/// first lowercase character or underscore; when the run ends at a
/// lowercase character its final capital starts the next word and is kept
/// (`HTMLDocument` → `htmlDocument`, `GetName` → `getName`, `URL` → `url`,
/// `UPPER_CASE` → `upper_CASE`). Names that already start lowercase are
/// only checked against the banned identifier list.
pub fn normalize_member(name: &str) -> String {
    let mut chars: Vec<char> = name.chars().collect();
    if chars.first().is_some_and(|c| c.is_ascii_uppercase()) {
        let stop = chars
            .iter()
            .position(|c| *c == '_' || c.is_ascii_lowercase())
            .unwrap_or(chars.len());
        let run = if stop < chars.len() && chars[stop].is_ascii_lowercase() {
            stop.saturating_sub(1).max(1)
        } else {
            stop
        };
        for c in &mut chars[..run] {
            *c = c.to_ascii_lowercase();
        }
        return chars.into_iter().collect();
    }
    if BANNED_IDENTIFIERS.contains(&name) {
        return format!("__{name}");
    }
    name.to_string()
}

pub fn fundamental_type_name(kind: FundamentalKind) -> &'static str {
    match kind {
        FundamentalKind::Bool => "boolean",
        FundamentalKind::Char | FundamentalKind::String => "string",
        _ => "number",
    }
}

/// How an async stub completes inside its `from(async () => …)` closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncCompletion {
    Warn,
    Throw,
}

/// One entry of the async-return shaping table.
pub struct AsyncStub {
    /// Rendered-return-type prefix that selects this stub.
    pub prefix: &'static str,
    /// Fully-qualified helper type recorded in the imports set.
    pub import: &'static str,
    /// Helper name used in the emitted body.
    pub helper: &'static str,
    pub completion: AsyncCompletion,
}

/// Ordered so longer prefixes are tested before the prefixes they contain.
const ASYNC_STUBS: [AsyncStub; 4] = [
    AsyncStub {
        prefix: "IAsyncActionWithProgress",
        import: "Windows.Foundation.Interop.AsyncActionWithProgress`1",
        helper: "AsyncActionWithProgress",
        completion: AsyncCompletion::Warn,
    },
    AsyncStub {
        prefix: "IAsyncAction",
        import: "Windows.Foundation.Interop.AsyncAction",
        helper: "AsyncAction",
        completion: AsyncCompletion::Warn,
    },
    AsyncStub {
        prefix: "IAsyncOperationWithProgress",
        import: "Windows.Foundation.Interop.AsyncOperationWithProgress`2",
        helper: "AsyncOperationWithProgress",
        completion: AsyncCompletion::Throw,
    },
    AsyncStub {
        prefix: "IAsyncOperation",
        import: "Windows.Foundation.Interop.AsyncOperation`1",
        helper: "AsyncOperation",
        completion: AsyncCompletion::Throw,
    },
];

/// The async stub matching a rendered return type name, if any.
pub fn async_stub(return_type_name: &str) -> Option<&'static AsyncStub> {
    ASYNC_STUBS
        .iter()
        .find(|stub| return_type_name.starts_with(stub.prefix))
}
