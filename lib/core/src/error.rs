//! Shared `Result` alias for binary-level error composition.
//!
//! The pipeline crates each own their error enums — repository errors in
//! the persistence crate, bus errors in the bus crate, provider and
//! runtime errors alongside the components that raise them — and those
//! enums are what the library APIs return. This alias exists for the
//! process entrypoints, where a startup step may fail for reasons
//! spanning several of those enums: wrapping them in a rootcause
//! `Report` lets `main` attach context ("building application context",
//! "installing signal handlers") without inventing an umbrella enum.

use rootcause::Report;

/// Result over a rootcause [`Report`], used at process boundaries.
///
/// Attach context with `.context()` while propagating; keep the typed
/// per-crate errors for everything callers need to match on.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
