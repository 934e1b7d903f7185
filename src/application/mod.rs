pub mod history;
pub mod models;

pub use history::is_source_in_history;

/// Split `"namespace/name"` into its parts, falling back to `default_namespace`
/// for unqualified names.
pub fn parse_qualified_name<'a>(qualified: &'a str, default_namespace: &'a str) -> (&'a str, &'a str) {
    match qualified.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() => (namespace, name),
        Some((_, name)) => (default_namespace, name),
        None => (default_namespace, qualified),
    }
}
