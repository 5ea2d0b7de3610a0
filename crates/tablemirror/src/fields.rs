//! Discovery of role columns ("last modified", "published").
//!
//! Schemas drift: a column may be renamed or missing. Roles are therefore
//! matched from an ordered candidate list instead of a fixed name.

use crate::remote::Record;

/// Resolve which column plays a role.
///
/// A non-empty `prior` value (from the previous run's metadata) is trusted.
/// Otherwise `known_columns` is scanned case-insensitively for each candidate
/// in order, and the first hit is returned in the column's own spelling.
#[must_use]
pub fn resolve_field<C, K>(candidates: &[C], known_columns: &[K], prior: Option<&str>) -> Option<String>
where
    C: AsRef<str>,
    K: AsRef<str>,
{
    if let Some(prior) = prior.map(str::trim)
        && !prior.is_empty()
    {
        return Some(prior.to_string());
    }

    candidates.iter().find_map(|candidate| {
        let candidate = candidate.as_ref().trim().to_lowercase();
        known_columns
            .iter()
            .map(AsRef::as_ref)
            .find(|column| column.trim().to_lowercase() == candidate)
            .map(str::to_string)
    })
}

/// Field names seen across `records`, each once, in first-seen order.
#[must_use]
pub fn observed_fields(records: &[Record]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut fields = Vec::new();
    for record in records {
        for name in record.fields.keys() {
            if seen.insert(name.as_str()) {
                fields.push(name.clone());
            }
        }
    }
    fields
}

/// Resolve a role from fetched records rather than from a prior file.
#[must_use]
pub fn discover_field_from_records<C: AsRef<str>>(
    records: &[Record],
    candidates: &[C],
) -> Option<String> {
    resolve_field(candidates, &observed_fields(records), None)
}
