//! Server-side filter formulas.

/// Reference a field by name, escaping closing braces.
pub(super) fn field_ref(name: &str) -> String {
    format!("{{{}}}", name.replace('}', "\\}"))
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Records modified after `cursor`, plus every unpublished record so their
/// rows can be deleted.
pub(super) fn delta_filter(last_modified: &str, published: Option<&str>, cursor: &str) -> String {
    let changed = format!("IS_AFTER({}, {})", field_ref(last_modified), quote(cursor));
    match published {
        Some(published) => format!("OR({}, NOT({}))", changed, field_ref(published)),
        None => changed,
    }
}

/// Only published records.
pub(super) fn published_filter(published: &str) -> String {
    field_ref(published)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_filter_with_published_field() {
        assert_eq!(
            delta_filter("Last Modified", Some("Published"), "2024-01-01T00:00:00.000Z"),
            "OR(IS_AFTER({Last Modified}, '2024-01-01T00:00:00.000Z'), NOT({Published}))"
        );
    }

    #[test]
    fn test_delta_filter_without_published_field() {
        assert_eq!(
            delta_filter("Updated", None, "2024-01-01T00:00:00.000Z"),
            "IS_AFTER({Updated}, '2024-01-01T00:00:00.000Z')"
        );
    }

    #[test]
    fn test_field_names_are_escaped() {
        assert_eq!(field_ref("Odd}Name"), "{Odd\\}Name}");
        assert_eq!(published_filter("Live"), "{Live}");
        assert_eq!(quote("it's"), "'it\\'s'");
    }
}
