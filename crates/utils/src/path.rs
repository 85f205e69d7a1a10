/// Sanitize one path component of the repository storage layout.
///
/// Separators and the literal `..` marker are replaced with `_` and the
/// result is trimmed. Returns `None` when nothing usable remains; callers
/// treat that as a fatal invalid-path condition.
pub fn sanitize_component(raw: &str) -> Option<String> {
    let replaced = raw.replace(['/', '\\'], "_").replace("..", "_");
    let trimmed = replaced.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_separators_and_parent_markers() {
        assert_eq!(sanitize_component("acme/widgets"), Some("acme_widgets".into()));
        assert_eq!(sanitize_component("a\\b"), Some("a_b".into()));
        assert_eq!(sanitize_component("..secret"), Some("_secret".into()));
        assert_eq!(sanitize_component("a..b..c"), Some("a_b_c".into()));
    }

    #[test]
    fn trims_and_rejects_empty() {
        assert_eq!(sanitize_component("  repo  "), Some("repo".into()));
        assert_eq!(sanitize_component(""), None);
        assert_eq!(sanitize_component("   "), None);
        assert_eq!(sanitize_component(" .. "), Some("_".into()));
    }

    #[test]
    fn sanitization_is_idempotent() {
        let inputs = [
            "acme/widgets",
            "....",
            "a/..\\b",
            "weird name",
            ". .",
            "...",
            "nested/../../escape",
        ];
        for input in inputs {
            if let Some(once) = sanitize_component(input) {
                assert_eq!(sanitize_component(&once), Some(once.clone()), "input {input:?}");
                assert!(!once.contains('/'), "input {input:?}");
                assert!(!once.contains('\\'), "input {input:?}");
                assert!(!once.contains(".."), "input {input:?}");
            }
        }
    }
}
