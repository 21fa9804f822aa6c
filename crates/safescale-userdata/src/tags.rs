//! Insertion-tag handling (spec §4.7): after a phase template is expanded,
//! any `#<tagname>` marker line is augmented with user-registered content,
//! inserted immediately before the marker — "append-before-marker"
//! semantics — rather than replacing the marker outright, so a marker
//! remains a stable anchor across whatever registrations preceded this
//! render.

use std::collections::HashMap;

/// Accumulates fragments per tag name, in registration order. Built fresh
/// per [`crate::generate`] call (unlike the process-wide template cache,
/// tag content is request-specific — SSH keys, per-host routes).
#[derive(Debug, Default, Clone)]
pub struct TagRegistry {
    tags: HashMap<String, Vec<String>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `content` to `tag`'s fragment list. Returns `&mut Self` so
    /// callers can chain several registrations fluently.
    pub fn register(&mut self, tag: impl Into<String>, content: impl Into<String>) -> &mut Self {
        self.tags.entry(tag.into()).or_default().push(content.into());
        self
    }

    /// Rewrites `text`, inserting every registered tag's fragments directly
    /// above the corresponding `#<tagname>` marker line. Lines with no
    /// matching registration pass through unchanged, including ordinary `#`
    /// comments that simply never had a tag registered for them.
    pub fn apply(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for line in text.lines() {
            if let Some(tag) = line.trim_start().strip_prefix('#') {
                if let Some(fragments) = self.tags.get(tag) {
                    for fragment in fragments {
                        out.push_str(fragment);
                        if !fragment.ends_with('\n') {
                            out.push('\n');
                        }
                    }
                }
            }
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_marker_is_left_untouched() {
        let registry = TagRegistry::new();
        let rendered = registry.apply("echo hi\n#insert_extra\necho bye\n");
        assert_eq!(rendered, "echo hi\n#insert_extra\necho bye\n");
    }

    #[test]
    fn registered_tag_is_inserted_before_its_marker() {
        let mut registry = TagRegistry::new();
        registry.register("insert_extra", "echo from-tag");
        let rendered = registry.apply("echo hi\n#insert_extra\necho bye\n");
        assert_eq!(rendered, "echo hi\necho from-tag\n#insert_extra\necho bye\n");
    }

    #[test]
    fn multiple_registrations_accumulate_in_order() {
        let mut registry = TagRegistry::new();
        registry.register("insert_extra", "first");
        registry.register("insert_extra", "second");
        let rendered = registry.apply("#insert_extra\n");
        assert_eq!(rendered, "first\nsecond\n#insert_extra\n");
    }
}
