//! Inbound field scrubbing.
//!
//! Strips script blocks, residual markup, `javascript:` scheme prefixes and
//! inline event-handler attributes from every string field of a request's
//! JSON containers, recursively. Only the in-flight value is touched; the
//! patterns themselves are the module's only long-lived state.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid pattern"));

static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid pattern"));

static JS_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript:").expect("valid pattern"));

static EVENT_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bon\w+\s*=").expect("valid pattern"));

/// Scrub one string value.
///
/// Order matters: complete script blocks go first (with their content), then
/// any remaining tags, then scheme and handler-attribute fragments that
/// survive outside markup.
pub fn scrub_text(input: &str) -> String {
    let out = SCRIPT_BLOCK.replace_all(input, "");
    let out = MARKUP_TAG.replace_all(&out, "");
    let out = JS_SCHEME.replace_all(&out, "");
    let out = EVENT_ATTR.replace_all(&out, "");
    out.into_owned()
}

/// Recursively scrub every string field of a JSON container in place.
/// Non-string leaves pass through unmodified.
pub fn scrub_value(value: &mut Value) {
    match value {
        Value::String(s) => {
            let cleaned = scrub_text(s);
            if cleaned != *s {
                *s = cleaned;
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                scrub_value(v);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                scrub_value(v);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn script_block_removed_with_content() {
        assert_eq!(scrub_text("<script>alert(1)</script>"), "");
        assert_eq!(
            scrub_text("before<script type=\"text/javascript\">alert(1)</script>after"),
            "beforeafter"
        );
    }

    #[test]
    fn script_block_case_insensitive() {
        assert_eq!(scrub_text("<SCRIPT>alert(1)</SCRIPT>"), "");
    }

    #[test]
    fn tags_stripped_entirely() {
        assert_eq!(scrub_text("<img onerror=x>"), "");
        assert_eq!(scrub_text("<b>bold</b> text"), "bold text");
    }

    #[test]
    fn javascript_scheme_stripped() {
        assert_eq!(scrub_text("javascript:alert(1)"), "alert(1)");
        assert_eq!(scrub_text("JaVaScRiPt:alert(1)"), "alert(1)");
    }

    #[test]
    fn event_attribute_stripped_outside_markup() {
        assert_eq!(scrub_text("x onclick=steal()"), "x steal()");
    }

    #[test]
    fn clean_text_unchanged() {
        assert_eq!(scrub_text("plain 1 < 2 comparison"), "plain 1 < 2 comparison");
        assert_eq!(scrub_text("قیمت محصول"), "قیمت محصول");
    }

    #[test]
    fn containers_scrubbed_recursively() {
        let mut value = json!({
            "name": "<script>alert(1)</script>",
            "nested": {
                "note": "javascript:alert(1)",
                "items": ["<img onerror=x>", "keep me"],
            },
            "amount": 25000,
            "flag": true,
        });
        scrub_value(&mut value);
        assert_eq!(value["name"], "");
        assert_eq!(value["nested"]["note"], "alert(1)");
        assert_eq!(value["nested"]["items"][0], "");
        assert_eq!(value["nested"]["items"][1], "keep me");
        // Non-string leaves untouched.
        assert_eq!(value["amount"], 25000);
        assert_eq!(value["flag"], true);
    }
}
