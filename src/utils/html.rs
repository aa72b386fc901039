// src/utils/html.rs

/// Sanitizes teacher-authored HTML (page contents, feedback) and learner
/// essays with ammonia's whitelist.
///
/// Safe formatting tags survive; `<script>` is dropped together with its
/// content, as are event handler attributes.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_is_stripped() {
        let cleaned = clean_html("<p onclick=\"x()\">Hi<script>alert(1)</script></p>");
        assert_eq!(cleaned, "<p>Hi</p>");
    }
}
