use ammonia;

/// Clean admin-supplied exam text (titles, prompts, option labels).
///
/// Whitelist-based sanitization: safe formatting tags such as <b> or <p>
/// survive, while <script>, <iframe> and event-handler attributes are
/// stripped before the text is stored and later rendered on student devices.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_is_removed_but_formatting_kept() {
        let cleaned = clean_html("<b>Select</b> all primes<script>alert(1)</script>");
        assert_eq!(cleaned, "<b>Select</b> all primes");
    }

    #[test]
    fn test_plain_text_is_untouched() {
        assert_eq!(clean_html("What is 2+2?"), "What is 2+2?");
    }
}
