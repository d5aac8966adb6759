/// Text sanitization for channel messages and topics.
///
/// Any implementation must be idempotent:
/// `sanitize(sanitize(x)) == sanitize(x)`.

/// Longest sanitized text, in characters.
pub const MAX_TEXT_CHARS: usize = 4000;

pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, text: &str) -> String;
}

/// Default sanitizer: drops markup tags, angle brackets and control
/// characters, trims surrounding whitespace and caps the length.
///
/// The output never contains `<`, `>` or control characters, so a second
/// pass has nothing left to remove.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkupSanitizer;

impl Sanitizer for MarkupSanitizer {
    fn sanitize(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(c) = rest.chars().next() {
            rest = &rest[c.len_utf8()..];
            match c {
                '<' => {
                    // Skip a whole tag when it closes; otherwise drop the bracket alone.
                    if let Some(end) = rest.find('>') {
                        rest = &rest[end + 1..];
                    }
                }
                '>' => {}
                c if c.is_control() => {}
                c => out.push(c),
            }
        }

        let trimmed = out.trim();
        match trimmed.char_indices().nth(MAX_TEXT_CHARS) {
            Some((cut, _)) => trimmed[..cut].trim_end().to_owned(),
            None => trimmed.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn clean(s: &str) -> String {
        MarkupSanitizer.sanitize(s)
    }

    #[test]
    fn strips_tags_and_controls() {
        assert_eq!(clean("<b>hello</b> swarm"), "hello swarm");
        assert_eq!(clean("<script>alert(1)</script>ok"), "alert(1)ok");
        assert_eq!(clean("a\u{0007}b\tc"), "abc");
        assert_eq!(clean("2 > 1 and 1 < 2"), "2  1 and 1  2");
        assert_eq!(clean("   padded  "), "padded");
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(clean("hi"), "hi");
        assert_eq!(clean("déjà vu — ünïcode ✓"), "déjà vu — ünïcode ✓");
    }

    #[test]
    fn caps_length() {
        let long = "x".repeat(MAX_TEXT_CHARS + 50);
        assert_eq!(clean(&long).chars().count(), MAX_TEXT_CHARS);
    }

    #[test]
    fn idempotent_on_representative_payloads() {
        let payloads = [
            "hello",
            "<<b>script>alert(1)<</b>/script>",
            "<a href='x'>link</a> and <unclosed",
            "nested <<<>>> brackets >>",
            " \u{0000}ctrl\u{001b}[31m red ",
            "emoji 🐝 <i>swarm</i>",
            "<",
            ">",
            "",
        ];
        let long = format!("  {}  <b>", "ab ".repeat(MAX_TEXT_CHARS));
        for input in payloads.iter().copied().chain([long.as_str()]) {
            let once = clean(input);
            assert_eq!(clean(&once), once, "not idempotent for {input:?}");
        }
    }
}
