use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use regex::Regex;
use serde_json::Value;

static TOS_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<([^>]+)>;rel="terms-of-service""#).expect("valid regex"));

pub fn b64url(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn b64url_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(input)
}

/// Percent-encodes every character that must not appear in a file name.
///
/// Forbidden: `< > : " / \ | ? *`, C0 controls, DEL, and C1 controls. With
/// `allow_path` the `/` separator is kept. Encoding is `%` followed by the
/// code point in uppercase hex with no zero padding.
pub fn safe_name(name: &str, allow_path: bool) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if is_forbidden(c, allow_path) {
            out.push_str(&format!("%{:X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

fn is_forbidden(c: char, allow_path: bool) -> bool {
    match c {
        '/' => !allow_path,
        '<' | '>' | ':' | '"' | '\\' | '|' | '?' | '*' => true,
        _ => {
            let cp = c as u32;
            cp < 0x20 || (0x7F..=0x9F).contains(&cp)
        }
    }
}

/// Extracts the terms-of-service URL from a `link` response header.
pub fn tos_link_from_link_header(header: &str) -> Option<String> {
    TOS_LINK
        .captures(header)
        .map(|captures| captures[1].to_string())
}

/// Returns the first `mailto:` contact of a registration profile, with the
/// scheme stripped.
pub fn extract_email(profile: &Value) -> Option<String> {
    profile
        .get("contact")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .find_map(|contact| contact.strip_prefix("mailto:"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_safe_name_keeps_plain_names() {
        assert_eq!(safe_name("abc.def", false), "abc.def");
        assert_eq!(safe_name("www.example.com", false), "www.example.com");
    }

    #[test]
    fn test_safe_name_encodes_forbidden_characters() {
        assert_eq!(safe_name("a<b>c", false), "a%3Cb%3Ec");
        assert_eq!(safe_name("a/b", false), "a%2Fb");
        assert_eq!(safe_name("a?*|b", false), "a%3F%2A%7Cb");
    }

    #[test]
    fn test_safe_name_keeps_separators_when_paths_allowed() {
        assert_eq!(
            safe_name("/my/file\"| cat passwd", true),
            "/my/file%22%7C cat passwd"
        );
    }

    #[test]
    fn test_safe_name_encodes_controls_without_padding() {
        assert_eq!(safe_name("a\nb", false), "a%Ab");
        assert_eq!(safe_name("a\u{7F}b", false), "a%7Fb");
        assert_eq!(safe_name("a\u{85}b", false), "a%85b");
    }

    #[test]
    fn test_safe_name_is_idempotent_on_safe_output() {
        let once = safe_name("weird<name>\u{1}", false);
        assert_eq!(safe_name(&once, false), once);
    }

    #[test]
    fn test_tos_link_extraction() {
        let header = r#"<https://www.example.com>;rel="terms-of-service""#;
        assert_eq!(
            tos_link_from_link_header(header).as_deref(),
            Some("https://www.example.com")
        );
    }

    #[test]
    fn test_tos_link_absent() {
        assert!(tos_link_from_link_header(r#"<https://x>;rel="index""#).is_none());
        assert!(tos_link_from_link_header("").is_none());
    }

    #[test]
    fn test_extract_email_skips_non_mailto_contacts() {
        let profile = json!({
            "contact": ["tel:+1234", null, "mailto:info@example.com"]
        });
        assert_eq!(
            extract_email(&profile).as_deref(),
            Some("info@example.com")
        );
    }

    #[test]
    fn test_extract_email_none_without_mailto() {
        assert!(extract_email(&json!({ "contact": ["tel:+1234"] })).is_none());
        assert!(extract_email(&json!({})).is_none());
    }

    #[test]
    fn test_b64url_round_trip() {
        assert_eq!(b64url(b"Hello World!"), "SGVsbG8gV29ybGQh");
        assert_eq!(b64url_decode("SGVsbG8gV29ybGQh").expect("decode"), b"Hello World!");
    }
}
