//! ID formatting and parsing for workplan items.
//!
//! IDs have the shape `{PREFIX}-{zero-padded-number}`, e.g. `EP-0001`.
//! Item files are named `{ID}-{slug}.md`.

/// Format an ID from a prefix and a sequence number.
pub fn format_id(prefix: &str, number: u32, width: usize) -> String {
    format!("{prefix}-{number:0width$}")
}

/// Split an ID into its prefix and numeric part.
pub fn parse_id(id: &str) -> Option<(&str, u32)> {
    let (prefix, digits) = id.rsplit_once('-')?;
    if !is_valid_prefix(prefix) {
        return None;
    }
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|n| (prefix, n))
}

/// Check whether a string is a well-formed item ID.
pub fn is_valid_id(id: &str) -> bool {
    parse_id(id).is_some()
}

fn is_valid_prefix(prefix: &str) -> bool {
    prefix.starts_with(|c: char| c.is_ascii_alphabetic()) && prefix.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Extract the leading ID from a file name like `ISS-0004-fix-login.md`.
pub fn id_from_file_name(name: &str) -> Option<&str> {
    let stem = name.strip_suffix(".md").unwrap_or(name);
    let mut parts = stem.splitn(3, '-');
    let prefix = parts.next()?;
    let digits = parts.next()?;
    let end = prefix.len() + 1 + digits.len();
    let candidate = &stem[..end];
    is_valid_id(candidate).then_some(candidate)
}

/// Turn a title into a short file-name slug.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= 40 {
            break;
        }
    }
    if slug.is_empty() { "item".to_string() } else { slug }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_id_pads() {
        assert_eq!(format_id("EP", 1, 4), "EP-0001");
        assert_eq!(format_id("PR", 12345, 4), "PR-12345");
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("ISS-0042"), Some(("ISS", 42)));
        assert_eq!(parse_id("ISS-"), None);
        assert_eq!(parse_id("-0042"), None);
        assert_eq!(parse_id("ISS-00x2"), None);
        assert_eq!(parse_id("1SS-0042"), None);
    }

    #[test]
    fn test_id_from_file_name() {
        assert_eq!(id_from_file_name("TSK-0003-write-docs.md"), Some("TSK-0003"));
        assert_eq!(id_from_file_name("TSK-0003.md"), Some("TSK-0003"));
        assert_eq!(id_from_file_name("notes.md"), None);
        assert_eq!(id_from_file_name("README-draft.md"), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Fix the Login  flow!"), "fix-the-login-flow");
        assert_eq!(slugify("***"), "item");
    }
}
