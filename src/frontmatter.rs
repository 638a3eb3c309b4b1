//! Frontmatter codec: a `---` delimited YAML header followed by a Markdown body.

use crate::types::{Item, ItemDetail, ItemHeader, ItemKind};
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::Path;

/// Errors from splitting or decoding a document.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontmatterError {
    MissingOpeningDelimiter,
    MissingClosingDelimiter,
    NotAMapping,
    Yaml(String),
}

impl fmt::Display for FrontmatterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrontmatterError::MissingOpeningDelimiter => write!(f, "file does not start with '---'"),
            FrontmatterError::MissingClosingDelimiter => write!(f, "frontmatter is not closed with '---'"),
            FrontmatterError::NotAMapping => write!(f, "frontmatter is not a key/value mapping"),
            FrontmatterError::Yaml(msg) => write!(f, "invalid YAML: {}", msg),
        }
    }
}

impl std::error::Error for FrontmatterError {}

impl From<serde_yaml::Error> for FrontmatterError {
    fn from(e: serde_yaml::Error) -> Self {
        FrontmatterError::Yaml(e.to_string())
    }
}

/// A parsed file: raw frontmatter mapping plus body text.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub frontmatter: Mapping,
    pub body: String,
}

/// Split content into its YAML and body parts.
fn split(content: &str) -> Result<(&str, &str), FrontmatterError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
        .ok_or(FrontmatterError::MissingOpeningDelimiter)?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let body = &rest[offset + line.len()..];
            let body = body
                .strip_prefix("\r\n")
                .or_else(|| body.strip_prefix('\n'))
                .unwrap_or(body);
            return Ok((&rest[..offset], body));
        }
        offset += line.len();
    }
    Err(FrontmatterError::MissingClosingDelimiter)
}

/// Parse a document into its frontmatter mapping and body.
pub fn parse(content: &str) -> Result<Document, FrontmatterError> {
    let (yaml, body) = split(content)?;
    let frontmatter = if yaml.trim().is_empty() {
        Mapping::new()
    } else {
        match serde_yaml::from_str::<Value>(yaml)? {
            Value::Mapping(map) => map,
            Value::Null => Mapping::new(),
            _ => return Err(FrontmatterError::NotAMapping),
        }
    };
    Ok(Document {
        frontmatter,
        body: body.to_string(),
    })
}

/// Render a frontmatter mapping and body back into file content.
pub fn render(frontmatter: &Mapping, body: &str) -> Result<String, FrontmatterError> {
    let yaml = if frontmatter.is_empty() {
        String::new()
    } else {
        serde_yaml::to_string(frontmatter)?
    };
    Ok(format!("---\n{}---\n\n{}", yaml, body))
}

fn to_mapping<T: Serialize>(value: &T) -> Result<Mapping, FrontmatterError> {
    match serde_yaml::to_value(value)? {
        Value::Mapping(map) => Ok(map),
        _ => Err(FrontmatterError::NotAMapping),
    }
}

/// Build a typed item from a frontmatter mapping.
///
/// The kind comes from the caller (the directory the file lives in).
pub fn decode_item(kind: ItemKind, doc: Document, path: &Path) -> Result<Item, FrontmatterError> {
    let value = Value::Mapping(doc.frontmatter);
    let header: ItemHeader = serde_yaml::from_value(value.clone())?;
    let detail = match kind {
        ItemKind::Epic => ItemDetail::Epic(serde_yaml::from_value(value)?),
        ItemKind::Issue => ItemDetail::Issue(serde_yaml::from_value(value)?),
        ItemKind::Task => ItemDetail::Task(serde_yaml::from_value(value)?),
        ItemKind::Pr => ItemDetail::Pr(serde_yaml::from_value(value)?),
    };
    Ok(Item {
        header,
        detail,
        file_path: path.to_path_buf(),
        body: doc.body,
    })
}

/// Flatten an item's header and detail into one frontmatter mapping.
pub fn encode_frontmatter(item: &Item) -> Result<Mapping, FrontmatterError> {
    let mut map = to_mapping(&item.header)?;
    let detail = match &item.detail {
        ItemDetail::Epic(d) => to_mapping(d)?,
        ItemDetail::Issue(d) => to_mapping(d)?,
        ItemDetail::Task(d) => to_mapping(d)?,
        ItemDetail::Pr(d) => to_mapping(d)?,
    };
    map.extend(detail);
    Ok(map)
}

/// Render an item to file content.
pub fn encode_item(item: &Item) -> Result<String, FrontmatterError> {
    render(&encode_frontmatter(item)?, &item.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrStatus, Status};

    #[test]
    fn test_parse_document() {
        let doc = parse("---\nid: EP-0001\ntitle: Launch\n---\n\n# Notes\nbody\n").unwrap();
        assert_eq!(doc.frontmatter.get("id").and_then(Value::as_str), Some("EP-0001"));
        assert_eq!(doc.body, "# Notes\nbody\n");
    }

    #[test]
    fn test_parse_crlf() {
        let doc = parse("---\r\nid: EP-0001\r\n---\r\nbody").unwrap();
        assert_eq!(doc.frontmatter.get("id").and_then(Value::as_str), Some("EP-0001"));
        assert_eq!(doc.body, "body");
    }

    #[test]
    fn test_missing_delimiters() {
        assert_eq!(parse("id: x\n"), Err(FrontmatterError::MissingOpeningDelimiter));
        assert_eq!(parse("---\nid: x\n"), Err(FrontmatterError::MissingClosingDelimiter));
    }

    #[test]
    fn test_non_mapping_rejected() {
        assert_eq!(parse("---\n- a\n- b\n---\n"), Err(FrontmatterError::NotAMapping));
    }

    #[test]
    fn test_decode_task_with_flat_status() {
        let doc = parse("---\nid: TSK-0001\ntitle: Write docs\nstatus: in-progress\nissue_id: ISS-0002\nupdated_date: 2025-01-05\n---\n").unwrap();
        let item = decode_item(ItemKind::Task, doc, Path::new("t.md")).unwrap();
        match &item.detail {
            ItemDetail::Task(t) => {
                assert_eq!(t.status, Status::InProgress);
                assert_eq!(t.issue_id, "ISS-0002");
            }
            other => panic!("unexpected detail {:?}", other),
        }
        assert_eq!(item.header.updated_date.to_rfc3339(), "2025-01-05T00:00:00+00:00");
    }

    #[test]
    fn test_decode_pr_status_alias() {
        let doc = parse("---\nid: PR-0001\ntitle: Add login\nstatus: merged\n---\n").unwrap();
        let item = decode_item(ItemKind::Pr, doc, Path::new("p.md")).unwrap();
        assert!(matches!(&item.detail, ItemDetail::Pr(d) if d.pr_status == PrStatus::Merged));
    }

    #[test]
    fn test_encode_has_no_kind_key() {
        let doc = parse("---\nid: ISS-0001\ntitle: Login\nepic_id: EP-0001\n---\nBody\n").unwrap();
        let item = decode_item(ItemKind::Issue, doc, Path::new("i.md")).unwrap();
        let map = encode_frontmatter(&item).unwrap();
        assert!(map.get("kind").is_none());
        assert_eq!(map.get("epic_id").and_then(Value::as_str), Some("EP-0001"));

        let again = decode_item(ItemKind::Issue, parse(&encode_item(&item).unwrap()).unwrap(), Path::new("i.md")).unwrap();
        assert_eq!(again, item);
    }
}
