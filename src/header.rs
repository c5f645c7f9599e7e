//! Header Codec: parsing, rebuilding, and patch-updating the YAML
//! frontmatter header on a job (or plan) file.
//!
//! A job file looks like:
//!
//! ```text
//! ---
//! id: add-oauth
//! type: oneshot
//! status: pending
//! ---
//! Implement OAuth login.
//! ```
//!
//! `Update` is the only path that mutates a file on disk: callers never
//! serialize a whole `Job` back out. Instead they read the current bytes,
//! build a small patch of just the fields that changed, and hand both to
//! `Update`, which preserves every header key it wasn't told to touch.

use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::debug;

const DELIMITER: &str = "---";

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("job file has an opening '---' but no closing '---'")]
    UnterminatedHeader,
    #[error("header region is not a YAML mapping")]
    HeaderNotAMapping,
    #[error("invalid UTF-8 in job file")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("failed to parse header YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// The parsed shape of a job file: its header (if any) and its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    /// `None` means the file had no `---` header region at all; the whole
    /// file is body. `Some(mapping)` means a header region was present
    /// (possibly an empty mapping).
    pub header: Option<Mapping>,
    pub body: String,
}

/// Parse a job file's bytes into its header mapping and body.
///
/// If the file doesn't start with a `---` delimiter line, the entire
/// content is treated as body with no header (`header: None`).
pub fn parse(bytes: &[u8]) -> Result<ParsedFile, HeaderError> {
    debug!(len = bytes.len(), "header::parse: called");
    let text = std::str::from_utf8(bytes)?;

    let Some(after_first) = strip_leading_delimiter(text) else {
        debug!("header::parse: no leading '---', treating whole file as body");
        return Ok(ParsedFile { header: None, body: text.to_string() });
    };

    let Some((header_region, body)) = split_on_closing_delimiter(after_first) else {
        return Err(HeaderError::UnterminatedHeader);
    };

    let header: Value = if header_region.trim().is_empty() {
        Value::Mapping(Mapping::new())
    } else {
        serde_yaml::from_str(header_region)?
    };

    let mapping = match header {
        Value::Mapping(m) => m,
        Value::Null => Mapping::new(),
        _ => return Err(HeaderError::HeaderNotAMapping),
    };

    debug!(keys = mapping.len(), "header::parse: parsed header mapping");
    Ok(ParsedFile { header: Some(mapping), body: body.to_string() })
}

/// Rebuild a job file's bytes from a header and body.
///
/// `header: None` reproduces a headerless file (no delimiters). Re-running
/// `parse` on the output of `rebuild` is idempotent: `rebuild(parse(x))`
/// may reformat an arbitrarily hand-written header into canonical YAML on
/// its first pass, but applying `rebuild`/`parse` again afterward is a
/// no-op.
pub fn rebuild(header: Option<&Mapping>, body: &str) -> Result<String, HeaderError> {
    debug!(has_header = header.is_some(), "header::rebuild: called");
    let Some(header) = header else {
        return Ok(body.to_string());
    };

    let mut out = String::new();
    out.push_str(DELIMITER);
    out.push('\n');
    if !header.is_empty() {
        let yaml = serde_yaml::to_string(&Value::Mapping(header.clone()))?;
        out.push_str(&yaml);
    }
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(body);
    Ok(out)
}

/// Apply a patch of header keys on top of a job file's existing bytes and
/// return the rebuilt file contents.
///
/// Keys present in `patch` overwrite (or add) the corresponding key in the
/// existing header; every other key, and the body, pass through
/// unchanged. If the file had no header at all, one is created holding
/// just `patch`.
///
/// `Update(Update(x, p), q)` is equivalent to `Update(x, merge(p, q))`
/// when `p` and `q` touch disjoint keys, and equivalent to applying `q`
/// last when they overlap (matching ordinary map-merge semantics).
pub fn update(bytes: &[u8], patch: &Mapping) -> Result<String, HeaderError> {
    debug!(patch_keys = patch.len(), "header::update: called");
    let ParsedFile { header, body } = parse(bytes)?;
    let mut header = header.unwrap_or_default();
    for (k, v) in patch {
        header.insert(k.clone(), v.clone());
    }
    rebuild(Some(&header), &body)
}

fn strip_leading_delimiter(text: &str) -> Option<&str> {
    let trimmed_start = text.strip_prefix(DELIMITER)?;
    // the delimiter line must be exactly "---" (optionally with a
    // trailing newline), not e.g. "----" or "--- foo"
    let rest = trimmed_start.strip_prefix('\n').or_else(|| trimmed_start.strip_prefix("\r\n"))?;
    Some(rest)
}

/// Find the next line that is exactly `---` and split the text there,
/// returning (header_region, body_after_that_line).
fn split_on_closing_delimiter(text: &str) -> Option<(&str, &str)> {
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed == DELIMITER {
            let header_region = &text[..offset];
            let body_start = offset + line.len();
            return Some((header_region, &text[body_start..]));
        }
        offset += line.len();
    }
    None
}

/// Convenience: build a single-key-at-a-time patch mapping.
pub fn patch_of<const N: usize>(pairs: [(&str, Value); N]) -> Mapping {
    let mut m = Mapping::new();
    for (k, v) in pairs {
        m.insert(Value::String(k.to_string()), v);
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = "---\nid: add-oauth\ntype: oneshot\nstatus: pending\n---\nImplement OAuth login.\n";

    #[test]
    fn parse_splits_header_and_body() {
        let parsed = parse(JOB.as_bytes()).unwrap();
        let header = parsed.header.unwrap();
        assert_eq!(header.get("id").unwrap().as_str(), Some("add-oauth"));
        assert_eq!(header.get("status").unwrap().as_str(), Some("pending"));
        assert_eq!(parsed.body, "Implement OAuth login.\n");
    }

    #[test]
    fn parse_headerless_file_is_all_body() {
        let parsed = parse(b"just some notes, no header").unwrap();
        assert!(parsed.header.is_none());
        assert_eq!(parsed.body, "just some notes, no header");
    }

    #[test]
    fn parse_rejects_unterminated_header() {
        let err = parse(b"---\nid: x\nno closing delimiter\n").unwrap_err();
        assert!(matches!(err, HeaderError::UnterminatedHeader));
    }

    #[test]
    fn parse_rejects_non_mapping_header() {
        let err = parse(b"---\n- one\n- two\n---\nbody\n").unwrap_err();
        assert!(matches!(err, HeaderError::HeaderNotAMapping));
    }

    #[test]
    fn parse_allows_empty_header_region() {
        let parsed = parse(b"---\n---\nbody\n").unwrap();
        assert_eq!(parsed.header.unwrap().len(), 0);
        assert_eq!(parsed.body, "body\n");
    }

    #[test]
    fn rebuild_then_parse_is_idempotent() {
        let parsed = parse(JOB.as_bytes()).unwrap();
        let rebuilt_once = rebuild(parsed.header.as_ref(), &parsed.body).unwrap();
        let reparsed = parse(rebuilt_once.as_bytes()).unwrap();
        let rebuilt_twice = rebuild(reparsed.header.as_ref(), &reparsed.body).unwrap();
        assert_eq!(rebuilt_once, rebuilt_twice);
    }

    #[test]
    fn rebuild_headerless_round_trips_exactly() {
        let body = "no header here\njust text\n";
        let parsed = parse(body.as_bytes()).unwrap();
        let rebuilt = rebuild(parsed.header.as_ref(), &parsed.body).unwrap();
        assert_eq!(rebuilt, body);
    }

    #[test]
    fn update_overwrites_only_named_keys() {
        let patch = patch_of([("status", Value::String("completed".into()))]);
        let updated = update(JOB.as_bytes(), &patch).unwrap();
        let parsed = parse(updated.as_bytes()).unwrap();
        let header = parsed.header.unwrap();
        assert_eq!(header.get("status").unwrap().as_str(), Some("completed"));
        // untouched keys survive
        assert_eq!(header.get("id").unwrap().as_str(), Some("add-oauth"));
        assert_eq!(header.get("type").unwrap().as_str(), Some("oneshot"));
        assert_eq!(parsed.body, "Implement OAuth login.\n");
    }

    #[test]
    fn update_preserves_unknown_keys() {
        let with_unknown = "---\nid: x\nstatus: pending\nx-custom-field: keep-me\n---\nbody\n";
        let patch = patch_of([("status", Value::String("running".into()))]);
        let updated = update(with_unknown.as_bytes(), &patch).unwrap();
        let parsed = parse(updated.as_bytes()).unwrap();
        let header = parsed.header.unwrap();
        assert_eq!(header.get("x-custom-field").unwrap().as_str(), Some("keep-me"));
        assert_eq!(header.get("status").unwrap().as_str(), Some("running"));
    }

    #[test]
    fn update_on_headerless_file_creates_header() {
        let patch = patch_of([("status", Value::String("pending".into()))]);
        let updated = update(b"just a note", &patch).unwrap();
        let parsed = parse(updated.as_bytes()).unwrap();
        assert_eq!(parsed.header.unwrap().get("status").unwrap().as_str(), Some("pending"));
        assert_eq!(parsed.body, "just a note");
    }

    #[test]
    fn sequential_updates_compose_like_a_merge() {
        let p1 = patch_of([("status", Value::String("running".into()))]);
        let after_first = update(JOB.as_bytes(), &p1).unwrap();
        let p2 = patch_of([("status", Value::String("completed".into())), ("commit_sha", Value::String("abc123".into()))]);
        let after_second = update(after_first.as_bytes(), &p2).unwrap();

        let merged = patch_of([
            ("status", Value::String("completed".into())),
            ("commit_sha", Value::String("abc123".into())),
        ]);
        let direct = update(JOB.as_bytes(), &merged).unwrap();

        let a = parse(after_second.as_bytes()).unwrap();
        let b = parse(direct.as_bytes()).unwrap();
        assert_eq!(a.header, b.header);
        assert_eq!(a.body, b.body);
    }
}
