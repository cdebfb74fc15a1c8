//! Self-contained documents
//!
//! Rewrites same-bundle references in an HTML document so it needs nothing
//! outside itself:
//!
//! - `<script src="x.js"></script>` becomes an inline `<script>`
//! - `<link rel="stylesheet" href="x.css">` becomes a `<style>` block
//! - `<img src="x.png">` gets a `data:` URI
//!
//! References with a scheme, protocol-relative URLs, fragments and paths that
//! are not in the bundle are left untouched.

use std::collections::HashMap;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::{Captures, Regex};

use crate::bundle::mime::mime_type_of;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("invalid rewrite pattern: {0}")]
    Pattern(String),
}

struct Patterns {
    script: Regex,
    link: Regex,
    img: Regex,
    rel_stylesheet: Regex,
    href: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            script: Regex::new(
                r#"(?is)<script\b([^>]*?)\s+src\s*=\s*["']([^"']+)["']([^>]*)>\s*</script\s*>"#,
            )?,
            link: Regex::new(r#"(?is)<link\b[^>]*>"#)?,
            img: Regex::new(r#"(?is)(<img\b[^>]*?\ssrc\s*=\s*)(["'])([^"']+)(["'])"#)?,
            rel_stylesheet: Regex::new(r#"(?i)\srel\s*=\s*["']?stylesheet["']?"#)?,
            href: Regex::new(r#"(?i)\shref\s*=\s*["']([^"']+)["']"#)?,
        })
    }
}

fn patterns() -> Result<&'static Patterns, RenderError> {
    static PATTERNS: OnceLock<Result<Patterns, regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(Patterns::compile)
        .as_ref()
        .map_err(|e| RenderError::Pattern(e.to_string()))
}

/// Resolve a reference found in `document_path` to a bundle path.
///
/// Returns `None` for external references and paths escaping the bundle.
pub fn resolve_reference(document_path: &str, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty()
        || reference.starts_with('#')
        || reference.starts_with("//")
        || reference.contains("://")
        || reference.starts_with("data:")
        || reference.starts_with("javascript:")
        || reference.starts_with("mailto:")
    {
        return None;
    }

    // drop query and fragment
    let reference = reference
        .split(['?', '#'])
        .next()
        .unwrap_or(reference);

    let mut segments: Vec<&str> = if reference.starts_with('/') {
        Vec::new()
    } else {
        let mut base: Vec<&str> = document_path.split('/').collect();
        base.pop();
        base
    };

    for segment in reference.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

fn data_uri(path: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type_of(path), STANDARD.encode(bytes))
}

/// Inline same-bundle scripts, stylesheets and images into `html`
pub fn inline_document(
    document_path: &str,
    html: &str,
    files: &HashMap<String, Vec<u8>>,
) -> Result<String, RenderError> {
    let p = patterns()?;
    let lookup = |reference: &str| {
        resolve_reference(document_path, reference)
            .and_then(|path| files.get(&path).map(|bytes| (path, bytes)))
    };

    let html = p.script.replace_all(html, |caps: &Captures| match lookup(&caps[2]) {
        Some((_, bytes)) => {
            let code = String::from_utf8_lossy(bytes).replace("</script", "<\\/script");
            format!("<script{}{}>{}</script>", &caps[1], &caps[3], code)
        }
        None => caps[0].to_string(),
    });

    let html = p.link.replace_all(&html, |caps: &Captures| {
        let tag = &caps[0];
        if !p.rel_stylesheet.is_match(tag) {
            return tag.to_string();
        }
        let inlined = p
            .href
            .captures(tag)
            .and_then(|href| lookup(&href[1]));
        match inlined {
            Some((_, bytes)) => {
                let css = String::from_utf8_lossy(bytes).replace("</style", "<\\/style");
                format!("<style>{}</style>", css)
            }
            None => tag.to_string(),
        }
    });

    let html = p.img.replace_all(&html, |caps: &Captures| match lookup(&caps[3]) {
        Some((path, bytes)) => format!("{}{}{}{}", &caps[1], &caps[2], data_uri(&path, bytes), &caps[4]),
        None => caps[0].to_string(),
    });

    Ok(html.into_owned())
}
