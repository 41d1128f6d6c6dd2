//! Prompt context and citation rendering.
//!
//! The two functions number their entries independently: the sources block
//! deduplicates while the context block does not, so "Source 3" in the prompt
//! may not be citation 3 in the rendered list.

use std::collections::HashSet;

use super::hit::Hit;

pub const NO_CONTEXT_PLACEHOLDER: &str = "No relevant context found.";
pub const MAX_CONTEXT_SOURCES: usize = 5;
pub const MAX_CITATIONS: usize = 5;
const DEFAULT_CATEGORY: &str = "Orientation";
const MAX_DISPLAY_URL_CHARS: usize = 80;

pub fn format_context(hits: &[Hit]) -> String {
    if hits.is_empty() {
        return NO_CONTEXT_PLACEHOLDER.to_string();
    }

    hits.iter()
        .take(MAX_CONTEXT_SOURCES)
        .enumerate()
        .map(|(index, hit)| {
            let meta = &hit.metadata;
            let title = first_present(&[&meta.section_title, &meta.title, &meta.filename])
                .unwrap_or("Section");
            format!("Source {}: {}\n{}", index + 1, title, hit.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Numbered markdown citations, one per distinct `(title, canonical_url)`.
pub fn build_sources_block(hits: &[Hit]) -> String {
    let mut lines = Vec::new();
    let mut seen: HashSet<(&str, &str)> = HashSet::new();

    for hit in hits {
        if lines.len() >= MAX_CITATIONS {
            break;
        }
        let meta = &hit.metadata;
        let title = first_present(&[&meta.section_title, &meta.filename]).unwrap_or("Untitled");
        let canonical = meta.canonical_url.as_deref().map(str::trim).unwrap_or("");
        if !seen.insert((title, canonical)) {
            continue;
        }

        let number = lines.len() + 1;
        let category = first_present(&[&meta.category]).unwrap_or(DEFAULT_CATEGORY);
        let suffix = match first_present(&[&meta.filename]) {
            Some(file) => format!(" · {}", file),
            None => String::new(),
        };

        let line = if canonical.is_empty() {
            format!("{}. {} — {}{}", number, title, category, suffix)
        } else {
            let mut line = format!("{}. [{}]({}) — {}{}", number, title, canonical, category, suffix);
            if let Some(display) = short_url(canonical) {
                line.push_str("\n    ↳ ");
                line.push_str(&display);
            }
            line
        };
        lines.push(line);
    }

    lines.join("\n")
}

/// Host and path without scheme or trailing slash, capped for display.
pub fn short_url(url: &str) -> Option<String> {
    if !url.starts_with("http") {
        return None;
    }
    let without_scheme = url.split_once("://").map(|(_, rest)| rest)?;
    let end = without_scheme
        .find(|c| c == '?' || c == '#')
        .unwrap_or(without_scheme.len());
    let without_userinfo = match without_scheme[..end].split_once('/') {
        Some((authority, path)) => format!("{}/{}", strip_userinfo(authority), path),
        None => strip_userinfo(&without_scheme[..end]).to_string(),
    };
    let display = without_userinfo.trim_end_matches('/');
    if display.is_empty() {
        return None;
    }
    if display.chars().count() <= MAX_DISPLAY_URL_CHARS {
        return Some(display.to_string());
    }
    let mut truncated: String = display.chars().take(MAX_DISPLAY_URL_CHARS - 3).collect();
    truncated.push('…');
    Some(truncated)
}

fn strip_userinfo(authority: &str) -> &str {
    authority.rsplit_once('@').map(|(_, host)| host).unwrap_or(authority)
}

fn first_present<'a>(candidates: &[&'a Option<String>]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|value| value.as_deref())
        .find(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::hit::HitMetadata;

    fn hit(title: &str, canonical: Option<&str>) -> Hit {
        Hit::new(
            format!("{} body", title),
            HitMetadata {
                section_title: Some(title.to_string()),
                canonical_url: canonical.map(str::to_string),
                ..Default::default()
            },
            Some(0.5),
        )
    }

    #[test]
    fn empty_hits_use_placeholder_and_no_sources() {
        assert_eq!(format_context(&[]), NO_CONTEXT_PLACEHOLDER);
        assert_eq!(build_sources_block(&[]), "");
    }

    #[test]
    fn context_references_at_most_five_sources() {
        let hits: Vec<Hit> = (0..9).map(|i| hit(&format!("T{}", i), None)).collect();
        let context = format_context(&hits);
        assert_eq!(context.matches("Source ").count(), 5);
        assert!(context.starts_with("Source 1: T0\nT0 body"));
        assert!(!context.contains("T5"));
        assert_eq!(context.matches("\n\n---\n\n").count(), 4);
    }

    #[test]
    fn context_title_falls_back_through_metadata() {
        let mut titled = Hit::new("a", HitMetadata::default(), None);
        titled.metadata.title = Some("Plain title".into());
        titled.metadata.filename = Some("f.md".into());
        let by_file = Hit::new(
            "b",
            HitMetadata {
                filename: Some("notes.md".into()),
                ..Default::default()
            },
            None,
        );
        let bare = Hit::new("c", HitMetadata::default(), None);

        let context = format_context(&[titled, by_file, bare]);
        assert!(context.contains("Source 1: Plain title\na"));
        assert!(context.contains("Source 2: notes.md\nb"));
        assert!(context.contains("Source 3: Section\nc"));
    }

    #[test]
    fn duplicate_title_and_url_collapse_to_one_citation() {
        let hits = vec![
            hit("Transportation", Some("https://example.edu/transport")),
            hit("Transportation", Some("https://example.edu/transport")),
            hit("Housing", None),
        ];
        let block = build_sources_block(&hits);
        assert_eq!(
            block,
            "1. [Transportation](https://example.edu/transport) — Orientation\n    \
             ↳ example.edu/transport\n2. Housing — Orientation"
        );
    }

    #[test]
    fn citations_are_capped_at_five() {
        let hits: Vec<Hit> = (0..8).map(|i| hit(&format!("T{}", i), None)).collect();
        let block = build_sources_block(&hits);
        assert_eq!(block.lines().count(), 5);
        assert!(block.ends_with("5. T4 — Orientation"));
    }

    #[test]
    fn citation_uses_category_and_filename_suffix() {
        let hits = vec![Hit::new(
            "x",
            HitMetadata {
                filename: Some("registrar.pdf".into()),
                category: Some("Registrar".into()),
                ..Default::default()
            },
            None,
        )];
        assert_eq!(
            build_sources_block(&hits),
            "1. registrar.pdf — Registrar · registrar.pdf"
        );
    }

    #[test]
    fn short_url_strips_scheme_and_truncates() {
        assert_eq!(
            short_url("https://www.usf.edu/orientation/").as_deref(),
            Some("www.usf.edu/orientation")
        );
        assert_eq!(short_url("ftp://files.usf.edu"), None);
        assert_eq!(
            short_url("https://usf.edu/a?utm=1").as_deref(),
            Some("usf.edu/a")
        );

        let long = format!("https://usf.edu/{}", "p".repeat(120));
        let display = short_url(&long).unwrap();
        assert_eq!(display.chars().count(), 78);
        assert!(display.ends_with('…'));
    }
}
