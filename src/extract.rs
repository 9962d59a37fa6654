use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

// ── Lazy static regexes ──────────────────────────────────────────────────────

static INLINE_IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[[^\]]*\]\(([^)]+)\)").unwrap());

static HTML_IMG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["'][^>]*>"#).unwrap());

static GITHUB_ASSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https://github\.com/[^/\s]+/[^/\s]+/assets/[^\s)"'<>\]]+"#).unwrap()
});

static GITHUB_ATTACHMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https://github\.com/user-attachments/assets/[^\s)"'<>\]]+"#).unwrap()
});

static GITHUB_USER_CONTENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https://[^/\s]*githubusercontent\.com/[^\s)"'<>\]]+"#).unwrap()
});

static HTTP_IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)https?://[^\s)"'<>\]]+(?:\.(?:png|jpg|jpeg|gif|webp|svg|bmp|tiff)|/(?:images?|img|assets|uploads)/[^\s)"'<>\]]+)"#,
    )
    .unwrap()
});

static REFERENCE_DEF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\[([^\]]+)\]:\s*(\S+)").unwrap());

static REFERENCE_USE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[[^\]]*\]\[([^\]]+)\]").unwrap());

// ── Public API ───────────────────────────────────────────────────────────────

/// Collects candidate image URLs from an issue or comment body.
///
/// The markdown parse runs first and is exact; a battery of tolerant regexes
/// then re-scans the raw text so malformed markdown still yields its images.
/// The regex layer does not know about code spans or fenced blocks, so URLs
/// written inside code are returned too. Admission is decided later by the
/// downloader's content-type check, not here.
///
/// The result has no duplicates and keeps first-occurrence order.
pub fn extract_image_urls(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }

    let mut urls = extract_structural(content);
    urls.extend(extract_with_patterns(content));
    urls.extend(resolve_reference_images(content));
    dedupe_urls(urls)
}

/// Trims, drops empties and keeps only the first occurrence of each URL.
pub fn dedupe_urls<I>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for url in urls {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            result.push(trimmed.to_string());
        }
    }
    result
}

/// Scheme gate applied to every candidate: `http://`, `https://` or `data:image/`.
///
/// Anything else that carries one of those schemes is kept even without an
/// image extension or a known image host.
pub fn is_image_reference(url: &str) -> bool {
    let lower = url.trim().to_lowercase();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("data:image/")
}

// ── Structural pass ──────────────────────────────────────────────────────────

fn extract_structural(content: &str) -> Vec<String> {
    let mut urls = Vec::new();
    let mut html_block = String::new();

    let options = Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_FOOTNOTES;

    for event in Parser::new_ext(content, options) {
        match event {
            Event::Start(Tag::Image { dest_url, .. }) => {
                let dest = dest_url.trim();
                if !dest.is_empty() && is_image_reference(dest) {
                    urls.push(dest.to_string());
                }
            }
            Event::Html(html) => html_block.push_str(&html),
            Event::End(TagEnd::HtmlBlock) => {
                urls.extend(img_sources_in_html(&html_block));
                html_block.clear();
            }
            Event::InlineHtml(html) => urls.extend(img_sources_in_html(&html)),
            _ => {}
        }
    }

    if !html_block.is_empty() {
        urls.extend(img_sources_in_html(&html_block));
    }
    urls
}

fn img_sources_in_html(html: &str) -> Vec<String> {
    if !html.to_lowercase().contains("<img") {
        return Vec::new();
    }
    let Ok(selector) = Selector::parse("img") else {
        return Vec::new();
    };
    let fragment = Html::parse_fragment(html);
    fragment
        .select(&selector)
        .filter_map(resolve_img_src)
        .filter(|src| is_image_reference(src))
        .collect()
}

fn resolve_img_src(el: ElementRef<'_>) -> Option<String> {
    let v = el.value();

    // Priority: data-src → src → srcset.
    v.attr("data-src")
        .or_else(|| v.attr("src"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            v.attr("srcset")
                .or_else(|| v.attr("data-srcset"))
                .and_then(best_src_from_srcset)
        })
}

fn best_src_from_srcset(srcset: &str) -> Option<String> {
    let mut candidates: Vec<(f64, usize, String)> = Vec::new();

    for (index, part) in srcset.split(',').enumerate() {
        let mut pieces = part.split_whitespace();
        let Some(url) = pieces.next() else {
            continue;
        };
        let score: f64 = pieces
            .next()
            .filter(|desc| desc.ends_with('w') || desc.ends_with('x'))
            .and_then(|desc| desc[..desc.len() - 1].parse().ok())
            .unwrap_or(0.0);
        candidates.push((score, index, url.to_string()));
    }

    candidates.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });
    candidates.pop().map(|(_, _, url)| url)
}

// ── Regex fallback pass ──────────────────────────────────────────────────────

fn extract_with_patterns(content: &str) -> Vec<String> {
    let mut urls = Vec::new();

    for caps in INLINE_IMAGE_RE.captures_iter(content) {
        if let Some(url) = clean_inline_destination(&caps[1]) {
            urls.push(url);
        }
    }

    for caps in HTML_IMG_RE.captures_iter(content) {
        urls.push(caps[1].trim().to_string());
    }

    for pattern in [
        &*GITHUB_ASSET_RE,
        &*GITHUB_ATTACHMENT_RE,
        &*GITHUB_USER_CONTENT_RE,
        &*HTTP_IMAGE_RE,
    ] {
        urls.extend(pattern.find_iter(content).map(|m| m.as_str().to_string()));
    }

    urls.retain(|url| !url.is_empty() && is_image_reference(url));
    urls
}

/// `<url> "title"` → `url`.
fn clean_inline_destination(raw: &str) -> Option<String> {
    let first = raw.split_whitespace().next()?;
    let url = first.trim_start_matches('<').trim_end_matches('>');
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}

// ── Reference-style images ───────────────────────────────────────────────────

fn resolve_reference_images(content: &str) -> Vec<String> {
    let references = extract_references(content);
    if references.is_empty() {
        return Vec::new();
    }

    REFERENCE_USE_RE
        .captures_iter(content)
        .filter_map(|caps| references.get(&caps[1].trim().to_lowercase()))
        .filter(|url| is_image_reference(url))
        .cloned()
        .collect()
}

/// `[key]: url "optional title"` definitions, keyed case-insensitively.
fn extract_references(content: &str) -> HashMap<String, String> {
    let mut references = HashMap::new();

    for line in content.lines() {
        let Some(caps) = REFERENCE_DEF_RE.captures(line) else {
            continue;
        };
        let key = caps[1].trim().to_lowercase();
        let url = caps[2]
            .trim_matches(|c| c == '"' || c == '\'')
            .trim_start_matches('<')
            .trim_end_matches('>');
        if !key.is_empty() && !url.is_empty() {
            references.insert(key, url.to_string());
        }
    }
    references
}
