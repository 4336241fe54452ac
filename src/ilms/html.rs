//! Markup extraction helpers for iLMS pages.
//!
//! iLMS pages are server-rendered, table-based and stable, so a handful of
//! anchored regular expressions is enough to pull out rows, links and the
//! main content block.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::SiteError;
use crate::util::compile_static_regex;

static NO_PERMISSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r##"(?is)<div[^>]*style\s*=\s*"[^"]*color:\s*#F00;[^"]*"[^>]*>\s*((?:權限不足!|No Permission!)[^<]*)"##,
    )
});
static MAIN_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)<div\b[^>]*\bid\s*=\s*["']main["'][^>]*>"#)
});
static TABLE_BOX_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)<div\b[^>]*\bclass\s*=\s*["']tableBox["'][^>]*>"#)
});
static DIV_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)<(/?)div\b[^>]*>"));
static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<script\b.*?</script>"));
static INFO_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<div\b[^>]*\bclass\s*=\s*["']infoPath["'][^>]*>.*?</div>"#)
});
static TOOL_WRAPPER_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<span\b[^>]*\bclass\s*=\s*["']toolWrapper["'][^>]*>.*?</span>"#)
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?s)<[^>]*>"));
static ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<tr\b([^>]*)>(.*?)</tr>"));
static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<td\b([^>]*)>(.*?)</td>"));
static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<a\b([^>]*)>(.*?)</a>"));
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
});
static PAGE_SPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)<span\b[^>]*\bclass\s*=\s*["']page["'][^>]*>"#)
});
static BARE_NOTICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?is)<body\b[^>]*>\s*<div>\s*([^<]+?)\s*</div>")
});
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);"));

/// Path of the attachment download endpoint.
pub const ATTACHMENT_PATH: &str = "/sys/read_attach.php";

/// An `<a>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// `href` attribute, entity-decoded.
    pub href: String,
    /// Text content with tags removed.
    pub text: String,
    /// `title` attribute, if any.
    pub title: Option<String>,
}

/// A `<tr>` element.
#[derive(Debug, Clone)]
pub struct Row {
    attrs: HashMap<String, String>,
    cell_classes: Vec<Option<String>>,
    /// Inner markup of each `<td>`.
    pub cells: Vec<String>,
}

impl Row {
    /// `class` attribute, if any.
    #[must_use]
    pub fn class(&self) -> Option<&str> {
        self.attrs.get("class").map(String::as_str)
    }

    /// A data row carries a class other than `header`. Rows without a class
    /// are layout rows.
    #[must_use]
    pub fn is_data(&self) -> bool {
        self.class().is_some_and(|class| class != "header")
    }

    /// Returns true for the header row.
    #[must_use]
    pub fn is_header(&self) -> bool {
        self.class() == Some("header")
    }

    /// `class` attribute of the `i`th cell.
    #[must_use]
    pub fn cell_class(&self, i: usize) -> Option<&str> {
        self.cell_classes.get(i)?.as_deref()
    }
}

/// Parses the attributes of a start tag.
#[must_use]
pub fn attributes(tag: &str) -> HashMap<String, String> {
    ATTR_RE
        .captures_iter(tag)
        .map(|caps| {
            let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            (caps[1].to_ascii_lowercase(), decode_entities(value))
        })
        .collect()
}

/// Text content of a fragment: tags removed, entities decoded, trimmed.
#[must_use]
pub fn text(fragment: &str) -> String {
    decode_entities(&TAG_RE.replace_all(fragment, ""))
        .trim()
        .to_string()
}

/// Decodes the common named and all numeric character references.
#[must_use]
pub fn decode_entities(raw: &str) -> String {
    ENTITY_RE
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Every `<a>` in the fragment, in document order.
#[must_use]
pub fn links(fragment: &str) -> Vec<Link> {
    ANCHOR_RE
        .captures_iter(fragment)
        .map(|caps| {
            let attrs = attributes(&caps[1]);
            Link {
                href: attrs.get("href").cloned().unwrap_or_default(),
                title: attrs.get("title").cloned(),
                text: text(&caps[2]),
            }
        })
        .collect()
}

/// Every `<tr>` in the fragment.
#[must_use]
pub fn rows(fragment: &str) -> Vec<Row> {
    ROW_RE
        .captures_iter(fragment)
        .map(|caps| {
            let (cell_classes, cells) = CELL_RE
                .captures_iter(&caps[2])
                .map(|cell| (attributes(&cell[1]).remove("class"), cell[2].to_string()))
                .unzip();
            Row {
                attrs: attributes(&caps[1]),
                cell_classes,
                cells,
            }
        })
        .collect()
}

/// Value of query parameter `key` in a possibly relative `href`.
#[must_use]
pub fn query_param(href: &str, key: &str) -> Option<String> {
    let base = Url::parse("http://localhost/").ok()?;
    let url = base.join(href).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Like [`query_param`], parsed as an integer.
#[must_use]
pub fn query_id(href: &str, key: &str) -> Option<i64> {
    query_param(href, key)?.trim().parse().ok()
}

/// Fails with [`SiteError::NoPermission`] if the page shows the red notice.
///
/// # Errors
///
/// See above.
pub fn check_permission(url: &str, html: &str) -> Result<(), SiteError> {
    match NO_PERMISSION_RE.captures(html) {
        Some(caps) => Err(SiteError::NoPermission {
            url: url.to_string(),
            message: text(&caps[1]),
        }),
        None => Ok(()),
    }
}

/// The text of a page that consists of a bare notice `<div>`, if it is one.
#[must_use]
pub fn bare_notice(html: &str) -> Option<String> {
    BARE_NOTICE_RE.captures(html).map(|caps| text(&caps[1]))
}

/// Markup of the element starting at `start`, up to its matching `</div>`.
fn div_element(html: &str, start: usize) -> &str {
    let mut depth = 0usize;
    for caps in DIV_TAG_RE.captures_iter(&html[start..]) {
        if caps[1].is_empty() {
            depth += 1;
        } else {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                if let Some(whole) = caps.get(0) {
                    return &html[start..start + whole.end()];
                }
            }
        }
    }
    &html[start..]
}

/// Extracts the `<div id="main">` block with navigation and scripts removed.
///
/// # Errors
///
/// Returns [`SiteError::NoPermission`] for the permission notice and
/// [`SiteError::Unavailable`] when the block is missing.
pub fn main_section(url: &str, html: &str) -> Result<String, SiteError> {
    check_permission(url, html)?;
    main_block(html).ok_or_else(|| {
        let mut detail = text(html);
        detail.retain(|c| !c.is_whitespace());
        let detail: String = detail.chars().take(100).collect();
        SiteError::unavailable(url, format!(r#"//div[@id="main"] not found: {detail}"#))
    })
}

/// The `<div id="main">` block with navigation and scripts removed, if the
/// page has one.
#[must_use]
pub fn main_block(html: &str) -> Option<String> {
    let open = MAIN_OPEN_RE.find(html)?;
    // Scripts go first: their bodies may contain unbalanced div markup.
    let rest = SCRIPT_RE.replace_all(&html[open.start()..], "");
    let main = div_element(&rest, 0);
    Some(INFO_PATH_RE.replace_all(main, "").into_owned())
}

/// Path component of a possibly relative `href`.
#[must_use]
pub fn href_path(href: &str) -> Option<String> {
    let base = Url::parse("http://localhost/").ok()?;
    Some(base.join(href).ok()?.path().to_string())
}

/// Removes the edit/delete toolbars from homework pages.
#[must_use]
pub fn strip_tool_wrappers(html: &str) -> String {
    TOOL_WRAPPER_RE.replace_all(html, "").into_owned()
}

/// Rows of the first `tableBox` table.
#[must_use]
pub fn table_box_rows(html: &str) -> Vec<Row> {
    match TABLE_BOX_RE.find(html) {
        Some(open) => rows(div_element(html, open.start())),
        None => Vec::new(),
    }
}

/// Returns true if the `tableBox` table shows the single "No Data" cell.
#[must_use]
pub fn table_is_empty(html: &str) -> bool {
    table_box_rows(html)
        .get(1)
        .is_some_and(|row| row.cells.len() == 1)
}

/// The page number the pager's "Next" link points to.
#[must_use]
pub fn next_page(html: &str) -> Option<u32> {
    let pager = PAGE_SPAN_RE.find(html)?;
    let link = links(&html[pager.start()..])
        .into_iter()
        .find(|link| link.text == "Next")?;
    query_param(&link.href, "page")?.parse().ok()
}

/// Attachment `(id, title)` pairs linked from a fragment.
///
/// Links without visible text are ignored and repeated ids are collapsed.
/// The title comes from the `title` attribute, falling back to the text.
#[must_use]
pub fn attachment_links(fragment: &str) -> Vec<(i64, String)> {
    let mut seen = std::collections::HashSet::new();
    links(fragment)
        .into_iter()
        .filter(|link| {
            href_path(&link.href).as_deref() == Some(ATTACHMENT_PATH) && !link.text.is_empty()
        })
        .filter_map(|link| {
            let id = query_id(&link.href, "id")?;
            seen.insert(id)
                .then(|| (id, link.title.unwrap_or(link.text)))
        })
        .collect()
}
