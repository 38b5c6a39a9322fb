//! Content transformation to clean up Wayback Machine artifacts
//!
//! Archived pages come back wrapped in the archive's own chrome: a
//! toolbar, injected scripts, and rewritten URLs pointing back at
//! web.archive.org. This module strips all of that so pages render as
//! they did on the original origin. The transform is pure and idempotent;
//! it runs once before a response enters the cache.

use std::sync::LazyLock;

use regex::Regex;

/// The archive's toolbar block, delimited by literal comment markers
static RE_TOOLBAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<!-- BEGIN WAYBACK TOOLBAR INSERT -->.*?<!-- END WAYBACK TOOLBAR INSERT -->",
    )
    .expect("toolbar regex")
});

/// Trailing "FILE ARCHIVED ON ..." footer comment through end of document
static RE_ARCHIVE_FOOTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--\s*FILE ARCHIVED ON.*$").expect("footer regex"));

/// The block of rewrite includes the archive prepends before the toolbar
static RE_REWRITE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)(?:<!-- is_embed=True -->\r?\n?)?<script (?:type="text/javascript" )?src="[^"]*/_static/js/.*?<!-- End Wayback Rewrite JS Include -->\r?\n?"#,
    )
    .expect("rewrite block regex")
});

/// Any remaining individual `_static/js` script include
static RE_STATIC_SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script[^>]*src="[^"]*/_static/js/[^"]*"[^>]*>.*?</script>"#)
        .expect("static script regex")
});

/// Inline scripts touching the archive's `__wm` runtime
static RE_WM_SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?__wm\..*?</script>").expect("wm script regex")
});

/// wombat.js client-side rewriter includes
static RE_WOMBAT_SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script[^>]*src="[^"]*wombat\.js[^"]*"[^>]*>.*?</script>"#)
        .expect("wombat regex")
});

/// Injected web-static.archive.org stylesheets
static RE_STATIC_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<link[^>]*href="[^"]*web-static\.archive\.org[^"]*"[^>]*/?\s*>"#)
        .expect("static link regex")
});

/// Stray "End Wayback Rewrite JS Include" comments
static RE_REWRITE_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<!--\s*End Wayback Rewrite JS Include\s*-->\r?\n?").expect("comment regex")
});

/// `<base href>` pointing into the archive
static RE_BASE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(<base\s+[^>]*href=["']?)(?:https?:)?//web\.archive\.org/web/\d+[a-z_]*/(?:https?://)?"#,
    )
    .expect("base tag regex")
});

/// Absolute archive prefixes anywhere in the document
static RE_ABSOLUTE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?:)?//web\.archive\.org/web/\d+[a-z_]*/").expect("absolute prefix regex")
});

/// Relative `/web/{timestamp}/` prefixes left by the archive's rewriter
static RE_RELATIVE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/web/\d+[a-z_]*/(?:https?://)?").expect("relative prefix regex"));

/// Doubled protocols left over after prefix stripping
static RE_DOUBLE_HTTP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"http://https?://").expect("double http regex"));
static RE_DOUBLE_HTTPS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://https?://").expect("double https regex"));

/// Archive prefixes inside CSS `url(...)` references
static RE_CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(["']?(?:https?:)?//web\.archive\.org/web/\d+[a-z_]*/([^)"']+)["']?\)"#)
        .expect("css url regex")
});

/// Archive prefixes inside CSS `@import` statements
static RE_CSS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"@import\s+(?:url\s*\()?\s*["']?(?:https?:)?//web\.archive\.org/web/\d+[a-z_]*/([^"')\s]+)["']?\s*\)?"#,
    )
    .expect("css import regex")
});

/// Relative archive prefixes inside CSS `url(...)`
static RE_CSS_RELATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(["']?/web/\d+[a-z_]*/(?:https?://)?([^)"']+)["']?\)"#)
        .expect("css relative regex")
});

/// Opening `<body>` tag, for header-bar injection
static RE_BODY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<body[^>]*>").expect("body tag regex"));

/// Configurable, pure transformer over archived bodies
#[derive(Debug, Clone)]
pub struct ContentTransformer {
    pub remove_toolbar: bool,
    pub remove_scripts: bool,
    pub fix_base_tags: bool,
    pub fix_asset_urls: bool,
    pub normalize_links: bool,
}

impl Default for ContentTransformer {
    fn default() -> Self {
        Self {
            remove_toolbar: true,
            remove_scripts: true,
            fix_base_tags: true,
            fix_asset_urls: true,
            normalize_links: true,
        }
    }
}

impl ContentTransformer {
    /// Transform a body according to its content type.
    ///
    /// HTML and CSS are cleaned; everything else passes through
    /// unchanged.
    #[must_use]
    pub fn transform(&self, body: &[u8], content_type: &str) -> Vec<u8> {
        if content_type.contains("html") {
            self.transform_html(body)
        } else if content_type.contains("css") {
            self.transform_css(body)
        } else {
            body.to_vec()
        }
    }

    fn transform_html(&self, body: &[u8]) -> Vec<u8> {
        let mut html = String::from_utf8_lossy(body).into_owned();

        if self.remove_toolbar {
            html = RE_TOOLBAR.replace_all(&html, "").into_owned();
            html = RE_ARCHIVE_FOOTER.replace_all(&html, "").into_owned();
        }

        if self.remove_scripts {
            // The big prepended block appears once; replace first match only
            html = RE_REWRITE_BLOCK.replace(&html, "").into_owned();
            html = RE_STATIC_SCRIPT.replace_all(&html, "").into_owned();
            html = RE_WM_SCRIPT.replace_all(&html, "").into_owned();
            html = RE_WOMBAT_SCRIPT.replace_all(&html, "").into_owned();
            html = RE_STATIC_LINK.replace_all(&html, "").into_owned();
            html = RE_REWRITE_COMMENT.replace_all(&html, "").into_owned();
        }

        if self.fix_base_tags {
            html = RE_BASE_TAG.replace_all(&html, "${1}http://").into_owned();
        }

        if self.fix_asset_urls {
            html = RE_ABSOLUTE_PREFIX.replace_all(&html, "").into_owned();
            html = RE_RELATIVE_PREFIX.replace_all(&html, "http://").into_owned();
        }

        if self.normalize_links {
            html = RE_DOUBLE_HTTP.replace_all(&html, "http://").into_owned();
            html = RE_DOUBLE_HTTPS.replace_all(&html, "https://").into_owned();
        }

        html.into_bytes()
    }

    fn transform_css(&self, body: &[u8]) -> Vec<u8> {
        if !self.fix_asset_urls {
            return body.to_vec();
        }
        let mut css = String::from_utf8_lossy(body).into_owned();
        css = RE_CSS_URL.replace_all(&css, r#"url("$1")"#).into_owned();
        css = RE_CSS_IMPORT
            .replace_all(&css, r#"@import url("$1")"#)
            .into_owned();
        css = RE_CSS_RELATIVE.replace_all(&css, r#"url("$1")"#).into_owned();
        css.into_bytes()
    }
}

/// Inject a rendered header-bar fragment right after the opening `<body>`
/// tag, or prepend it when no body tag exists.
#[must_use]
pub fn inject_header_bar(body: &[u8], bar_html: &str) -> Vec<u8> {
    let html = String::from_utf8_lossy(body);
    let injected = match RE_BODY_TAG.find(&html) {
        Some(m) => {
            let at = m.end();
            format!("{}\n{}\n{}", &html[..at], bar_html, &html[at..])
        }
        None => format!("{}\n{}", bar_html, html),
    };
    injected.into_bytes()
}
