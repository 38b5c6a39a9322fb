//! Themed error pages and the landing page
//!
//! Templates are plain HTML files with `$variable` placeholders, loaded
//! from a configurable directory at startup: `error.html` is the default
//! error template, `404.html` / `403.html` / ... override per status
//! code, and `index.html` is the landing page. Built-in fallbacks keep
//! the proxy presentable with no template directory at all.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use crate::throttle::Speed;

/// Default error descriptions per status code
fn error_description(code: u16) -> &'static str {
    match code {
        400 => "The request could not be understood by the proxy.",
        403 => "This URL is not in the allowlist. Contact the proxy administrator to request access.",
        404 => "This page was not found in the Wayback Machine's archive.",
        500 => "An unexpected error occurred in the proxy.",
        501 => "This feature is not yet implemented.",
        502 => "The Wayback Machine could not be reached.",
        503 => "This service is not available.",
        504 => "The request to the Wayback Machine timed out.",
        _ => "The request could not be completed.",
    }
}

const FALLBACK_ERROR_TEMPLATE: &str = "<html><head><title>$code $message</title></head>\
<body bgcolor=\"#0e0e1a\" text=\"#e0e0e0\"><h1>$code $message</h1><p>$description</p>\
<hr><small>$url &middot; $date</small></body></html>";

const FALLBACK_LANDING_TEMPLATE: &str = "<html><head><title>Wayback Proxy</title></head>\
<body bgcolor=\"#0e0e1a\" text=\"#e0e0e0\"><h1>Wayback Proxy</h1>\
<p>You are browsing the web as it looked on <b>$date</b>.</p>\
$custom_text$speed_info<h2>Most viewed</h2>$most_viewed</body></html>";

/// Substitute `$name` placeholders; unknown placeholders stay literal
fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("${name}"), value);
    }
    out
}

/// Loaded page templates
#[derive(Debug, Default)]
pub struct Pages {
    error_templates: HashMap<u16, String>,
    default_error: Option<String>,
    landing: Option<String>,
}

impl Pages {
    /// Load templates from the configured directory (empty = fallbacks)
    #[must_use]
    pub fn load(error_pages_dir: &str) -> Self {
        let mut pages = Self::default();
        if error_pages_dir.is_empty() {
            return pages;
        }
        let dir = Path::new(error_pages_dir);
        if !dir.is_dir() {
            warn!("Error pages directory {:?} not found, using built-in pages", dir);
            return pages;
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read error pages directory {:?}: {}", dir, e);
                return pages;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "html") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(content) = std::fs::read_to_string(&path) else {
                warn!("Cannot read template {:?}", path);
                continue;
            };
            match stem {
                "error" => pages.default_error = Some(content),
                "index" => pages.landing = Some(content),
                _ => {
                    if let Ok(code) = stem.parse::<u16>() {
                        pages.error_templates.insert(code, content);
                    }
                }
            }
        }
        info!(
            "Loaded {} error template(s) from {:?}",
            pages.error_templates.len()
                + usize::from(pages.default_error.is_some())
                + usize::from(pages.landing.is_some()),
            dir
        );
        pages
    }

    /// Render a themed error page
    #[must_use]
    pub fn render_error(&self, code: u16, message: &str, url: &str, date: &str) -> Vec<u8> {
        let template = self
            .error_templates
            .get(&code)
            .or(self.default_error.as_ref())
            .map_or(FALLBACK_ERROR_TEMPLATE, String::as_str);

        substitute(
            template,
            &[
                ("code", &code.to_string()),
                ("message", message),
                ("description", error_description(code)),
                ("url", url),
                ("date", date),
            ],
        )
        .into_bytes()
    }

    /// Render the landing page with the most-viewed list
    #[must_use]
    pub fn render_landing(
        &self,
        date: &str,
        most_viewed: &[(String, u64)],
        speed: Speed,
        custom_text: &str,
    ) -> Vec<u8> {
        let most_viewed_html = if most_viewed.is_empty() {
            "<p>No pages viewed yet.</p>".to_string()
        } else {
            let mut items = String::from("<ol>\n");
            for (domain, views) in most_viewed {
                items.push_str(&format!("<li>{domain} <small>({views} views)</small></li>\n"));
            }
            items.push_str("</ol>");
            items
        };

        let custom_text_html = if custom_text.is_empty() {
            String::new()
        } else {
            format!("<p>{custom_text}</p>")
        };
        let speed_info = match speed {
            Speed::Unlimited => String::new(),
            other => format!("<p>Connection speed: <b>{}</b></p>", other.name()),
        };

        substitute(
            self.landing.as_deref().unwrap_or(FALLBACK_LANDING_TEMPLATE),
            &[
                ("date", date),
                ("most_viewed", &most_viewed_html),
                ("custom_text", &custom_text_html),
                ("speed_info", &speed_info),
                ("speed", speed.name()),
            ],
        )
        .into_bytes()
    }
}
