//! Header bar overlay rendering
//!
//! Produces a self-contained HTML fragment injected into served pages:
//! an absolutely positioned bar showing the page URL, the archive date,
//! optional branding text, and (when enabled) a speed dropdown that
//! writes the `wayback_speed` cookie and reloads.
//!
//! The fragment must render on period browsers (IE4/IE5, Netscape 4):
//! inline styles only, `var`-based script, no DOM APIs newer than
//! `getElementById`, and a `document.all` fallback.

use crate::config::{BarPosition, HeaderBarSection, ThrottleSection};
use crate::throttle::{Speed, SPEED_COOKIE};

/// Minimal HTML escaping for text shown inside the bar
fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render the speed display: plain text, or a dropdown when the selector
/// is enabled
fn render_speed_display(selector: bool, current: Speed) -> String {
    if !selector {
        return format!("Speed: {}", current.name());
    }
    let mut options = String::new();
    for speed in Speed::ALL {
        let selected = if speed == current { " selected" } else { "" };
        options.push_str(&format!(
            r#"<option value="{name}"{selected}>{name}</option>"#,
            name = speed.name(),
        ));
    }
    format!(
        r#"Speed: <select id="wbSpeedSel" style="font-family:Courier New,monospace;font-size:11px;background:#12122a;color:#e0e0e0;border:1px solid #505070">{options}</select>"#
    )
}

/// Script wiring the dropdown to the speed cookie (IE4-compatible)
fn render_selector_script() -> String {
    format!(
        r#"var sel=document.getElementById?document.getElementById("wbSpeedSel"):document.all["wbSpeedSel"];
if(sel){{
  sel.onchange=function(){{
    var v=sel.options[sel.selectedIndex].value;
    document.cookie="{SPEED_COOKIE}="+v+";path=/";
    window.location.reload();
  }};
}}"#
    )
}

/// Render the complete header bar fragment.
///
/// `url` and `archive_date` describe the page being served; `speed` is
/// the effective speed for this request (shown, and preselected in the
/// dropdown).
#[must_use]
pub fn render(
    bar: &HeaderBarSection,
    throttle: &ThrottleSection,
    url: &str,
    archive_date: &str,
    speed: Speed,
) -> String {
    let (position_css, border_edge, padding_prop) = match bar.position {
        BarPosition::Top => ("top:0", "bottom", "paddingTop"),
        BarPosition::Bottom => ("bottom:0", "top", "paddingBottom"),
    };

    let branding = if bar.text.is_empty() {
        String::new()
    } else {
        format!(
            r#"<span style="color:#a0a0d0">{}</span> &middot; "#,
            escape_html(&bar.text)
        )
    };

    let show_selector = throttle.selector;
    let speed_display = render_speed_display(show_selector, speed);
    let selector_script = if show_selector {
        render_selector_script()
    } else {
        String::new()
    };

    format!(
        r#"<div id="wbHeaderBar" style="position:absolute;left:0;{position_css};width:100%;z-index:9999;background:#0e0e1a;color:#e0e0e0;font-family:Courier New,monospace;font-size:11px;padding:3px 8px;border-{border_edge}:1px solid #505070">
{branding}<span style="color:#8080ff">{url}</span> &middot; archived {archive_date} &middot; {speed_display}
</div>
<script language="JavaScript">
<!--
if(document.body){{document.body.style.{padding_prop}="22px";}}
{selector_script}
// -->
</script>"#,
        url = escape_html(url),
        archive_date = escape_html(archive_date),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_config(position: BarPosition, text: &str) -> HeaderBarSection {
        HeaderBarSection {
            enabled: true,
            position,
            text: text.to_string(),
        }
    }

    fn throttle_config(selector: bool) -> ThrottleSection {
        ThrottleSection {
            speed: "56k".to_string(),
            selector,
        }
    }

    #[test]
    fn test_renders_url_and_date() {
        let html = render(
            &bar_config(BarPosition::Top, ""),
            &throttle_config(false),
            "http://example.com/page",
            "20010915",
            Speed::Modem56,
        );
        assert!(html.contains("http://example.com/page"));
        assert!(html.contains("archived 20010915"));
        assert!(html.contains("Speed: 56k"));
        assert!(html.contains("top:0"));
    }

    #[test]
    fn test_bottom_position() {
        let html = render(
            &bar_config(BarPosition::Bottom, ""),
            &throttle_config(false),
            "http://example.com/",
            "20010915",
            Speed::Unlimited,
        );
        assert!(html.contains("bottom:0"));
        assert!(html.contains("paddingBottom"));
    }

    #[test]
    fn test_branding_text_is_escaped() {
        let html = render(
            &bar_config(BarPosition::Top, "<Exhibit> & \"Co\""),
            &throttle_config(false),
            "http://example.com/",
            "20010915",
            Speed::Unlimited,
        );
        assert!(html.contains("&lt;Exhibit&gt; &amp; &quot;Co&quot;"));
        assert!(!html.contains("<Exhibit>"));
    }

    #[test]
    fn test_selector_renders_dropdown_with_current_selected() {
        let html = render(
            &bar_config(BarPosition::Top, ""),
            &throttle_config(true),
            "http://example.com/",
            "20010915",
            Speed::Isdn,
        );
        assert!(html.contains("wbSpeedSel"));
        assert!(html.contains(r#"<option value="isdn" selected>isdn</option>"#));
        assert!(html.contains(r#"<option value="14.4k">14.4k</option>"#));
        assert!(html.contains("wayback_speed"));
    }

    #[test]
    fn test_no_selector_means_no_dropdown() {
        let html = render(
            &bar_config(BarPosition::Top, ""),
            &throttle_config(false),
            "http://example.com/",
            "20010915",
            Speed::Isdn,
        );
        assert!(!html.contains("wbSpeedSel"));
        assert!(!html.contains("wayback_speed"));
    }

    #[test]
    fn test_fragment_avoids_modern_javascript() {
        let html = render(
            &bar_config(BarPosition::Top, "x"),
            &throttle_config(true),
            "http://example.com/",
            "20010915",
            Speed::Modem14_4,
        );
        assert!(!html.contains("=>"));
        assert!(!html.contains("let "));
        assert!(!html.contains("const "));
        assert!(!html.contains("querySelector"));
        assert!(!html.contains("addEventListener"));
    }
}
