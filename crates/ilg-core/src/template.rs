use chrono::{DateTime, Utc};

use crate::formatting::escape_html;

/// Timestamp format shown in the anchor message and in `/status`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Text of the public-channel anchor message (Telegram HTML).
///
/// Deterministic in its inputs: the same link, second and branding always
/// render the same text, which is what makes re-running an edit idempotent.
pub fn render_anchor(link: &str, at: DateTime<Utc>, branding: &str) -> String {
    format!(
        "🔐 <b>Private Channel Access</b>\n\n\
         🔗 <b>New Invite Link:</b>\n{}\n\n\
         ⏱ <b>Updated:</b> {} UTC\n\n\
         🤖 {}",
        escape_html(link),
        at.format(TIMESTAMP_FORMAT),
        escape_html(branding)
    )
}

pub fn default_branding(bot_username: &str) -> String {
    format!("Powered by @{bot_username}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn anchor_contains_link_time_and_branding() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let text = render_anchor("https://t.me/+abc", at, &default_branding("GuardBot"));
        assert!(text.contains("\nhttps://t.me/+abc\n"));
        assert!(text.contains("2026-03-04 05:06:07 UTC"));
        assert!(text.ends_with("🤖 Powered by @GuardBot"));
    }

    #[test]
    fn anchor_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            render_anchor("https://t.me/+x", at, "b"),
            render_anchor("https://t.me/+x", at, "b")
        );
    }

    #[test]
    fn branding_is_escaped() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let text = render_anchor("https://t.me/+x", at, "<Guard & Co>");
        assert!(text.contains("&lt;Guard &amp; Co&gt;"));
    }
}
