use crate::discord::api::{RoleId, UserId};
use regex::Regex;
use std::sync::LazyLock;

pub const DEFAULT_SUPPORT_ISSUES_URL: &str = "https://linear.app/mento-labs/team/SUP/all?layout=board&ordering=priority&grouping=workflowState&subGrouping=none&showCompletedIssues=all&showSubIssues=true&showTriageIssues=false";

static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://[^\s)]+").unwrap());

pub(crate) fn render_announcement(user: UserId, role: RoleId, support_issues_url: &str) -> String {
    format!(
        "🔄 **New Support Engineer: <@{user}> is on duty for this week!**\n\
         They now hold the <@&{role}> role. Please monitor all alert channels and work through \
         as many [support issues]({support_issues_url}) as you can."
    )
}

/// Wrap bare URLs in angle brackets so Discord doesn't render link previews.
///
/// URLs that are the target of a markdown link (`[text](url)`) or that are
/// already wrapped are left alone.
pub(crate) fn suppress_link_previews(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut pos = 0;
    while let Some(m) = URL.find_at(text, pos) {
        let before = &text[..m.start()];
        if before.ends_with("](") || before.ends_with('<') {
            // A later scheme inside this match may still be bare.
            pos = m.start() + 1;
            continue;
        }
        out.push_str(&text[copied..m.start()]);
        out.push('<');
        out.push_str(m.as_str());
        out.push('>');
        copied = m.end();
        pos = m.end();
    }
    out.push_str(&text[copied..]);
    out
}
