//! Placeholder substitution for email templates.
//!
//! Tokens are matched literally. `{{url}}` and `{{year}}` are replaced
//! everywhere; every other token only at its first occurrence.

use crate::domain::effects::EmailIntent;

pub const MERCHANT_NAME: &str = "{{merchantName}}";
pub const FULL_NAME: &str = "{{fullName}}";
pub const UPGRADE_STATUS: &str = "{{upgradeStatus}}";
pub const REASON: &str = "{{reason}}";
pub const ADMIN_NAME: &str = "{{adminName}}";
pub const URL: &str = "{{url}}";
pub const YEAR: &str = "{{year}}";

/// Values substituted into one template.
#[derive(Debug, Clone, Default)]
pub struct TemplateValues<'a> {
    pub merchant_name: &'a str,
    pub full_name: &'a str,
    pub upgrade_status: &'a str,
    pub reason: &'a str,
    pub admin_name: &'a str,
    pub url: &'a str,
    pub year: i32,
}

impl<'a> TemplateValues<'a> {
    pub fn from_intent(intent: &'a EmailIntent, url: &'a str, year: i32) -> Self {
        Self {
            merchant_name: &intent.merchant_name,
            full_name: &intent.full_name,
            upgrade_status: intent.upgrade_status.label(),
            reason: &intent.reason,
            admin_name: &intent.admin_name,
            url,
            year,
        }
    }
}

/// Substitutes every known token in one left-to-right pass, so text coming
/// from a value is never scanned for tokens again.
pub fn render(content: &str, values: &TemplateValues<'_>) -> String {
    let year = values.year.to_string();
    let repeated = [(URL, values.url), (YEAR, year.as_str())];
    let mut first_only = [
        (MERCHANT_NAME, values.merchant_name, false),
        (FULL_NAME, values.full_name, false),
        (UPGRADE_STATUS, values.upgrade_status, false),
        (REASON, values.reason, false),
        (ADMIN_NAME, values.admin_name, false),
    ];

    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let hit = repeated
            .iter()
            .find(|(token, _)| tail.starts_with(token))
            .map(|&(token, value)| (token.len(), value))
            .or_else(|| {
                first_only
                    .iter_mut()
                    .find(|(token, _, used)| !*used && tail.starts_with(*token))
                    .map(|entry| {
                        entry.2 = true;
                        (entry.0.len(), entry.1)
                    })
            });
        match hit {
            Some((len, value)) => {
                out.push_str(value);
                rest = &tail[len..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
