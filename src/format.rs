//! Alert rendering.
//!
//! Every function here is total: any input, including empty strings, renders
//! to a message no longer than the configured character budget.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::PROFILE_URL_BASE;

/// Character budget of a standard post.
pub const DEFAULT_MAX_CHARS: usize = 280;

/// Smallest budget accepted by configuration; the fixed parts of an alert fit in it.
pub const MIN_MAX_CHARS: usize = 140;

pub const DEFAULT_FOOTER: &str = "via PolyWatch";

const ELLIPSIS: char = '…';
const UNKNOWN_TITLE: &str = "a market";
const UNKNOWN_OUTCOME: &str = "?";
const ANONYMOUS: &str = "anon";

/// `0x` plus 40 hex digits.
const WALLET_LEN: usize = 42;
/// $999,999,999.99
const WIDEST_AMOUNT_CENTS: i64 = 99_999_999_999;

/// Rendering limits shared by every message kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOptions {
    /// Maximum length in Unicode scalar values.
    pub max_chars: usize,
    pub footer: String,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            footer: DEFAULT_FOOTER.to_string(),
        }
    }
}

/// Inputs of an alert message.
#[derive(Debug, Clone, Copy)]
pub struct AlertText<'a> {
    /// Free-text lead line.
    pub headline: &'a str,
    pub pnl: Decimal,
    pub title: &'a str,
    pub outcome: &'a str,
    pub wallet: &'a str,
}

/// Format a dollar amount: `$25,200` for whole dollars, `$25,200.50` otherwise.
pub fn format_usd(amount: Decimal) -> String {
    let negative = amount.is_sign_negative() && !amount.is_zero();
    let value = amount
        .abs()
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let whole = value.trunc();
    let cents = ((value - whole) * Decimal::ONE_HUNDRED)
        .trunc()
        .to_u32()
        .unwrap_or(0);

    let grouped = group_thousands(&whole.normalize().to_string());
    let body = if cents == 0 {
        format!("${grouped}")
    } else {
        format!("${grouped}.{cents:02}")
    };
    if negative { format!("-{body}") } else { body }
}

fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `$25,200 profit` or `$3,000 loss`.
pub fn describe_pnl(pnl: Decimal) -> String {
    if pnl.is_sign_negative() && !pnl.is_zero() {
        format!("{} loss", format_usd(pnl.abs()))
    } else {
        format!("{} profit", format_usd(pnl))
    }
}

/// `0x1234…cdef`; addresses too short to shorten are returned as-is.
pub fn short_wallet(addr: &str) -> String {
    let addr = addr.trim();
    let chars: Vec<char> = addr.chars().collect();
    if chars.len() < 10 {
        return addr.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}{ELLIPSIS}{tail}")
}

/// Pick the label a trader is shown under.
///
/// Precedence: profile name, pseudonym, shortened wallet, then a fixed
/// placeholder. Never returns an empty string.
pub fn resolve_display_label(
    profile_name: Option<&str>,
    pseudonym: Option<&str>,
    wallet: &str,
) -> String {
    [profile_name, pseudonym]
        .into_iter()
        .flatten()
        .map(normalize_space)
        .find(|s| !s.is_empty())
        .or_else(|| Some(short_wallet(wallet)).filter(|s| !s.is_empty()))
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

/// Lead line used when no generated headline is available.
pub fn fallback_headline(label: &str, pnl: Decimal, title: &str) -> String {
    let title = normalize_space(title);
    let title = if title.is_empty() { UNKNOWN_TITLE } else { &title };
    format!(
        "{label} just made a big move on '{title}' with {}! 🎯",
        describe_pnl(pnl)
    )
}

pub fn profile_link(wallet: &str) -> String {
    format!("{PROFILE_URL_BASE}{}", wallet.trim())
}

/// Render a PnL alert within `opts.max_chars`.
///
/// Only free text (headline, title, outcome label) is shortened, always at a
/// word boundary. The longest field gives way first so short ones stay whole.
/// The amount, profile link and footer are never cut.
pub fn format_alert(alert: &AlertText<'_>, opts: &MessageOptions) -> String {
    let title = normalize_space(alert.title);
    let outcome = normalize_space(alert.outcome);
    let wallet = alert.wallet.trim();

    let mut msg = Message {
        headline: normalize_space(alert.headline),
        amount: Some(describe_pnl(alert.pnl)),
        title: if title.is_empty() { UNKNOWN_TITLE.to_string() } else { title },
        outcome: if outcome.is_empty() { UNKNOWN_OUTCOME.to_string() } else { outcome },
        link: (!wallet.is_empty()).then(|| profile_link(wallet)),
        footer: opts.footer.trim().to_string(),
    };
    fit(&mut msg, opts.max_chars)
}

/// Characters used by the parts of an alert that are never shortened, for the
/// widest wallet and amount an alert carries.
pub fn fixed_chars(opts: &MessageOptions) -> usize {
    let msg = Message {
        headline: String::new(),
        amount: Some(describe_pnl(Decimal::new(-WIDEST_AMOUNT_CENTS, 2))),
        title: String::new(),
        outcome: String::new(),
        link: Some(profile_link(&"f".repeat(WALLET_LEN))),
        footer: opts.footer.trim().to_string(),
    };
    char_len(&msg.render())
}

/// Render free text with the footer only, within `opts.max_chars`.
pub fn format_plain(text: &str, opts: &MessageOptions) -> String {
    let mut msg = Message {
        headline: normalize_space(text),
        amount: None,
        title: String::new(),
        outcome: String::new(),
        link: None,
        footer: opts.footer.trim().to_string(),
    };
    fit(&mut msg, opts.max_chars)
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Headline,
    Title,
    Outcome,
}

const FREE_TEXT: [Field; 3] = [Field::Headline, Field::Title, Field::Outcome];

#[derive(Debug, Clone)]
struct Message {
    headline: String,
    amount: Option<String>,
    title: String,
    outcome: String,
    link: Option<String>,
    footer: String,
}

impl Message {
    fn field_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Headline => &mut self.headline,
            Field::Title => &mut self.title,
            Field::Outcome => &mut self.outcome,
        }
    }

    fn render(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        if !self.headline.is_empty() {
            lines.push(self.headline.clone());
        }
        let mut details = Vec::new();
        if let Some(amount) = &self.amount {
            if self.outcome.is_empty() {
                details.push(format!("💰 {amount}"));
            } else {
                details.push(format!("💰 {amount} on {}", self.outcome));
            }
        }
        if !self.title.is_empty() {
            details.push(format!("📊 Market: {}", self.title));
        }
        for block in [
            details,
            self.link.iter().map(|l| format!("🔗\n{l}")).collect(),
            vec![self.footer.clone()].into_iter().filter(|f| !f.is_empty()).collect(),
        ] {
            if block.is_empty() {
                continue;
            }
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.extend(block);
        }
        lines.join("\n")
    }
}

fn fit(msg: &mut Message, max_chars: usize) -> String {
    let rendered = msg.render();
    if char_len(&rendered) <= max_chars {
        return rendered;
    }

    let originals = FREE_TEXT.map(|field| msg.field_mut(field).clone());
    let present: Vec<usize> = (0..FREE_TEXT.len())
        .filter(|&i| !originals[i].is_empty())
        .collect();

    // Room for free text: render with every present field reduced to one char.
    for &i in &present {
        *msg.field_mut(FREE_TEXT[i]) = "x".to_string();
    }
    let available = max_chars.saturating_sub(char_len(&msg.render()) - present.len());

    let lengths: Vec<usize> = present.iter().map(|&i| char_len(&originals[i])).collect();
    let cap = water_level(&lengths, available);
    for &i in &present {
        *msg.field_mut(FREE_TEXT[i]) = truncate_at_word(&originals[i], cap).unwrap_or_default();
    }

    if char_len(&msg.render()) > max_chars {
        // Only reachable when the fixed parts alone exceed the budget, which
        // configuration validation rules out.
        return msg.render().chars().take(max_chars).collect();
    }

    // Word-boundary cuts and dropped fields leave slack; hand it back in order.
    for &i in &present {
        let field = FREE_TEXT[i];
        let current = std::mem::take(msg.field_mut(field));
        let without = char_len(&msg.render());
        *msg.field_mut(field) = "x".to_string();
        let overhead = char_len(&msg.render()).saturating_sub(without + 1);
        let budget = max_chars.saturating_sub(without + overhead);

        let regrown = truncate_at_word(&originals[i], budget).unwrap_or_default();
        *msg.field_mut(field) = if char_len(&regrown) > char_len(&current) {
            regrown
        } else {
            current
        };
    }
    msg.render()
}

/// Largest per-field length such that the capped lengths sum to at most `available`.
///
/// Fields shorter than the level keep their full length.
fn water_level(lengths: &[usize], available: usize) -> usize {
    let mut sorted = lengths.to_vec();
    sorted.sort_unstable();
    let mut remaining = available;
    for (i, &len) in sorted.iter().enumerate() {
        let left = sorted.len() - i;
        if len * left > remaining {
            return remaining / left;
        }
        remaining -= len;
    }
    sorted.last().copied().unwrap_or(0)
}

/// Cut `text` to at most `budget` chars at a word boundary, marking the cut with `…`.
///
/// Returns `None` when not even the first word fits.
fn truncate_at_word(text: &str, budget: usize) -> Option<String> {
    if char_len(text) <= budget {
        return Some(text.to_string()).filter(|t| !t.is_empty());
    }
    if budget <= 1 {
        return None;
    }
    let limit = budget - 1;
    // One char past the limit: a space there means the preceding word is whole.
    let window: String = text.chars().take(limit + 1).collect();
    let cut = window
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .map(|(i, _)| i)
        .last()?;
    let kept = window[..cut].trim_end();
    if kept.is_empty() {
        return None;
    }
    Some(format!("{kept}{ELLIPSIS}"))
}

fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
