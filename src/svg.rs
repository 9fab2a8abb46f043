use std::fs;
use std::io::Write;
use std::path::Path;

use regex::{Captures, Regex};
use tracing::debug;

use crate::error::Result;
use crate::stats::ProfileStats;

// Approximate monospaced glyph width at 16px, used for wrapping.
const CHAR_WIDTH_PX: usize = 9;
const TAGLINE_LINE_HEIGHT: i64 = 18;

/// Named text locations inside a card template, addressed by element `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Age,
    Repos,
    Stars,
    Commits,
    Contributed,
    Followers,
    LocNet,
    LocAdd,
    LocDel,
}

impl Slot {
    pub const ALL: [Slot; 9] = [
        Slot::Age,
        Slot::Repos,
        Slot::Stars,
        Slot::Commits,
        Slot::Contributed,
        Slot::Followers,
        Slot::LocNet,
        Slot::LocAdd,
        Slot::LocDel,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Slot::Age => "age_data",
            Slot::Repos => "repo_data",
            Slot::Stars => "star_data",
            Slot::Commits => "commit_data",
            Slot::Contributed => "contrib_data",
            Slot::Followers => "follower_data",
            Slot::LocNet => "loc_data",
            Slot::LocAdd => "loc_add",
            Slot::LocDel => "loc_del",
        }
    }

    /// Longest value the card layout has room for.
    fn max_chars(self) -> usize {
        match self {
            Slot::Age => 48,
            Slot::Repos | Slot::Contributed => 8,
            Slot::Stars | Slot::Followers | Slot::LocAdd | Slot::LocDel => 10,
            Slot::Commits => 12,
            Slot::LocNet => 15,
        }
    }
}

/// Formatted text for every slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotValues(Vec<(Slot, String)>);

impl SlotValues {
    pub fn from_stats(stats: &ProfileStats) -> Self {
        let (loc_net, loc_add, loc_del) = match stats.loc {
            Some(loc) => (
                group_thousands_signed(loc.net()),
                format!("+{}", group_thousands(loc.additions)),
                format!("-{}", group_thousands(loc.deletions)),
            ),
            // Heavy scan skipped: keep the line visible with placeholders.
            None => ("--".to_string(), "+0".to_string(), "-0".to_string()),
        };

        let values = Slot::ALL
            .iter()
            .map(|&slot| {
                let text = match slot {
                    Slot::Age => stats.age.to_string(),
                    Slot::Repos => group_thousands(stats.repos),
                    Slot::Stars => group_thousands(stats.stars),
                    Slot::Commits => group_thousands(stats.commits),
                    Slot::Contributed => group_thousands(stats.contributed_repos),
                    Slot::Followers => group_thousands(stats.followers),
                    Slot::LocNet => loc_net.clone(),
                    Slot::LocAdd => loc_add.clone(),
                    Slot::LocDel => loc_del.clone(),
                };
                (slot, truncate(&text, slot.max_chars()))
            })
            .collect();

        SlotValues(values)
    }
}

/// Result of filling a template.
#[derive(Debug)]
pub struct Rendered {
    pub svg: String,
    /// Slots the template has no element for.
    pub missing: Vec<Slot>,
}

/// Replace the text of each slot element with its value. Slots the template
/// lacks are reported in `missing` and otherwise ignored.
pub fn render(template: &str, values: &SlotValues) -> Rendered {
    let mut svg = template.to_string();
    let mut missing = Vec::new();

    for (slot, value) in &values.0 {
        match replace_slot(&svg, slot.id(), value) {
            Some(updated) => svg = updated,
            None => {
                debug!(slot = slot.id(), "Template has no element for slot");
                missing.push(*slot);
            }
        }
    }

    Rendered {
        svg: wrap_tagline(&svg),
        missing,
    }
}

/// Overwrite a card in place via a temp file and rename.
pub fn write_card(path: &Path, svg: &str) -> Result<()> {
    let temp_path = path.with_extension("svg.tmp");
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(svg.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn element_with_id(id: &str) -> Option<Regex> {
    let pattern = format!(
        r#"<(?P<tag>[A-Za-z][\w:.-]*)(?P<attrs>(?:\s[^>]*?)?\sid\s*=\s*["']{}["'][^>]*?)(?P<close>/?)>(?P<text>[^<]*)"#,
        regex::escape(id)
    );
    Regex::new(&pattern).ok()
}

fn replace_slot(svg: &str, id: &str, value: &str) -> Option<String> {
    let re = element_with_id(id)?;
    if !re.is_match(svg) {
        return None;
    }

    let escaped = escape_xml(value);
    let replaced = re.replacen(svg, 1, |caps: &Captures| {
        let tag = &caps["tag"];
        let attrs = &caps["attrs"];
        if caps["close"].is_empty() {
            format!("<{tag}{attrs}>{escaped}")
        } else {
            // Self-closing: open it up and keep the sibling text that followed.
            format!("<{tag}{attrs}>{escaped}</{tag}>{}", &caps["text"])
        }
    });
    Some(replaced.into_owned())
}

/// Greedy word wrap for `<text id="tagline" data-max-width="N">`.
pub fn wrap_tagline(svg: &str) -> String {
    let Some(re) = element_with_id("tagline") else {
        return svg.to_string();
    };
    let Some(caps) = re.captures(svg) else {
        return svg.to_string();
    };
    if !caps["close"].is_empty() {
        return svg.to_string();
    }

    let attrs = &caps["attrs"];
    let max_width = attr(attrs, "data-max-width")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let original = caps["text"].trim();
    if max_width == 0 || original.is_empty() || approx_width(original) <= max_width {
        return svg.to_string();
    }

    let lines = wrap_words(original, max_width);
    let x = attr(attrs, "x").unwrap_or("30");
    let y = attr(attrs, "y")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(380);

    let mut body = lines[0].clone();
    for (i, line) in lines.iter().enumerate().skip(1) {
        body.push_str(&format!(
            r#"<tspan x="{x}" y="{}">{line}</tspan>"#,
            y + i as i64 * TAGLINE_LINE_HEIGHT
        ));
    }

    let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
    let mut out = String::with_capacity(svg.len() + body.len());
    out.push_str(&svg[..whole.start]);
    out.push_str(&format!("<{}{}>{}", &caps["tag"], attrs, body));
    out.push_str(&svg[whole.end..]);
    out
}

fn wrap_words(text: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if approx_width(&candidate) <= max_width || current.is_empty() {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn attr<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{name}=");
    let start = attrs
        .match_indices(&needle)
        .find(|(i, _)| *i == 0 || attrs[..*i].ends_with(char::is_whitespace))
        .map(|(i, _)| i + needle.len())?;
    let rest = &attrs[start..];
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let rest = &rest[1..];
    rest.find(quote).map(|end| &rest[..end])
}

fn approx_width(text: &str) -> usize {
    text.chars().count() * CHAR_WIDTH_PX
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// `1234567` -> `"1,234,567"`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn group_thousands_signed(n: i64) -> String {
    let grouped = group_thousands(n.unsigned_abs());
    if n < 0 { format!("-{grouped}") } else { grouped }
}

/// Cut to `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= 1 {
        return "…".to_string();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}
