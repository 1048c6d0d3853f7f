//! Typed reading of the free-text stage outputs, for display only.
//! Nothing downstream depends on these parsing successfully.
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Bullish,
    Bearish,
    Neutral,
}

impl Stance {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bullish" => Some(Stance::Bullish),
            "bearish" => Some(Stance::Bearish),
            "neutral" => Some(Stance::Neutral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    /// 1..=10.
    pub score: Option<u8>,
    pub stance: Option<Stance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    ChangesRequested,
}

/// Text after each `label:` in `text`, in order. The label may sit anywhere
/// on a line (`Score: 8/10, Stance: Bullish`); case and markdown emphasis
/// are ignored.
fn labeled_values(text: &str, label: &str) -> Vec<String> {
    let needle = format!("{}:", label.to_ascii_lowercase());
    let mut values = Vec::new();
    for line in text.lines() {
        let line = line.replace('*', "");
        let lowered = line.to_ascii_lowercase();
        let mut from = 0;
        while let Some(offset) = lowered[from..].find(&needle) {
            let start = from + offset;
            let at_word_start = lowered[..start]
                .chars()
                .next_back()
                .is_none_or(|c| !c.is_ascii_alphanumeric() && c != '-');
            from = start + needle.len();
            if at_word_start {
                values.push(line[from..].trim().to_string());
            }
        }
    }
    values
}

fn parse_score(value: &str) -> Option<u8> {
    let numerator = value.split('/').next()?.trim();
    let digits = numerator
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>();
    digits
        .parse::<u8>()
        .ok()
        .filter(|score| (1..=10).contains(score))
}

pub fn parse_recommendation(analysis: &str) -> Recommendation {
    let score = labeled_values(analysis, "score")
        .iter()
        .find_map(|value| parse_score(value));
    let stance = labeled_values(analysis, "stance").iter().find_map(|value| {
        let word = value
            .split(|c: char| !c.is_ascii_alphabetic())
            .find(|word| !word.is_empty())?;
        Stance::parse(word)
    });
    Recommendation { score, stance }
}

pub fn parse_review_verdict(review: &str) -> ReviewVerdict {
    let approved = labeled_values(review, "sign-off").iter().any(|value| {
        value
            .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_ascii_lowercase()
            .starts_with("approved")
    });
    if approved {
        ReviewVerdict::Approved
    } else {
        ReviewVerdict::ChangesRequested
    }
}
