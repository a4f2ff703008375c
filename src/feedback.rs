use serde::{Deserialize, Serialize};

/// Theme keyword families used to bucket raw 360° comments. Simplified
/// lexical matching; a stronger extractor can replace this behind the same
/// report shape.
const THEME_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "communication",
        &[
            "communication",
            "communicate",
            "clarity",
            "clear",
            "explain",
            "articulate",
        ],
    ),
    (
        "leadership",
        &["leadership", "lead", "direction", "vision", "inspire", "motivate"],
    ),
    (
        "technical",
        &[
            "technical",
            "technology",
            "code",
            "engineering",
            "expertise",
            "skill",
        ],
    ),
    (
        "collaboration",
        &[
            "collaboration",
            "teamwork",
            "team",
            "cooperate",
            "work together",
        ],
    ),
    (
        "delegation",
        &["delegation", "delegate", "empower", "trust", "distribute"],
    ),
    ("feedback", &["feedback", "input", "suggestions", "advice"]),
    (
        "time management",
        &["time", "deadline", "schedule", "prioritize", "organize"],
    ),
    (
        "problem solving",
        &["problem", "solution", "solve", "resolve", "fix"],
    ),
];

const POSITIVE_KEYWORDS: &[&str] = &[
    "great",
    "excellent",
    "strong",
    "good",
    "impressive",
    "outstanding",
    "helpful",
];

const NEGATIVE_KEYWORDS: &[&str] = &[
    "could improve",
    "needs work",
    "lacking",
    "weak",
    "should",
    "needs to",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThemeCategory {
    Strength,
    Improvement,
    Neutral,
}

impl ThemeCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ThemeCategory::Strength => "strength",
            ThemeCategory::Improvement => "improvement",
            ThemeCategory::Neutral => "neutral",
        }
    }
}

/// One raw comment from a feedback source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackComment {
    #[serde(default = "default_source")]
    pub source: String,
    pub comment: String,
    #[serde(default = "default_sentiment")]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub themes: Vec<String>,
}

fn default_source() -> String {
    "unknown".to_string()
}

fn default_sentiment() -> Sentiment {
    Sentiment::Neutral
}

/// Aggregated view of one recurring theme across comments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackTheme {
    pub category: ThemeCategory,
    pub theme: String,
    pub frequency: u32,
    /// Up to three verbatim comments illustrating the theme. These are the
    /// critical raw quotes that must stay out of the reaction phase.
    pub examples: Vec<String>,
}

/// Parsed 360° feedback for one session. Read-only once the session starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackReport {
    #[serde(default)]
    pub themes: Vec<FeedbackTheme>,
    #[serde(default)]
    pub comments: Vec<FeedbackComment>,
}

impl FeedbackReport {
    /// Every raw comment string, used by the response validator to catch
    /// verbatim disclosure.
    pub fn raw_comment_texts(&self) -> Vec<String> {
        self.comments.iter().map(|c| c.comment.clone()).collect()
    }
}

/// Parse raw feedback text: split into comments, tag themes and sentiment,
/// aggregate themes by frequency.
pub fn parse_feedback_text(text: &str) -> FeedbackReport {
    let comments: Vec<FeedbackComment> = split_comments(text)
        .into_iter()
        .map(|comment| analyze_comment("unknown", &comment))
        .collect();
    let themes = aggregate_themes(&comments);
    FeedbackReport { themes, comments }
}

/// Parse feedback from CSV with a `source,category,comment,sentiment` header.
/// The sentiment column is optional; missing values are re-derived from the
/// comment text.
pub fn parse_feedback_csv(csv: &str) -> FeedbackReport {
    let mut lines = csv.lines().filter(|l| !l.trim().is_empty());
    let header: Vec<String> = match lines.next() {
        Some(line) => split_csv_line(line)
            .into_iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .collect(),
        None => return FeedbackReport::default(),
    };
    let source_idx = header.iter().position(|h| h == "source");
    let comment_idx = header.iter().position(|h| h == "comment");

    let mut comments = Vec::new();
    for line in lines {
        let fields = split_csv_line(line);
        let comment = comment_idx
            .and_then(|i| fields.get(i))
            .map(|s| s.trim())
            .unwrap_or("");
        if comment.is_empty() {
            continue;
        }
        let source = source_idx
            .and_then(|i| fields.get(i))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown");
        comments.push(analyze_comment(source, comment));
    }

    let themes = aggregate_themes(&comments);
    FeedbackReport { themes, comments }
}

/// Parse feedback from JSON: either a full report `{themes, comments}` or a
/// bare array of comment objects. Themes are re-derived when absent.
pub fn parse_feedback_json(json: &str) -> Result<FeedbackReport, serde_json::Error> {
    if let Ok(mut report) = serde_json::from_str::<FeedbackReport>(json) {
        if report.themes.is_empty() && !report.comments.is_empty() {
            for comment in &mut report.comments {
                let analyzed = analyze_comment(&comment.source, &comment.comment);
                comment.sentiment = analyzed.sentiment;
                comment.themes = analyzed.themes;
            }
            report.themes = aggregate_themes(&report.comments);
        }
        return Ok(report);
    }

    let raw: Vec<FeedbackComment> = serde_json::from_str(json)?;
    let comments: Vec<FeedbackComment> = raw
        .into_iter()
        .map(|c| analyze_comment(&c.source, &c.comment))
        .collect();
    let themes = aggregate_themes(&comments);
    Ok(FeedbackReport { themes, comments })
}

fn analyze_comment(source: &str, comment: &str) -> FeedbackComment {
    let lowered = comment.to_lowercase();

    let themes: Vec<String> = THEME_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(theme, _)| theme.to_string())
        .collect();

    let sentiment = if POSITIVE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        Sentiment::Positive
    } else if NEGATIVE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    };

    FeedbackComment {
        source: source.to_string(),
        comment: comment.to_string(),
        sentiment,
        themes,
    }
}

fn aggregate_themes(comments: &[FeedbackComment]) -> Vec<FeedbackTheme> {
    let mut themes = Vec::new();
    for (name, _) in THEME_KEYWORDS {
        let matching: Vec<&FeedbackComment> = comments
            .iter()
            .filter(|c| c.themes.iter().any(|t| t == name))
            .collect();
        if matching.is_empty() {
            continue;
        }

        let positive = matching
            .iter()
            .filter(|c| c.sentiment == Sentiment::Positive)
            .count();
        let negative = matching
            .iter()
            .filter(|c| c.sentiment == Sentiment::Negative)
            .count();
        let category = if positive > negative {
            ThemeCategory::Strength
        } else if negative > positive {
            ThemeCategory::Improvement
        } else {
            ThemeCategory::Neutral
        };

        themes.push(FeedbackTheme {
            category,
            theme: title_case(name),
            frequency: matching.len() as u32,
            examples: matching
                .iter()
                .take(3)
                .map(|c| c.comment.clone())
                .collect(),
        });
    }

    themes.sort_by(|a, b| b.frequency.cmp(&a.frequency));
    themes
}

/// Split raw text into individual comments: newlines, semicolons, and
/// sentence boundaries followed by a capital letter.
fn split_comments(text: &str) -> Vec<String> {
    let mut comments = Vec::new();
    for chunk in text.split(|c| c == '\n' || c == ';') {
        let mut rest = chunk;
        loop {
            match sentence_boundary(rest) {
                Some(split_at) => {
                    let (sentence, tail) = rest.split_at(split_at);
                    push_comment(&mut comments, sentence);
                    rest = tail;
                }
                None => {
                    push_comment(&mut comments, rest);
                    break;
                }
            }
        }
    }
    comments
}

/// Byte offset just past a `. ` that is followed by an uppercase letter.
fn sentence_boundary(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    for (i, window) in bytes.windows(2).enumerate() {
        if window[0] == b'.' && window[1] == b' ' {
            let after = text[i + 2..].chars().find(|c| !c.is_whitespace());
            if matches!(after, Some(c) if c.is_uppercase()) {
                return Some(i + 1);
            }
        }
    }
    None
}

fn push_comment(comments: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim().trim_end_matches('.').trim();
    if !trimmed.is_empty() {
        comments.push(trimmed.to_string());
    }
}

/// Minimal CSV field splitter honoring double-quoted fields.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                fields.push(current.clone());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn title_case(name: &str) -> String {
    name.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_parsing_extracts_themes_and_sentiment() {
        let report = parse_feedback_text(
            "Communication could improve in large meetings\n\
             Great technical expertise across the stack\n\
             Should delegate more to the team",
        );

        assert_eq!(report.comments.len(), 3);
        assert_eq!(report.comments[0].sentiment, Sentiment::Negative);
        assert_eq!(report.comments[1].sentiment, Sentiment::Positive);

        let communication = report
            .themes
            .iter()
            .find(|t| t.theme == "Communication")
            .expect("communication theme");
        assert_eq!(communication.category, ThemeCategory::Improvement);
        assert_eq!(communication.frequency, 1);

        let technical = report
            .themes
            .iter()
            .find(|t| t.theme == "Technical")
            .expect("technical theme");
        assert_eq!(technical.category, ThemeCategory::Strength);
    }

    #[test]
    fn sentence_boundaries_split_inline_comments() {
        let report =
            parse_feedback_text("Strong leadership presence. Needs to communicate decisions");
        assert_eq!(report.comments.len(), 2);
        assert_eq!(report.comments[0].comment, "Strong leadership presence");
    }

    #[test]
    fn csv_parsing_honors_quoted_commas() {
        let report = parse_feedback_csv(
            "source,category,comment\n\
             peer,communication,\"Could improve clarity, especially in writing\"\n\
             manager,leadership,Great vision for the team\n",
        );
        assert_eq!(report.comments.len(), 2);
        assert_eq!(report.comments[0].source, "peer");
        assert!(report.comments[0].comment.contains("especially in writing"));
        assert_eq!(report.comments[1].sentiment, Sentiment::Positive);
    }

    #[test]
    fn json_array_gets_themes_derived() {
        let report = parse_feedback_json(
            r#"[{"source": "peer", "comment": "Should explain decisions more clearly"}]"#,
        )
        .expect("parse json");
        assert_eq!(report.comments.len(), 1);
        assert!(report.themes.iter().any(|t| t.theme == "Communication"));
    }

    #[test]
    fn empty_input_yields_empty_report() {
        let report = parse_feedback_text("");
        assert!(report.themes.is_empty());
        assert!(report.comments.is_empty());
    }
}
