//! Pure query-string analysis: envelope stripping, intent detection, and
//! rule-likeness scoring. No I/O; everything here is regex over text.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::ChunkType;

macro_rules! cached_re {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).unwrap())
        }
    };
}

cached_re!(re_fenced_code, r"(?s)```.*?```");
cached_re!(re_inline_code, r"`[^`\n]*`");
cached_re!(
    re_role_line,
    r"(?m)^(?:System|Context|User|Human|Assistant|Tool):.*$"
);
cached_re!(re_xml_tag, r"</?[a-zA-Z][a-zA-Z0-9_-]*(?:\s[^>]*)?>");
cached_re!(
    re_recalled_section,
    r"(?ms)^## Recalled Context$.*?(?:^#|\z)"
);

/// Remove transport noise from a message before intent or term analysis:
/// fenced and inline code, role-prefixed lines, XML-ish metadata tags, and
/// previously injected "## Recalled Context" sections.
pub fn strip_envelope(message: &str) -> String {
    let text = re_fenced_code().replace_all(message, " ");
    let text = re_inline_code().replace_all(&text, " ");
    let text = re_recalled_section().replace_all(&text, " ");
    let text = re_role_line().replace_all(&text, " ");
    let text = re_xml_tag().replace_all(&text, " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Query intent categories, first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// "all my", "everything": wants breadth over precision.
    Aggregation,
    /// "why did we": wants decisions and confirmations.
    Reasoning,
    /// "what should I": wants open loops and next steps.
    Action,
}

/// Synthetic terms injected into the recall query for action intent.
pub const ACTION_SYNTHETIC_TERMS: &[&str] = &[
    "priority", "pending", "action", "focus", "task", "loop", "waiting", "blocked",
];

impl Intent {
    /// Aggregation widens the result set and lowers the score floor.
    pub fn max_chunks(self) -> Option<usize> {
        match self {
            Intent::Aggregation => Some(15),
            _ => None,
        }
    }

    pub fn min_score(self) -> Option<f64> {
        match self {
            Intent::Aggregation => Some(0.10),
            _ => None,
        }
    }

    /// Post-score multiplier boosts per chunk type.
    pub fn type_boost(self, chunk_type: ChunkType) -> f64 {
        match (self, chunk_type) {
            (Intent::Reasoning, ChunkType::Decision) => 0.25,
            (Intent::Reasoning, ChunkType::Confirmed) => 0.20,
            (Intent::Action, ChunkType::ActionItem) => 0.25,
            (Intent::Action, ChunkType::Decision) => 0.15,
            _ => 0.0,
        }
    }
}

cached_re!(
    re_aggregation,
    r"(?i)\b(?:all\s+my|everything|list\s+(?:all|every)|summarize|summary|overview)\b"
);
cached_re!(
    re_reasoning,
    r"(?i)(?:\bwhy\s+did\b|\bwhat\s+was\s+the\s+reason\b|\bhow\s+did\s+(?:i|we)\s+decide\b|\brationale\b)"
);
cached_re!(
    re_action,
    r"(?i)(?:\bwhat\s+should\s+i\b|\bwhat'?s\s+next\b|\bwhat\s+do\s+i\s+need\b|\bopen\s+(?:items|loops|tasks)\b|\baction\s+items\b|\bto-?do\b)"
);

/// Detect the query's intent; the first matching category wins.
pub fn detect_intent(message: &str) -> Option<Intent> {
    if re_aggregation().is_match(message) {
        Some(Intent::Aggregation)
    } else if re_reasoning().is_match(message) {
        Some(Intent::Reasoning)
    } else if re_action().is_match(message) {
        Some(Intent::Action)
    } else {
        None
    }
}

const STRONG_RULE_PATTERNS: &[&str] = &[
    r"non-negotiable",
    r"hard rules?",
    r"never.*without",
    r"always.*require",
    r"must.*approval",
    r"do not.*ever",
    r"blocked entirely",
    r"mandatory",
    r"critical.*rule",
];

const MODERATE_RULE_PATTERNS: &[&str] = &[
    r"rules?:",
    r"policy",
    r"guidelines?",
    r"protocol.*non",
    r"guardrails?",
    r"before any",
    r"no exceptions",
];

fn strong_rule_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        STRONG_RULE_PATTERNS
            .iter()
            .map(|p| Regex::new(p).unwrap())
            .collect()
    })
}

fn moderate_rule_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        MODERATE_RULE_PATTERNS
            .iter()
            .map(|p| Regex::new(p).unwrap())
            .collect()
    })
}

/// How rule-like a chunk's text is: 0.9 for a strong marker, 0.7 for two
/// moderate markers, 0.4 for one, 0.0 otherwise. Input is content+heading,
/// already lowercased by the caller.
pub fn rule_confidence(lowered: &str) -> f64 {
    if strong_rule_res().iter().any(|re| re.is_match(lowered)) {
        return 0.9;
    }
    let moderate = moderate_rule_res()
        .iter()
        .filter(|re| re.is_match(lowered))
        .count();
    match moderate {
        0 => 0.0,
        1 => 0.4,
        _ => 0.7,
    }
}

cached_re!(re_asks_rules, r"(?i)\b(?:rules?|policy|guidelines)\b");

/// Rule chunks are not penalized when the user is asking about rules.
pub fn asks_about_rules(message: &str) -> bool {
    re_asks_rules().is_match(message)
}
