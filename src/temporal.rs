use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone, Weekday};
use regex::Regex;

/// What a query's temporal phrasing resolved to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemporalResolution {
    /// Inclusive lower bound, epoch ms.
    pub since: Option<i64>,
    /// Exclusive upper bound, epoch ms.
    pub until: Option<i64>,
    /// Recency half-life hint for scoring, in days.
    pub recency_boost: Option<f64>,
    /// Explicit `YYYY-MM-DD` terms usable as extra search terms.
    pub date_terms: Vec<String>,
    /// The query with the matched temporal phrase removed.
    pub stripped_query: String,
    /// The query points at the future (next week, plans, deadlines).
    pub forward_looking: bool,
    /// Content terms for rescuing future-oriented chunks (e.g. a month name).
    pub forward_terms: Vec<String>,
}

pub fn date_to_ms_local(date: NaiveDate) -> i64 {
    let midnight = date.and_hms_opt(0, 0, 0).expect("valid midnight");
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| midnight.and_utc().timestamp_millis())
}

fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Sunday-start week containing `date`.
fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_sunday() as i64)
}

fn month_start(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn next_month_start(year: i32, month: u32) -> Option<NaiveDate> {
    if month == 12 {
        month_start(year + 1, 1)
    } else {
        month_start(year, month + 1)
    }
}

fn weekday_from_name(name: &str) -> Weekday {
    match name.to_lowercase().as_str() {
        "sunday" => Weekday::Sun,
        "monday" => Weekday::Mon,
        "tuesday" => Weekday::Tue,
        "wednesday" => Weekday::Wed,
        "thursday" => Weekday::Thu,
        "friday" => Weekday::Fri,
        _ => Weekday::Sat,
    }
}

fn month_from_name(name: &str) -> u32 {
    match name.to_lowercase().as_str() {
        "january" => 1,
        "february" => 2,
        "march" => 3,
        "april" => 4,
        "may" => 5,
        "june" => 6,
        "july" => 7,
        "august" => 8,
        "september" => 9,
        "october" => 10,
        "november" => 11,
        _ => 12,
    }
}

macro_rules! cached_re {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).unwrap())
        }
    };
}

cached_re!(re_day_before, r"(?i)\bday\s+before\s+yesterday\b");
cached_re!(re_yesterday, r"(?i)\byesterday\b");
cached_re!(re_today, r"(?i)\b(?:this\s+morning|this\s+evening|tonight|today)\b");
cached_re!(re_days_ago, r"(?i)\b(\d{1,3})\s+days?\s+ago\b");
cached_re!(
    re_day_of_last_week,
    r"(?i)\b(?:on\s+)?(sunday|monday|tuesday|wednesday|thursday|friday|saturday)\s+of\s+(?:this\s+)?last\s+week\b"
);
cached_re!(
    re_last_weeks_day,
    r"(?i)\blast\s+week'?s\s+(sunday|monday|tuesday|wednesday|thursday|friday|saturday)\b"
);
cached_re!(
    re_last_day,
    r"(?i)\blast\s+(sunday|monday|tuesday|wednesday|thursday|friday|saturday)\b"
);
cached_re!(
    re_bare_day,
    r"(?i)\b(?:on\s+)?(sunday|monday|tuesday|wednesday|thursday|friday|saturday)\b"
);
cached_re!(re_this_week, r"(?i)\bthis\s+week\b");
cached_re!(re_last_week, r"(?i)\blast\s+week\b");
cached_re!(re_next_week, r"(?i)\bnext\s+week\b");
cached_re!(re_this_month, r"(?i)\bthis\s+month\b");
cached_re!(re_last_month, r"(?i)\blast\s+month\b");
cached_re!(re_next_month, r"(?i)\bnext\s+month\b");
cached_re!(
    re_in_month,
    r"(?i)\bin\s+(january|february|march|april|may|june|july|august|september|october|november|december)\b"
);
cached_re!(re_recently, r"(?i)\b(?:recently|lately)\b");
cached_re!(
    re_few_days,
    r"(?i)\b(?:last|past)\s+(?:few|couple(?:\s+of)?)\s+(?:days)\b"
);
cached_re!(
    re_when_did,
    r"(?i)\bwhen\s+did\s+(?:i|we)\s+(?:start|begin|stop|quit)\b"
);
cached_re!(
    re_forward_keywords,
    r"(?i)\b(?:plan|plans|planned|planning|goal|goals|schedule|scheduled|upcoming|deadline|deadlines|due|milestones?|todo|to-do|coming\s+up)\b"
);
cached_re!(
    re_speech_verb,
    r"(?i)\b(?:said|says?|saying|mentioned|talked|told|asked|suggested|argued|discussed|brought\s+up|pointed\s+out|noted|explained|described|proposed|recommended|warned|claimed|stated|announced|reported)\b"
);

/// Resolve natural-language temporal phrasing in a query against `now`.
/// The first matching category wins the date window; forward-looking
/// keywords are detected independently and are not stripped.
pub fn resolve_temporal_query(query: &str, now: DateTime<Local>) -> TemporalResolution {
    let today = now.date_naive();
    let mut res = TemporalResolution {
        stripped_query: query.to_string(),
        ..Default::default()
    };

    let mut matched_span: Option<(usize, usize)> = None;

    // Single-day helper: [day, day+1)
    let single_day = |res: &mut TemporalResolution, day: NaiveDate| {
        res.since = Some(date_to_ms_local(day));
        res.until = Some(date_to_ms_local(day + Duration::days(1)));
        res.date_terms.push(fmt_date(day));
    };

    if let Some(m) = re_day_before().find(query) {
        single_day(&mut res, today - Duration::days(2));
        matched_span = Some((m.start(), m.end()));
    } else if let Some(m) = re_yesterday().find(query) {
        single_day(&mut res, today - Duration::days(1));
        matched_span = Some((m.start(), m.end()));
    } else if let Some(m) = re_today().find(query) {
        res.since = Some(date_to_ms_local(today));
        res.date_terms.push(fmt_date(today));
        matched_span = Some((m.start(), m.end()));
    } else if let Some(caps) = re_days_ago().captures(query) {
        let n: i64 = caps[1].parse().unwrap_or(0);
        if n > 0 && n < 365 {
            single_day(&mut res, today - Duration::days(n));
            let m = caps.get(0).unwrap();
            matched_span = Some((m.start(), m.end()));
        }
    } else if let Some(caps) = re_day_of_last_week()
        .captures(query)
        .or_else(|| re_last_weeks_day().captures(query))
    {
        let target = weekday_from_name(&caps[1]);
        let prev_week = week_start(today) - Duration::days(7);
        let day = prev_week + Duration::days(target.num_days_from_sunday() as i64);
        single_day(&mut res, day);
        let m = caps.get(0).unwrap();
        matched_span = Some((m.start(), m.end()));
    } else if let Some(caps) = re_last_day().captures(query) {
        let target = weekday_from_name(&caps[1]);
        let mut day = today - Duration::days(1);
        while day.weekday() != target {
            day -= Duration::days(1);
        }
        // "last monday" on a Monday means a full week back, which the
        // backwards walk already guarantees by starting at yesterday.
        single_day(&mut res, day);
        let m = caps.get(0).unwrap();
        matched_span = Some((m.start(), m.end()));
    } else if let Some(caps) = re_bare_day().captures(query) {
        let target = weekday_from_name(&caps[1]);
        let this_week = week_start(today) + Duration::days(target.num_days_from_sunday() as i64);
        let day = if this_week <= today {
            this_week
        } else {
            this_week - Duration::days(7)
        };
        single_day(&mut res, day);
        let m = caps.get(0).unwrap();
        matched_span = Some((m.start(), m.end()));
    } else if let Some(m) = re_this_week().find(query) {
        res.since = Some(date_to_ms_local(week_start(today)));
        res.recency_boost = Some(7.0);
        matched_span = Some((m.start(), m.end()));
    } else if let Some(m) = re_next_week().find(query) {
        let start = week_start(today) + Duration::days(7);
        res.since = Some(date_to_ms_local(start));
        res.until = Some(date_to_ms_local(start + Duration::days(7)));
        res.recency_boost = Some(14.0);
        res.forward_looking = true;
        matched_span = Some((m.start(), m.end()));
    } else if let Some(m) = re_last_week().find(query) {
        let start = week_start(today) - Duration::days(7);
        res.since = Some(date_to_ms_local(start));
        res.until = Some(date_to_ms_local(week_start(today)));
        res.recency_boost = Some(14.0);
        matched_span = Some((m.start(), m.end()));
    } else if let Some(m) = re_this_month().find(query) {
        if let Some(start) = month_start(today.year(), today.month()) {
            res.since = Some(date_to_ms_local(start));
            res.recency_boost = Some(14.0);
            matched_span = Some((m.start(), m.end()));
        }
    } else if let Some(m) = re_next_month().find(query) {
        if let (Some(start), Some(after)) = (
            next_month_start(today.year(), today.month()),
            next_month_start(today.year(), today.month())
                .and_then(|d| next_month_start(d.year(), d.month())),
        ) {
            res.since = Some(date_to_ms_local(start));
            res.until = Some(date_to_ms_local(after));
            res.recency_boost = Some(30.0);
            res.forward_looking = true;
            matched_span = Some((m.start(), m.end()));
        }
    } else if let Some(m) = re_last_month().find(query) {
        let (py, pm) = if today.month() == 1 {
            (today.year() - 1, 12)
        } else {
            (today.year(), today.month() - 1)
        };
        if let (Some(start), Some(end)) = (month_start(py, pm), month_start(today.year(), today.month())) {
            res.since = Some(date_to_ms_local(start));
            res.until = Some(date_to_ms_local(end));
            res.recency_boost = Some(30.0);
            matched_span = Some((m.start(), m.end()));
        }
    } else if let Some(caps) = re_in_month().captures(query) {
        let month = month_from_name(&caps[1]);
        if let (Some(start), Some(end)) = (
            month_start(today.year(), month),
            next_month_start(today.year(), month),
        ) {
            res.since = Some(date_to_ms_local(start));
            res.until = Some(date_to_ms_local(end));
            if start > today {
                res.forward_looking = true;
                res.forward_terms.push(caps[1].to_lowercase());
            }
            let m = caps.get(0).unwrap();
            matched_span = Some((m.start(), m.end()));
        }
    } else if let Some(m) = re_recently().find(query) {
        res.since = Some((now - Duration::days(7)).timestamp_millis());
        res.recency_boost = Some(7.0);
        matched_span = Some((m.start(), m.end()));
    } else if let Some(m) = re_few_days().find(query) {
        res.since = Some((now - Duration::days(3)).timestamp_millis());
        res.recency_boost = Some(7.0);
        matched_span = Some((m.start(), m.end()));
    }

    if res.recency_boost.is_none() && re_when_did().is_match(query) {
        res.recency_boost = Some(90.0);
    }

    // Forward-looking content keywords flag the query but stay in it.
    if re_forward_keywords().is_match(query) {
        res.forward_looking = true;
    }

    if let Some((start, end)) = matched_span {
        let mut stripped = String::with_capacity(query.len());
        stripped.push_str(&query[..start]);
        stripped.push(' ');
        stripped.push_str(&query[end..]);
        res.stripped_query = normalize_whitespace(&stripped);
    }

    res
}

fn normalize_whitespace(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    // Re-attach punctuation orphaned by phrase removal.
    collapsed
        .replace(" ?", "?")
        .replace(" !", "!")
        .replace(" .", ".")
        .replace(" ,", ",")
        .replace(" ;", ";")
        .replace(" :", ":")
        .trim()
        .to_string()
}

/// Does the message ask what a known entity said? Checks for a speech verb
/// plus an entity substring; returns the matched entity.
pub fn attribution_entity(message: &str, known_entities: &[String]) -> Option<String> {
    if !re_speech_verb().is_match(message) {
        return None;
    }
    let lowered = message.to_lowercase();
    known_entities
        .iter()
        .filter(|e| e.len() >= 2 && lowered.contains(e.as_str()))
        .max_by_key(|e| e.len())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str) -> DateTime<Local> {
        let naive = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap();
        Local.from_local_datetime(&naive).earliest().unwrap()
    }

    fn day_ms(date: &str) -> i64 {
        date_to_ms_local(NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap())
    }

    #[test]
    fn test_wednesday_of_last_week() {
        // 2026-02-28 is a Saturday.
        let res = resolve_temporal_query("What did I accomplish on Wednesday of last week?", at("2026-02-28"));
        assert_eq!(res.since, Some(day_ms("2026-02-18")));
        assert_eq!(res.until, Some(day_ms("2026-02-19")));
        assert_eq!(res.date_terms, vec!["2026-02-18"]);
        assert_eq!(res.stripped_query, "What did I accomplish?");
        assert!(!res.forward_looking);
    }

    #[test]
    fn test_last_weeks_dayname_variant() {
        let res = resolve_temporal_query("last week's friday notes", at("2026-02-28"));
        assert_eq!(res.date_terms, vec!["2026-02-20"]);
        assert_eq!(res.stripped_query, "notes");
    }

    #[test]
    fn test_today_and_yesterday() {
        let res = resolve_temporal_query("what happened today", at("2026-02-28"));
        assert_eq!(res.since, Some(day_ms("2026-02-28")));
        assert_eq!(res.until, None);
        assert_eq!(res.date_terms, vec!["2026-02-28"]);

        let res = resolve_temporal_query("what happened yesterday", at("2026-02-28"));
        assert_eq!(res.since, Some(day_ms("2026-02-27")));
        assert_eq!(res.until, Some(day_ms("2026-02-28")));
    }

    #[test]
    fn test_day_before_yesterday_and_n_days() {
        let res = resolve_temporal_query("the day before yesterday", at("2026-02-28"));
        assert_eq!(res.since, Some(day_ms("2026-02-26")));
        assert_eq!(res.until, Some(day_ms("2026-02-27")));

        let res = resolve_temporal_query("notes from 3 days ago", at("2026-02-28"));
        assert_eq!(res.since, Some(day_ms("2026-02-25")));
        assert_eq!(res.until, Some(day_ms("2026-02-26")));
        assert_eq!(res.stripped_query, "notes from");
    }

    #[test]
    fn test_last_dayname_full_week_back_on_same_day() {
        // Saturday asking about "last saturday" goes a full week back.
        let res = resolve_temporal_query("last saturday", at("2026-02-28"));
        assert_eq!(res.date_terms, vec!["2026-02-21"]);
    }

    #[test]
    fn test_bare_dayname_current_week() {
        // Saturday 2026-02-28; Wednesday of the current week is 02-25.
        let res = resolve_temporal_query("what did I do on wednesday", at("2026-02-28"));
        assert_eq!(res.date_terms, vec!["2026-02-25"]);
    }

    #[test]
    fn test_bare_dayname_not_yet_this_week() {
        // Monday 2026-02-23; Friday has not happened yet this week.
        let res = resolve_temporal_query("on friday", at("2026-02-23"));
        assert_eq!(res.date_terms, vec!["2026-02-20"]);
    }

    #[test]
    fn test_week_windows() {
        let res = resolve_temporal_query("this week", at("2026-02-28"));
        assert_eq!(res.since, Some(day_ms("2026-02-22")));
        assert_eq!(res.recency_boost, Some(7.0));

        let res = resolve_temporal_query("last week", at("2026-02-28"));
        assert_eq!(res.since, Some(day_ms("2026-02-15")));
        assert_eq!(res.until, Some(day_ms("2026-02-22")));
        assert_eq!(res.recency_boost, Some(14.0));

        let res = resolve_temporal_query("next week", at("2026-02-28"));
        assert_eq!(res.since, Some(day_ms("2026-03-01")));
        assert_eq!(res.until, Some(day_ms("2026-03-08")));
        assert!(res.forward_looking);
    }

    #[test]
    fn test_month_windows() {
        let res = resolve_temporal_query("goals for next month", at("2026-02-28"));
        assert_eq!(res.since, Some(day_ms("2026-03-01")));
        assert_eq!(res.until, Some(day_ms("2026-04-01")));
        assert!(res.forward_looking);

        let res = resolve_temporal_query("last month", at("2026-01-15"));
        assert_eq!(res.since, Some(day_ms("2025-12-01")));
        assert_eq!(res.until, Some(day_ms("2026-01-01")));
    }

    #[test]
    fn test_in_month_future_sets_forward_terms() {
        let res = resolve_temporal_query("what's happening in june", at("2026-02-28"));
        assert_eq!(res.since, Some(day_ms("2026-06-01")));
        assert_eq!(res.until, Some(day_ms("2026-07-01")));
        assert!(res.forward_looking);
        assert_eq!(res.forward_terms, vec!["june"]);

        let res = resolve_temporal_query("what happened in january", at("2026-02-28"));
        assert!(!res.forward_looking);
        assert!(res.forward_terms.is_empty());
    }

    #[test]
    fn test_recently_and_few_days() {
        let now = at("2026-02-28");
        let res = resolve_temporal_query("what did we discuss recently", now);
        assert_eq!(res.since, Some((now - Duration::days(7)).timestamp_millis()));
        assert_eq!(res.recency_boost, Some(7.0));

        let res = resolve_temporal_query("the past couple of days", now);
        assert_eq!(res.since, Some((now - Duration::days(3)).timestamp_millis()));
    }

    #[test]
    fn test_when_did_recency() {
        let res = resolve_temporal_query("when did I start lifting", at("2026-02-28"));
        assert_eq!(res.recency_boost, Some(90.0));
        assert_eq!(res.since, None);
    }

    #[test]
    fn test_forward_keywords_not_stripped() {
        let res = resolve_temporal_query("what are my deadlines", at("2026-02-28"));
        assert!(res.forward_looking);
        assert_eq!(res.stripped_query, "what are my deadlines");
        assert_eq!(res.since, None);
    }

    #[test]
    fn test_no_temporal_content() {
        let res = resolve_temporal_query("redis cache ttl", at("2026-02-28"));
        assert_eq!(res, TemporalResolution {
            stripped_query: "redis cache ttl".to_string(),
            ..Default::default()
        });
    }

    #[test]
    fn test_attribution() {
        let entities = vec!["sam".to_string(), "redis".to_string()];
        assert_eq!(
            attribution_entity("What did Sam say about the launch?", &entities),
            Some("sam".to_string())
        );
        assert_eq!(attribution_entity("What about Sam?", &entities), None);
        assert_eq!(
            attribution_entity("what was mentioned about redis", &entities),
            Some("redis".to_string())
        );
        assert_eq!(attribution_entity("what did Alex say", &entities), None);
    }
}
