use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::record::BusinessRecord;

static SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(INC|LLC|CORP|CO|LTD|INCORPORATED|CORPORATION)\.?\b").unwrap()
});
static NAME_PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s']").unwrap());
static SERVICE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(tow|towing|tows|towed|wrecker|wrecking)\b").unwrap());
static PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());
static STREET_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{2,})").unwrap());
static FALSE_POSITIVE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    FALSE_POSITIVE_PATTERNS
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

/// High-confidence phrases: one hit is enough.
const PRIMARY_KEYWORDS: &[&str] = &[
    "towing service",
    "tow truck",
    "tow service",
    "we tow",
    "our towing",
    "towing company",
    "wrecker service",
    "flatbed tow",
    "24 hour tow",
    "emergency towing",
    "24/7 towing",
    "local towing",
    "towing rates",
    "tow your",
    "towing needs",
    "professional towing",
    "towing available",
    "heavy duty towing",
    "light duty towing",
    "medium duty towing",
    "roadside assistance",
    "vehicle recovery",
    "accident recovery",
    "jump start",
    "lockout service",
    "winch out",
    "winching",
];

/// Broad tokens, discounted when they look like directory boilerplate.
const SECONDARY_KEYWORDS: &[&str] = &["towing", "tow", "wrecker", "wrecking"];

/// Listing/aggregator phrasing around the broad tokens.
const FALSE_POSITIVE_PATTERNS: &[&str] = &[
    r"towing in \w+",
    r"towing near \w+",
    r"towing services in \w+",
    r"\w+ towing companies",
    r"more towing",
    r"related.*towing",
    r"see more.*towing",
    r"other towing",
    r"find towing",
    r"search.*towing",
    r"browse.*towing",
    r"people also viewed.*towing",
    r"you might also like.*towing",
    r"similar.*towing",
];

/// Portion of the page (from the top) where a first-party mention is expected.
const LEADING_SHARE: f64 = 0.6;

/// Search engine, map, cache and app-store hosts never worth fetching.
const SKIP_DOMAINS: &[&str] = &[
    "duck.ai",
    "duckduckgo.com",
    "bing.com",
    "google.com",
    "apple.com",
    "apps.apple.com",
    "maps.apple.com",
    "webcache.googleusercontent.com",
];

/// Directories that reliably carry company profiles, best first.
const PRIORITY_DOMAINS: &[&str] = &[
    "facebook.com",
    "yellowpages.com",
    "mapquest.com",
    "bbb.org",
    "chamberofcommerce.com",
    "manta.com",
];

const UNRANKED: usize = 100;

const STATE_NAMES: &[(&str, &str)] = &[
    ("AL", "alabama"),
    ("AK", "alaska"),
    ("AZ", "arizona"),
    ("AR", "arkansas"),
    ("CA", "california"),
    ("CO", "colorado"),
    ("CT", "connecticut"),
    ("DE", "delaware"),
    ("DC", "district of columbia"),
    ("FL", "florida"),
    ("GA", "georgia"),
    ("HI", "hawaii"),
    ("ID", "idaho"),
    ("IL", "illinois"),
    ("IN", "indiana"),
    ("IA", "iowa"),
    ("KS", "kansas"),
    ("KY", "kentucky"),
    ("LA", "louisiana"),
    ("ME", "maine"),
    ("MD", "maryland"),
    ("MA", "massachusetts"),
    ("MI", "michigan"),
    ("MN", "minnesota"),
    ("MS", "mississippi"),
    ("MO", "missouri"),
    ("MT", "montana"),
    ("NE", "nebraska"),
    ("NV", "nevada"),
    ("NH", "new hampshire"),
    ("NJ", "new jersey"),
    ("NM", "new mexico"),
    ("NY", "new york"),
    ("NC", "north carolina"),
    ("ND", "north dakota"),
    ("OH", "ohio"),
    ("OK", "oklahoma"),
    ("OR", "oregon"),
    ("PA", "pennsylvania"),
    ("RI", "rhode island"),
    ("SC", "south carolina"),
    ("SD", "south dakota"),
    ("TN", "tennessee"),
    ("TX", "texas"),
    ("UT", "utah"),
    ("VT", "vermont"),
    ("VA", "virginia"),
    ("WA", "washington"),
    ("WV", "west virginia"),
    ("WI", "wisconsin"),
    ("WY", "wyoming"),
];

// ── Names ──

/// Strip entity suffixes and punctuation so the name works as a search phrase.
pub fn clean_name(raw: &str) -> Option<String> {
    let stripped = SUFFIX_RE.replace_all(raw, "");
    let stripped = stripped.replace('&', "and");
    let stripped = NAME_PUNCT_RE.replace_all(&stripped, " ");
    let cleaned = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// True when either name already says the company tows.
pub fn contains_service_term(legal_name: &str, alt_name: Option<&str>) -> bool {
    let text = format!("{} {}", legal_name, alt_name.unwrap_or(""));
    SERVICE_NAME_RE.is_match(&text)
}

// ── Page checks ──

/// Lower-case and drop punctuation.
pub fn normalize_text(text: &str) -> String {
    PUNCT_RE
        .replace_all(&text.to_lowercase(), "")
        .trim()
        .to_string()
}

pub fn state_name(code: &str) -> Option<&'static str> {
    let code = code.trim().to_ascii_uppercase();
    STATE_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// City plus (zip or state name), or zip plus street number.
pub fn address_matches(page_text: &str, record: &BusinessRecord) -> bool {
    let page_norm = normalize_text(page_text);

    let city = normalize_text(record.city());
    let city_match = city.chars().count() > 2 && page_norm.contains(&city);

    let state_match = state_name(record.state())
        .map(|name| page_norm.contains(name))
        .unwrap_or(false);

    let zip: String = record.postal_code().trim().chars().take(5).collect();
    let zip_match = zip.chars().count() == 5
        && zip.chars().all(|c| c.is_ascii_digit())
        && page_text.contains(&zip);

    let street_match = STREET_NUMBER_RE
        .captures(record.street().trim())
        .map(|caps| page_text.contains(&caps[1]))
        .unwrap_or(false);

    (city_match && (zip_match || state_match)) || (zip_match && street_match)
}

/// Two-tier keyword check favouring precision over recall.
pub fn mentions_service(page_text: &str) -> bool {
    let page_lower = page_text.to_lowercase();

    if PRIMARY_KEYWORDS.iter().any(|kw| page_lower.contains(kw)) {
        return true;
    }

    if !SECONDARY_KEYWORDS.iter().any(|kw| page_lower.contains(kw)) {
        return false;
    }

    for pattern in FALSE_POSITIVE_RES.iter() {
        if pattern.is_match(&page_lower) {
            let leading = leading_portion(&page_lower, LEADING_SHARE);
            if !SECONDARY_KEYWORDS.iter().any(|kw| leading.contains(kw)) {
                return false;
            }
        }
    }

    true
}

fn leading_portion(text: &str, share: f64) -> &str {
    let cut = (text.chars().count() as f64 * share) as usize;
    match text.char_indices().nth(cut) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ── URLs ──

/// http(s) URLs that are not on the skip list.
pub fn is_eligible_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return false;
    }
    !SKIP_DOMAINS.iter().any(|d| lower.contains(d))
}

pub fn domain_priority(url: &str) -> usize {
    let lower = url.to_lowercase();
    PRIORITY_DOMAINS
        .iter()
        .position(|d| lower.contains(d))
        .unwrap_or(UNRANKED)
}

/// Dedupe, then stable-sort by directory priority.
pub fn rank_by_priority_domain(urls: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique: Vec<String> = urls
        .iter()
        .filter(|u| seen.insert(u.as_str()))
        .cloned()
        .collect();
    unique.sort_by_key(|u| domain_priority(u));
    unique
}

/// Host part of a URL, for log lines.
pub fn display_host(url: &str) -> &str {
    url.split('/').nth(2).unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hartford() -> BusinessRecord {
        let mut r = BusinessRecord::new(1002, "Acme Recovery Co");
        r.street = Some("125 Main St".into());
        r.city = Some("Hartford".into());
        r.state = Some("CT".into());
        r.postal_code = Some("06103".into());
        r
    }

    #[test]
    fn clean_name_strips_suffixes_and_punctuation() {
        assert_eq!(clean_name("Acme Towing LLC").as_deref(), Some("Acme Towing"));
        assert_eq!(clean_name("Smith & Sons, Inc.").as_deref(), Some("Smith and Sons"));
        assert_eq!(clean_name("Bob's Auto Corp").as_deref(), Some("Bob's Auto"));
        assert_eq!(clean_name("  A-1   Recovery  ").as_deref(), Some("A 1 Recovery"));
        assert_eq!(clean_name("LLC"), None);
        assert_eq!(clean_name("  ...  "), None);
    }

    #[test]
    fn clean_name_keeps_words_containing_suffixes() {
        assert_eq!(clean_name("Coastal Cooper Ltd").as_deref(), Some("Coastal Cooper"));
        assert_eq!(clean_name("Incline Corporation").as_deref(), Some("Incline"));
    }

    #[test]
    fn clean_name_is_idempotent() {
        let inputs = [
            "Acme Towing LLC",
            "Smith & Sons, Inc.",
            "A&CO",
            "J.R.'s Wrecker Svc. Co.",
            "North-East Transport Corp.",
            "inc. llc co. Big Rig",
        ];
        for raw in inputs {
            let once = clean_name(raw).unwrap();
            assert_eq!(clean_name(&once).as_deref(), Some(once.as_str()), "{raw}");
        }
    }

    #[test]
    fn service_term_whole_words_only() {
        assert!(contains_service_term("Acme Towing LLC", None));
        assert!(contains_service_term("ACME TOW INC", None));
        assert!(contains_service_term("Acme Recovery", Some("Bay Wrecker")));
        assert!(!contains_service_term("Downtown Logistics", None));
        assert!(!contains_service_term("Towne Motors", Some("Tower Freight")));
    }

    #[test]
    fn address_city_and_zip() {
        let r = hartford();
        assert!(address_matches("Visit us in Hartford, 06103 today", &r));
        assert!(!address_matches("Visit us in Springfield", &r));
    }

    #[test]
    fn address_city_and_state_name() {
        let r = hartford();
        assert!(address_matches("Serving HARTFORD, Connecticut since 1980", &r));
        assert!(!address_matches("Serving Hartford only", &r));
    }

    #[test]
    fn address_zip_and_street_number() {
        let r = hartford();
        assert!(address_matches("125 Main Street, 06103", &r));
        assert!(!address_matches("99 Elm Street, 06103", &r));
    }

    #[test]
    fn address_ignores_short_city_and_bad_zip() {
        let mut r = hartford();
        r.city = Some("Ax".into());
        r.postal_code = Some("0610".into());
        assert!(!address_matches("ax 0610 connecticut", &r));
    }

    #[test]
    fn zip_plus_four_uses_first_five() {
        let mut r = hartford();
        r.postal_code = Some("06103-2211".into());
        assert!(address_matches("Hartford 06103", &r));
    }

    #[test]
    fn primary_keyword_wins() {
        assert!(mentions_service("We offer 24/7 towing across the county."));
        assert!(mentions_service("ROADSIDE ASSISTANCE available"));
    }

    #[test]
    fn no_keywords_at_all() {
        assert!(!mentions_service("Landscaping and snow removal."));
    }

    #[test]
    fn directory_boilerplate_is_rejected() {
        let text = "Green Valley Landscaping. We mow lawns, trim hedges and plant gardens \
                    for homes and businesses. Call for a free quote on any yard project. \
                    Related searches: towing near Boston";
        assert!(!mentions_service(text));
    }

    #[test]
    fn early_mention_survives_boilerplate() {
        let text = "Joe's tow and wrecker outfit, family owned. \
                    Related searches: towing near Boston";
        assert!(mentions_service(text));
    }

    #[test]
    fn broad_token_without_boilerplate_passes() {
        assert!(mentions_service("Call Joe for a tow anytime."));
    }

    #[test]
    fn eligible_urls() {
        assert!(is_eligible_url("https://acmerecovery.com/contact"));
        assert!(is_eligible_url("http://example.org"));
        assert!(!is_eligible_url("ftp://example.org"));
        assert!(!is_eligible_url("/relative/link"));
        assert!(!is_eligible_url("https://duckduckgo.com/?q=x"));
        assert!(!is_eligible_url("https://maps.apple.com/place"));
    }

    #[test]
    fn ranking_prefers_directories_and_dedupes() {
        let urls: Vec<String> = [
            "https://acme.com",
            "https://www.manta.com/c/acme",
            "https://other.net",
            "https://www.facebook.com/acme",
            "https://acme.com",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let ranked = rank_by_priority_domain(&urls);
        assert_eq!(
            ranked,
            vec![
                "https://www.facebook.com/acme",
                "https://www.manta.com/c/acme",
                "https://acme.com",
                "https://other.net",
            ]
        );
    }

    #[test]
    fn host_for_logs() {
        assert_eq!(display_host("https://www.bbb.org/us/ct"), "www.bbb.org");
        assert_eq!(display_host("nonsense"), "nonsense");
    }
}
