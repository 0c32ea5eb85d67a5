//! City and state validation
//!
//! Municipal exports are sloppy about locality columns: the city field may
//! hold a ZIP code, a chunk of violation narrative, or nothing at all. This
//! module owns the single validation policy for city and state values and
//! the heuristics that recover a city from an address string when the city
//! column is unusable. The policy is deliberately strict; a dropped row is
//! cheaper than a property filed under the city "Overgrown Weeds".

use regex::Regex;
use std::sync::OnceLock;

/// Two-letter USPS state and territory codes.
const US_STATES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID",
    "IL", "IN", "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS",
    "MO", "MT", "NE", "NV", "NH", "NJ", "NM", "NY", "NC", "ND", "OH", "OK",
    "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT", "VA", "WA", "WV",
    "WI", "WY", "DC", "PR", "VI", "GU",
];

/// Known municipality names, lowercase.
///
/// Seeded with the metros our current customers operate in. A miss here is
/// not fatal; the structural checks in [`validate_city`] still apply to
/// unknown names, the gazetteer only powers recovery from address strings.
const CITY_GAZETTEER: &[&str] = &[
    "phoenix",
    "mesa",
    "tempe",
    "scottsdale",
    "chandler",
    "gilbert",
    "glendale",
    "peoria",
    "surprise",
    "avondale",
    "goodyear",
    "buckeye",
    "tucson",
    "el mirage",
    "fountain hills",
    "paradise valley",
    "queen creek",
    "casa grande",
    "flagstaff",
    "yuma",
    "las vegas",
    "north las vegas",
    "henderson",
    "reno",
    "albuquerque",
    "el paso",
    "san antonio",
    "austin",
    "dallas",
    "fort worth",
    "houston",
    "oklahoma city",
    "tulsa",
    "denver",
    "colorado springs",
    "aurora",
    "salt lake city",
    "boise",
    "fresno",
    "bakersfield",
    "riverside",
    "san bernardino",
];

/// Words that mark a "city" value as leaked violation narrative.
const VIOLATION_VOCABULARY: &[&str] = &[
    "violation",
    "notice",
    "weed",
    "weeds",
    "overgrown",
    "vegetation",
    "debris",
    "trash",
    "rubbish",
    "junk",
    "litter",
    "graffiti",
    "fence",
    "fencing",
    "repair",
    "structure",
    "structural",
    "vehicle",
    "inoperable",
    "abandoned",
    "abatement",
    "nuisance",
    "unsafe",
    "hazard",
    "hazardous",
    "dilapidated",
    "pool",
    "sewage",
    "permit",
    "zoning",
    "blight",
    "demolition",
    "dumping",
    "exterior",
    "property",
];

/// Street-type tokens that end the street portion of an address.
const STREET_SUFFIXES: &[&str] = &[
    "st", "street", "ave", "avenue", "rd", "road", "blvd", "boulevard", "dr",
    "drive", "ln", "lane", "ct", "court", "way", "pl", "place", "cir",
    "circle", "ter", "terrace", "pkwy", "parkway", "hwy", "highway", "trl",
    "trail", "loop",
];

fn zip_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{5}(-\d{4})?$").expect("valid zip regex"))
}

/// True if `value` is a bare 5-digit (or ZIP+4) postal code.
pub fn is_bare_zip(value: &str) -> bool {
    zip_regex().is_match(value.trim())
}

/// True if `value` is a recognized two-letter state code (case-insensitive).
pub fn is_valid_state(value: &str) -> bool {
    let v = value.trim().to_ascii_uppercase();
    US_STATES.contains(&v.as_str())
}

/// Normalize a state value to its uppercase two-letter form, if valid.
pub fn normalize_state(value: &str) -> Option<String> {
    let v = value.trim().to_ascii_uppercase();
    if US_STATES.contains(&v.as_str()) {
        Some(v)
    } else {
        None
    }
}

/// True if the gazetteer knows this city name.
pub fn is_known_city(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    CITY_GAZETTEER.contains(&v.as_str())
}

/// Validate a candidate city name.
///
/// Rejects empty values, bare ZIP codes, values containing violation
/// vocabulary, sentence punctuation, leading digits, characters outside
/// letters/space/hyphen/apostrophe, and values too long or too wordy to be
/// a municipality name.
pub fn validate_city(value: &str) -> bool {
    let v = value.trim();
    if v.is_empty() || v.len() > 40 {
        return false;
    }
    if is_bare_zip(v) {
        return false;
    }
    if v.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return false;
    }
    if !v
        .chars()
        .all(|c| c.is_alphabetic() || c == ' ' || c == '-' || c == '\'')
    {
        return false;
    }
    let words: Vec<&str> = v.split_whitespace().collect();
    if words.is_empty() || words.len() > 4 {
        return false;
    }
    let lowered = v.to_lowercase();
    for word in lowered.split(|c: char| !c.is_alphabetic()) {
        if !word.is_empty() && VIOLATION_VOCABULARY.contains(&word) {
            return false;
        }
    }
    true
}

/// Try to recover a city name from a full address string.
///
/// Two passes: first look for a gazetteer city at the tail of the address
/// (after stripping any trailing ZIP and state tokens), then fall back to a
/// structural guess of trailing capitalized words after the street suffix.
/// Either result still has to pass [`validate_city`].
pub fn extract_city_from_address(address: &str) -> Option<String> {
    let cleaned = address.trim().trim_end_matches(|c: char| c == ',' || c == '.');
    if cleaned.is_empty() {
        return None;
    }

    let mut tokens: Vec<&str> = cleaned
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();

    // Strip trailing ZIP and state so "123 Main St Phoenix AZ 85001" and
    // "123 Main St Phoenix" reduce to the same tail.
    if tokens.last().is_some_and(|t| is_bare_zip(t)) {
        tokens.pop();
    }
    if tokens.last().is_some_and(|t| is_valid_state(t)) {
        tokens.pop();
    }

    if tokens.is_empty() {
        return None;
    }

    let lowered: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();

    // Gazetteer pass: longest city names first so "north las vegas" wins
    // over "las vegas".
    let mut cities: Vec<&str> = CITY_GAZETTEER.to_vec();
    cities.sort_by_key(|c| std::cmp::Reverse(c.split(' ').count()));
    for city in cities {
        let city_tokens: Vec<&str> = city.split(' ').collect();
        if city_tokens.len() > lowered.len() {
            continue;
        }
        let tail = &lowered[lowered.len() - city_tokens.len()..];
        if tail.iter().map(String::as_str).eq(city_tokens.iter().copied()) {
            let original = &tokens[tokens.len() - city_tokens.len()..];
            return Some(original.join(" "));
        }
    }

    // Structural pass: take the words after the last street suffix token.
    let suffix_pos = lowered
        .iter()
        .rposition(|t| STREET_SUFFIXES.contains(&t.trim_end_matches('.').to_lowercase().as_str()))?;
    let tail = &tokens[suffix_pos + 1..];
    if tail.is_empty() || tail.len() > 3 {
        return None;
    }
    // Require capitalized alphabetic words; unit numbers and direction
    // abbreviations do not qualify.
    if !tail.iter().all(|t| {
        t.chars().next().is_some_and(|c| c.is_uppercase())
            && t.chars().all(|c| c.is_alphabetic())
            && t.len() > 2
    }) {
        return None;
    }
    let candidate = tail.join(" ");
    if validate_city(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

/// Pull a trailing state code out of an address string, if present.
pub fn extract_state_from_address(address: &str) -> Option<String> {
    let mut tokens: Vec<&str> = address
        .trim()
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.last().is_some_and(|t| is_bare_zip(t)) {
        tokens.pop();
    }
    tokens.last().and_then(|t| normalize_state(t))
}

/// Pull a trailing ZIP code out of an address string, if present.
pub fn extract_zip_from_address(address: &str) -> Option<String> {
    address
        .trim()
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .next_back()
        .filter(|t| is_bare_zip(t))
        .map(|t| t.to_string())
}

/// Lowercase `city_state` slug used in split blob keys, e.g. `phoenix_az`.
pub fn locality_slug(city: &str, state: &str) -> String {
    let city_part: String = city
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_{}", city_part, state.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_validation() {
        assert!(is_valid_state("AZ"));
        assert!(is_valid_state("az"));
        assert!(is_valid_state(" tx "));
        assert!(!is_valid_state("ZZ"));
        assert!(!is_valid_state("Arizona"));
        assert_eq!(normalize_state("az"), Some("AZ".to_string()));
        assert_eq!(normalize_state("XX"), None);
    }

    #[test]
    fn test_bare_zip() {
        assert!(is_bare_zip("85001"));
        assert!(is_bare_zip("85001-1234"));
        assert!(!is_bare_zip("8500"));
        assert!(!is_bare_zip("85001 Phoenix"));
        assert!(!is_bare_zip("Phoenix"));
    }

    #[test]
    fn test_validate_city_accepts_real_names() {
        assert!(validate_city("Phoenix"));
        assert!(validate_city("El Mirage"));
        assert!(validate_city("Coeur d'Alene"));
        assert!(validate_city("Winston-Salem"));
    }

    #[test]
    fn test_validate_city_rejects_violation_narrative() {
        assert!(!validate_city(
            "Overgrown weeds in backyard, must repair fence"
        ));
        assert!(!validate_city("Notice of Violation"));
        assert!(!validate_city("Trash"));
    }

    #[test]
    fn test_validate_city_rejects_structural_garbage() {
        assert!(!validate_city(""));
        assert!(!validate_city("85001"));
        assert!(!validate_city("123 Main St"));
        assert!(!validate_city("Some. Sentence. Here."));
        assert!(!validate_city("a b c d e f"));
    }

    #[test]
    fn test_extract_city_gazetteer_match() {
        assert_eq!(
            extract_city_from_address("123 Main St, Phoenix, AZ 85001"),
            Some("Phoenix".to_string())
        );
        assert_eq!(
            extract_city_from_address("4000 Craig Rd North Las Vegas NV"),
            Some("North Las Vegas".to_string())
        );
        assert_eq!(
            extract_city_from_address("77 E University Dr Tempe"),
            Some("Tempe".to_string())
        );
    }

    #[test]
    fn test_extract_city_structural_fallback() {
        assert_eq!(
            extract_city_from_address("900 Oak Ave Ridgefield WA 98642"),
            Some("Ridgefield".to_string())
        );
    }

    #[test]
    fn test_extract_city_gives_up_cleanly() {
        assert_eq!(extract_city_from_address("123 Main St"), None);
        assert_eq!(extract_city_from_address(""), None);
        assert_eq!(extract_city_from_address("PO Box 441"), None);
    }

    #[test]
    fn test_locality_slug() {
        assert_eq!(locality_slug("Phoenix", "AZ"), "phoenix_az");
        assert_eq!(locality_slug("El Mirage", "az"), "el_mirage_az");
    }
}
