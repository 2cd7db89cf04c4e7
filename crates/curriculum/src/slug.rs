//! Deterministic title → key mapping shared by the repository, the memory
//! index and the bundler.
//!
//! A slug is lowercase ASCII `[a-z0-9]` runs joined by single hyphens.  Common
//! Latin diacritics are folded to their base letter; everything else (other
//! scripts, punctuation, whitespace) collapses into a separator.  Input that
//! leaves nothing behind maps to [`FALLBACK_SLUG`] so callers can always use
//! the result as a path segment or map key.

/// Placeholder returned when the input contains no usable characters.
pub const FALLBACK_SLUG: &str = "untitled";

/// Normalise arbitrary text into a slug.
///
/// Pure, total and idempotent: `normalize(&normalize(s)) == normalize(s)`.
pub fn normalize(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;

    for ch in text.chars().flat_map(char::to_lowercase) {
        // Combining marks belong to the preceding letter.
        if ('\u{0300}'..='\u{036F}').contains(&ch) {
            continue;
        }
        let folded = fold_diacritic(ch);
        if folded.is_ascii_lowercase() || folded.is_ascii_digit() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(folded);
        } else if folded == 'ß' {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push_str("ss");
        } else {
            pending_hyphen = true;
        }
    }

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// True when `candidate` is already in normalised form.
pub fn is_normalized(candidate: &str) -> bool {
    !candidate.is_empty()
        && !candidate.starts_with('-')
        && !candidate.ends_with('-')
        && !candidate.contains("--")
        && candidate
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn fold_diacritic(ch: char) -> char {
    match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'ç' | 'ć' | 'č' => 'c',
        'ď' | 'đ' => 'd',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => 'e',
        'ğ' => 'g',
        'ḥ' => 'h',
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' | 'ı' => 'i',
        'ł' => 'l',
        'ñ' | 'ń' | 'ň' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => 'o',
        'ř' => 'r',
        'ś' | 'š' | 'ş' | 'ṣ' => 's',
        'ť' | 'ţ' | 'ṭ' => 't',
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => 'u',
        'ý' | 'ÿ' => 'y',
        'ź' | 'ż' | 'ž' | 'ẓ' => 'z',
        other => other,
    }
}
