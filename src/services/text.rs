use std::collections::HashSet;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Minimum score a candidate needs before `best_match` accepts it.
pub const MATCH_FLOOR: f64 = 0.34;

/// Lowercases, strips accents and collapses whitespace.
pub fn normalize(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let stripped: String = lowered.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn token_overlap(a: &str, b: &str) -> f64 {
    let aset: HashSet<&str> = a.split(' ').collect();
    let bset: HashSet<&str> = b.split(' ').collect();
    let inter = aset.intersection(&bset).count();
    let union = aset.union(&bset).count().max(1);
    inter as f64 / union as f64
}

/// Similarity of two already-normalized strings.
pub fn similarity(needle: &str, candidate: &str) -> f64 {
    if needle == candidate {
        1.0
    } else if candidate.contains(needle) || needle.contains(candidate) {
        0.92
    } else if candidate.starts_with(needle) || needle.starts_with(candidate) {
        0.85
    } else {
        token_overlap(needle, candidate)
    }
}

/// Best scoring candidate and its score, before the acceptance floor.
/// Ties keep the earliest candidate.
pub fn best_scored<'a, I, S>(needle: &str, haystack: I) -> Option<(f64, &'a str)>
where
    I: IntoIterator<Item = &'a S>,
    S: AsRef<str> + 'a + ?Sized,
{
    let needle_n = normalize(needle);
    if needle_n.is_empty() {
        return None;
    }

    let mut best: Option<(f64, &'a str)> = None;
    for cand in haystack {
        let cand = cand.as_ref();
        let cand_n = normalize(cand);
        if cand_n.is_empty() {
            continue;
        }
        let score = similarity(&needle_n, &cand_n);
        if best.map_or(true, |(s, _)| score > s) {
            best = Some((score, cand));
        }
    }
    best
}

/// Resolves a user or model supplied name onto one of `haystack`.
pub fn best_match<'a, I, S>(needle: &str, haystack: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a S>,
    S: AsRef<str> + 'a + ?Sized,
{
    best_scored(needle, haystack)
        .filter(|(score, _)| *score >= MATCH_FLOOR)
        .map(|(_, name)| name)
}

/// Relevance of a column name to a free-text question.
pub fn score_column_against_question(column: &str, question: &str) -> f64 {
    let q = normalize(question);
    let c = normalize(column);
    if q.is_empty() || c.is_empty() {
        return 0.0;
    }
    if c == q {
        return 1.0;
    }
    if q.contains(&c) {
        return 0.95;
    }
    token_overlap(&c, &q)
}

/// True if any keyword (normalized) occurs in the normalized text at the
/// start of a word. Keywords may be stems: `duplicad` matches `duplicados`
/// but `sum` does not match `resumen`.
pub fn mentions_any(normalized_text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| mentions(normalized_text, &normalize(k)))
}

/// Like [`mentions_any`], but the keyword must also end a word, so `count`
/// matches `count rows` and not `country`.
pub fn mentions_any_word(normalized_text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| mentions_bounded(normalized_text, &normalize(w), true))
}

fn mentions(text: &str, keyword: &str) -> bool {
    mentions_bounded(text, keyword, false)
}

fn mentions_bounded(text: &str, keyword: &str, whole_word: bool) -> bool {
    if keyword.is_empty() {
        return false;
    }
    let boundary = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric());
    text.match_indices(keyword).any(|(idx, _)| {
        boundary(text[..idx].chars().next_back())
            && (!whole_word || boundary(text[idx + keyword.len()..].chars().next()))
    })
}

/// Truncates to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
