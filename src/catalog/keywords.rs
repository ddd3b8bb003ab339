//! Keyword extraction over mixed Persian/English chat text.

const MIN_KEYWORD_CHARS: usize = 3;
const MAX_KEYWORDS: usize = 8;

fn is_keyword_char(c: char) -> bool {
    // ASCII letters/digits plus the Arabic block covering Persian script.
    c.is_ascii_alphanumeric() || ('\u{0600}'..='\u{06FF}').contains(&c)
}

/// Split `text` into keyword tokens: maximal runs of keyword characters,
/// lowercased, at least three chars long, deduplicated in first-seen order,
/// capped at eight.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    let mut current = String::new();

    let mut push = |keywords: &mut Vec<String>, token: &mut String| {
        if token.chars().count() >= MIN_KEYWORD_CHARS {
            let lowered = token.to_lowercase();
            if !keywords.contains(&lowered) {
                keywords.push(lowered);
            }
        }
        token.clear();
    };

    for c in text.chars() {
        if is_keyword_char(c) {
            current.push(c);
        } else {
            push(&mut keywords, &mut current);
        }
        if keywords.len() >= MAX_KEYWORDS {
            return keywords;
        }
    }
    push(&mut keywords, &mut current);
    keywords.truncate(MAX_KEYWORDS);
    keywords
}
