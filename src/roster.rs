use serde::{Deserialize, Serialize};

/// One person on the class roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub name: String,
    pub role: String,
}

/// Best roster match for a piece of OCR text, with its similarity score.
///
/// Returns `None` when the text is blank or the roster is empty; a match is
/// always returned otherwise, however weak, and the caller decides what
/// score is trustworthy.
pub fn best_match<'a>(ocr_text: &str, roster: &'a [RosterEntry]) -> Option<(&'a str, f32)> {
    let text = ocr_text.trim();
    if text.is_empty() {
        return None;
    }

    roster
        .iter()
        .map(|entry| (entry.name.as_str(), similarity_ratio(text, &entry.name)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

/// Ratcliff/Obershelp similarity: twice the total length of recursively
/// matched common substrings, divided by the combined length. 1.0 for equal
/// strings, 0.0 for strings with no characters in common.
pub fn similarity_ratio(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let matched = matching_total(&a, &b);
    2.0 * matched as f32 / (a.len() + b.len()) as f32
}

/// Total characters matched: the longest common substring, plus whatever
/// matches recursively to its left and right.
fn matching_total(a: &[char], b: &[char]) -> usize {
    let (a_start, b_start, length) = longest_common_substring(a, b);
    if length == 0 {
        return 0;
    }

    length
        + matching_total(&a[..a_start], &b[..b_start])
        + matching_total(&a[a_start + length..], &b[b_start + length..])
}

fn longest_common_substring(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    // Lengths of common suffixes ending at the previous row of b.
    let mut previous = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        let mut current = vec![0usize; b.len() + 1];
        for (j, &cb) in b.iter().enumerate() {
            if ca == cb {
                let length = previous[j] + 1;
                current[j + 1] = length;
                if length > best.2 {
                    best = (i + 1 - length, j + 1 - length, length);
                }
            }
        }
        previous = current;
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Vec<RosterEntry> {
        [
            ("Park, Ji Min", "Student"),
            ("Kim, Soo Ahn", "Student"),
            ("Lee, Yoon Jae", "Instructor"),
        ]
        .iter()
        .map(|&(name, role)| RosterEntry {
            name: name.to_string(),
            role: role.to_string(),
        })
        .collect()
    }

    #[test]
    fn identical_strings_score_one() {
        assert!((similarity_ratio("Park, Ji Min", "Park, Ji Min") - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn disjoint_strings_score_zero() {
        assert_eq!(similarity_ratio("abc", "xyz"), 0.0);
    }

    #[test]
    fn ratio_matches_the_classic_example() {
        // "abcd" vs "bcde": common block "bcd", 2*3/8.
        assert!((similarity_ratio("abcd", "bcde") - 0.75).abs() < 1e-6);
    }

    #[test]
    fn garbled_ocr_still_finds_the_right_person() {
        let roster = roster();
        let (name, score) = best_match("Pork Ji Mn", &roster).unwrap();
        assert_eq!(name, "Park, Ji Min");
        assert!(score > 0.6, "score {}", score);
        assert!(score < 1.0);
    }

    #[test]
    fn blank_text_matches_nobody() {
        assert_eq!(best_match("", &roster()), None);
        assert_eq!(best_match("   ", &roster()), None);
    }

    #[test]
    fn empty_roster_matches_nobody() {
        assert_eq!(best_match("Park, Ji Min", &[]), None);
    }
}
