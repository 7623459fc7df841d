//! Fuzzy matching for model search.

/// Score a candidate against a query with case-insensitive subsequence
/// matching. Returns `None` when the query is not a subsequence of the
/// candidate; higher scores mean better matches (contiguous runs and
/// prefix matches rank first).
pub fn fuzzy_score(query: &str, candidate: &str) -> Option<u32> {
  if query.is_empty() {
    return Some(0);
  }

  let query: Vec<char> = query.to_lowercase().chars().collect();
  let candidate: Vec<char> = candidate.to_lowercase().chars().collect();

  let mut score = 0u32;
  let mut qi = 0usize;
  let mut previous_match: Option<usize> = None;

  for (ci, c) in candidate.iter().enumerate() {
    if qi < query.len() && *c == query[qi] {
      // Contiguous matches are worth more than scattered ones.
      score += match previous_match {
        Some(prev) if prev + 1 == ci => 3,
        _ => 1,
      };
      if ci == qi {
        // Still matching from the start of the candidate.
        score += 1;
      }
      previous_match = Some(ci);
      qi += 1;
    }
  }

  if qi == query.len() { Some(score) } else { None }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exact_prefix_beats_scattered_match() {
    let prefix = fuzzy_score("flux", "flux-dev").unwrap();
    let scattered = fuzzy_score("flux", "fast-lane-upscale-x").unwrap();
    assert!(prefix > scattered);
  }

  #[test]
  fn non_subsequence_does_not_match() {
    assert_eq!(fuzzy_score("video", "flux-dev"), None);
  }

  #[test]
  fn matching_is_case_insensitive() {
    assert!(fuzzy_score("SDXL", "sdxl-turbo").is_some());
  }

  #[test]
  fn empty_query_matches_everything() {
    assert_eq!(fuzzy_score("", "anything"), Some(0));
  }
}
