//! Human page-range strings to zero-based page indices

use log::warn;

/// Result of parsing a range string
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedRange {
    /// Zero-based indices in input order, deduplicated
    pub pages: Vec<usize>,
    /// True when parsing stopped early at the result cap
    pub truncated: bool,
}

/// Parse a range string like `"1-3,5,8"` against a document of `total_pages`.
///
/// Page numbers are 1-based in the string and 0-based in the output. A
/// reversed range `"5-1"` expands backward (5,4,3,2,1) so users can assemble
/// pages in reverse. Out-of-bounds numbers are dropped
/// per element, duplicates keep their first position, malformed tokens are
/// skipped with a warning, and the output stops at `max_results` entries.
#[must_use]
pub fn parse_page_range(range: &str, total_pages: usize, max_results: usize) -> ParsedRange {
    let mut out = ParsedRange::default();
    if range.is_empty() {
        return out;
    }

    let mut seen = vec![false; total_pages];
    for token in range.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let expanded = match expand_token(token, total_pages) {
            Some(pages) => pages,
            None => {
                warn!("ignoring malformed page token: {token:?}");
                continue;
            }
        };

        for page in expanded {
            if seen[page] {
                continue;
            }
            seen[page] = true;
            out.pages.push(page);
            if out.pages.len() >= max_results {
                warn!("page range hit the result cap ({max_results}); truncating");
                out.truncated = true;
                return out;
            }
        }
    }
    out
}

/// Expand one token into zero-based in-bounds pages; `None` if unparseable.
///
/// Spans are clamped to `[1, total_pages]` before expansion, so a token like
/// `"1-9999999999"` allocates at most `total_pages` entries.
fn expand_token(token: &str, total_pages: usize) -> Option<Vec<usize>> {
    if let Some((start_str, end_str)) = token.split_once('-') {
        let start: i64 = start_str.trim().parse().ok()?;
        let end: i64 = end_str.trim().parse().ok()?;
        let (lo, hi, reverse) = if start <= end {
            (start, end, false)
        } else {
            (end, start, true)
        };
        let span = lo.max(1)..=hi.min(total_pages as i64);
        let pages = span.map(|n| (n - 1) as usize);
        Some(if reverse {
            pages.rev().collect()
        } else {
            pages.collect()
        })
    } else {
        let n: i64 = token.parse().ok()?;
        if n >= 1 && n <= total_pages as i64 {
            Some(vec![(n - 1) as usize])
        } else {
            Some(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: usize = 1000;

    #[test]
    fn forward_range_and_singles() {
        let parsed = parse_page_range("1-3,5,7-10", 12, CAP);
        assert_eq!(parsed.pages, vec![0, 1, 2, 4, 6, 7, 8, 9]);
        assert!(!parsed.truncated);
    }

    #[test]
    fn reversed_range_expands_backward() {
        let parsed = parse_page_range("5-1", 10, CAP);
        assert_eq!(parsed.pages, vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let parsed = parse_page_range("1,1,2-3,2", 5, CAP);
        assert_eq!(parsed.pages, vec![0, 1, 2]);
    }

    #[test]
    fn out_of_bounds_dropped_per_element() {
        // 8 and 9 exceed a 7-page document; the rest of the token survives
        let parsed = parse_page_range("6-9", 7, CAP);
        assert_eq!(parsed.pages, vec![5, 6]);
    }

    #[test]
    fn huge_spans_are_clamped_to_the_document() {
        let parsed = parse_page_range("1-9999999999", 10, CAP);
        assert_eq!(parsed.pages, (0..10).collect::<Vec<_>>());
        assert!(!parsed.truncated);

        let reversed = parse_page_range("9999999999-1", 10, CAP);
        assert_eq!(reversed.pages, (0..10).rev().collect::<Vec<_>>());
    }

    #[test]
    fn malformed_tokens_are_skipped() {
        let parsed = parse_page_range("1,abc,3,x-y", 5, CAP);
        assert_eq!(parsed.pages, vec![0, 2]);
    }

    #[test]
    fn empty_string_yields_nothing() {
        assert_eq!(parse_page_range("", 10, CAP), ParsedRange::default());
        assert_eq!(parse_page_range(" , ,", 10, CAP).pages, Vec::<usize>::new());
    }

    #[test]
    fn result_cap_truncates_with_flag() {
        let parsed = parse_page_range("1-100", 100, 10);
        assert_eq!(parsed.pages.len(), 10);
        assert_eq!(parsed.pages, (0..10).collect::<Vec<_>>());
        assert!(parsed.truncated);
    }

    #[test]
    fn output_is_unique_and_in_bounds() {
        let parsed = parse_page_range("3-1,2-6,4,9-20", 8, CAP);
        let mut sorted = parsed.pages.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), parsed.pages.len());
        assert!(parsed.pages.iter().all(|&p| p < 8));
    }

    #[test]
    fn whitespace_around_tokens_is_tolerated() {
        let parsed = parse_page_range(" 2 , 4 - 5 ", 10, CAP);
        assert_eq!(parsed.pages, vec![1, 3, 4]);
    }
}
