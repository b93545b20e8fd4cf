use chrono::NaiveDate;

use crate::model::*;

// ── Day availability ────────────────────────────────────────────

/// Free `[start, end)` ranges of `date` on a resource: the whole day minus every
/// approved reservation. Pending requests do not hold the slot and are ignored.
pub fn free_spans(rs: &ResourceState, date: NaiveDate) -> Vec<Span> {
    let day = Span::whole_day();
    let taken: Vec<Span> = rs
        .overlapping(date, &day)
        .filter(|r| r.status.is_approved())
        .map(|r| r.span)
        .collect();
    // Already sorted by start: days are kept in start order.
    subtract_intervals(&[day], &merge_overlapping(&taken))
}

/// Merge overlapping or adjacent spans. Input must be sorted by start.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
    for span in sorted {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => {
                if span.end > last.end {
                    last.end = span.end;
                }
            }
            _ => merged.push(*span),
        }
    }
    merged
}

/// Subtract `removals` from `base`. Both inputs must be sorted and non-overlapping.
pub fn subtract_intervals(base: &[Span], removals: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut j = 0;

    for b in base {
        let mut cursor = b.start;
        // Skip removals that end before this base span starts
        while j < removals.len() && removals[j].end <= b.start {
            j += 1;
        }
        let mut k = j;
        while k < removals.len() && removals[k].start < b.end {
            let r = &removals[k];
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            if r.end > cursor {
                cursor = r.end;
            }
            k += 1;
        }
        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(start: &str, end: &str) -> Span {
        Span::new(start.parse().unwrap(), end.parse().unwrap())
    }

    #[test]
    fn merge_adjacent_and_overlapping() {
        let merged = merge_overlapping(&[
            s("09:00", "10:00"),
            s("10:00", "11:00"),
            s("10:30", "12:00"),
            s("13:00", "14:00"),
        ]);
        assert_eq!(merged, vec![s("09:00", "12:00"), s("13:00", "14:00")]);
    }

    #[test]
    fn merge_empty() {
        assert!(merge_overlapping(&[]).is_empty());
    }

    #[test]
    fn subtract_middle_and_edges() {
        let free = subtract_intervals(
            &[s("08:00", "18:00")],
            &[s("07:00", "09:00"), s("12:00", "13:00"), s("17:00", "19:00")],
        );
        assert_eq!(
            free,
            vec![s("09:00", "12:00"), s("13:00", "17:00")]
        );
    }

    #[test]
    fn subtract_empty_removals() {
        let base = [s("08:00", "18:00")];
        assert_eq!(subtract_intervals(&base, &[]), base.to_vec());
    }

    #[test]
    fn subtract_everything() {
        let free = subtract_intervals(&[s("08:00", "18:00")], &[s("00:00", "24:00")]);
        assert!(free.is_empty());
    }
}
