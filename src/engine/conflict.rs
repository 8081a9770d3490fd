use std::collections::HashSet;

use crate::limits::*;
use crate::model::*;

use super::availability::peak_concurrency;
use super::EngineError;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Ms
}

/// Shape and bounds of a requested `[start, end)`. Returns the span on success.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval);
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

pub(crate) fn validate_text(title: Option<&str>, description: Option<&str>) -> Result<(), EngineError> {
    if title.is_some_and(|t| t.len() > MAX_TITLE_LEN) {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    if description.is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    Ok(())
}

/// Query windows may be open-ended, but a closed one must be ordered and bounded.
pub(crate) fn validate_window(window: &Window) -> Result<(), EngineError> {
    if let (Some(from), Some(until)) = (window.from, window.until) {
        if from >= until {
            return Err(EngineError::InvalidInterval);
        }
        if until - from > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
    }
    Ok(())
}

/// Admit `span` on a resource with `slots` capacity, or say why not.
/// Caller holds the resource's write lock.
pub(crate) fn check_capacity(index: &OverlapIndex, span: &Span, slots: u32) -> Result<(), EngineError> {
    if slots == 0 {
        return Err(EngineError::CapacityExceeded(0));
    }
    if slots == 1 {
        // Fast path: any overlapping reservation is a conflict.
        if index.overlapping(span).next().is_some() {
            return Err(EngineError::CapacityExceeded(slots));
        }
        return Ok(());
    }

    // Only the part of each reservation inside the candidate matters.
    let clipped: Vec<Span> = index
        .overlapping(span)
        .map(|r| Span::new(r.span.start.max(span.start), r.span.end.min(span.end)))
        .collect();
    if clipped.len() < slots as usize {
        return Ok(());
    }
    if peak_concurrency(&clipped) + 1 > slots {
        return Err(EngineError::CapacityExceeded(slots));
    }
    Ok(())
}

/// Lowest slot number held by none of the reservations overlapping `span`.
/// Caller holds the resource's write lock.
pub(crate) fn free_slot(index: &OverlapIndex, span: &Span, slots: u32) -> Option<u32> {
    let taken: HashSet<u32> = index.overlapping(span).filter_map(|r| r.slot).collect();
    (0..slots).find(|n| !taken.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn index_with(spans: &[(Ms, Ms)]) -> OverlapIndex {
        let slotted: Vec<(Ms, Ms, Option<u32>)> = spans.iter().map(|&(s, e)| (s, e, None)).collect();
        slotted_index(&slotted)
    }

    fn slotted_index(spans: &[(Ms, Ms, Option<u32>)]) -> OverlapIndex {
        let resource = Ulid::new();
        let mut idx = OverlapIndex::new(resource);
        for &(s, e, slot) in spans {
            idx.insert(TimeSpan {
                id: Ulid::new(),
                title: String::new(),
                description: String::new(),
                span: Span::new(s, e),
                kind: TimeSpanKind::ResourceReservation,
                department: Ulid::nil(),
                resource: Some(resource),
                slot,
                owner: Ulid::nil(),
            });
        }
        idx
    }

    #[test]
    fn rejects_empty_and_reversed() {
        assert!(matches!(validate_span(10, 10), Err(EngineError::InvalidInterval)));
        assert!(matches!(validate_span(20, 10), Err(EngineError::InvalidInterval)));
        assert_eq!(validate_span(10, 20).unwrap(), Span::new(10, 20));
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(matches!(validate_span(-1, 10), Err(EngineError::LimitExceeded(_))));
        assert!(matches!(
            validate_span(0, MAX_SPAN_DURATION_MS + 1),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn window_checks() {
        assert!(validate_window(&Window::all()).is_ok());
        assert!(validate_window(&Window { from: Some(5), until: None }).is_ok());
        assert!(matches!(
            validate_window(&Window::between(5, 5)),
            Err(EngineError::InvalidInterval)
        ));
        assert!(matches!(
            validate_window(&Window::between(0, MAX_QUERY_WINDOW_MS + 1)),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn text_limits() {
        assert!(validate_text(Some("ok"), None).is_ok());
        let long = "x".repeat(MAX_TITLE_LEN + 1);
        assert!(validate_text(Some(&long), None).is_err());
    }

    #[test]
    fn single_slot_fast_path() {
        let idx = index_with(&[(100, 200)]);
        assert!(check_capacity(&idx, &Span::new(150, 250), 1).is_err());
        assert!(check_capacity(&idx, &Span::new(200, 250), 1).is_ok());
        assert!(check_capacity(&idx, &Span::new(0, 100), 1).is_ok());
        assert!(check_capacity(&idx, &Span::new(0, 100), 0).is_err());
    }

    #[test]
    fn multi_slot_counts_peak_not_total() {
        // Three reservations overlap the candidate but never more than one at a time.
        let idx = index_with(&[(0, 30), (30, 60), (60, 90)]);
        assert!(check_capacity(&idx, &Span::new(0, 90), 2).is_ok());

        let idx = index_with(&[(0, 50), (40, 90)]);
        assert!(check_capacity(&idx, &Span::new(45, 46), 2).is_err());
        assert!(check_capacity(&idx, &Span::new(50, 60), 2).is_ok());
        assert!(check_capacity(&idx, &Span::new(45, 46), 3).is_ok());
    }

    #[test]
    fn overlap_outside_candidate_is_ignored() {
        // The two existing reservations overlap each other at [40,50), which is
        // outside the candidate.
        let idx = index_with(&[(0, 50), (40, 90)]);
        assert!(check_capacity(&idx, &Span::new(50, 100), 2).is_ok());
    }

    #[test]
    fn lowest_free_slot() {
        let idx = slotted_index(&[(0, 50, Some(0)), (40, 90, Some(1)), (100, 200, Some(0))]);
        assert_eq!(free_slot(&idx, &Span::new(60, 70), 3), Some(0));
        assert_eq!(free_slot(&idx, &Span::new(45, 46), 3), Some(2));
        assert_eq!(free_slot(&idx, &Span::new(45, 46), 2), None);
        // Adjacent reservations do not hold a slot.
        assert_eq!(free_slot(&idx, &Span::new(90, 100), 1), Some(0));
    }
}
