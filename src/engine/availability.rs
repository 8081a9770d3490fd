use crate::model::*;

// ── Sweep-line helpers ────────────────────────────────────────────

/// Free sub-ranges of `window` on a resource with `slots` capacity, given the
/// reservations overlapping it. Ranges shorter than `min_duration` are dropped.
pub fn availability(reservations: &[Span], window: &Span, slots: u32, min_duration: Option<Ms>) -> Vec<Span> {
    let mut busy: Vec<Span> = reservations
        .iter()
        .filter(|s| s.overlaps(window))
        .map(|s| Span::new(s.start.max(window.start), s.end.min(window.end)))
        .collect();
    busy.sort_by_key(|s| s.start);

    let saturated = compute_saturated_spans(&busy, slots);
    let mut free = subtract_intervals(&[*window], &saturated);
    if let Some(min) = min_duration {
        free.retain(|s| s.duration_ms() >= min);
    }
    free
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Remove `to_remove` from `base`. Both must be sorted by start.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Sweep-line: time ranges where at least `slots` reservations are active.
/// Input must be sorted by start. Ends sort before starts at the same instant,
/// so abutting reservations never stack.
pub fn compute_saturated_spans(allocs: &[Span], slots: u32) -> Vec<Span> {
    if allocs.is_empty() || slots == 0 {
        return Vec::new();
    }
    if slots == 1 {
        return merge_overlapping(allocs);
    }

    let mut result = Vec::new();
    let mut count: u32 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in sweep_events(allocs) {
        if delta > 0 {
            count += 1;
        } else {
            count = count.saturating_sub(1);
        }

        if count >= slots && saturated_start.is_none() {
            saturated_start = Some(time);
        } else if count < slots
            && let Some(start) = saturated_start.take()
            && time > start {
                result.push(Span::new(start, time));
            }
    }

    merge_overlapping(&result)
}

/// Highest number of simultaneously active spans.
pub fn peak_concurrency(allocs: &[Span]) -> u32 {
    let mut count: u32 = 0;
    let mut peak: u32 = 0;
    for (_, delta) in sweep_events(allocs) {
        if delta > 0 {
            count += 1;
            peak = peak.max(count);
        } else {
            count = count.saturating_sub(1);
        }
    }
    peak
}

/// +1 at every start, -1 at every end, ends first on ties.
fn sweep_events(allocs: &[Span]) -> Vec<(Ms, i32)> {
    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(allocs.len() * 2);
    for a in allocs {
        events.push((a.start, 1));
        events.push((a.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(100, 150), Span::new(200, 300)]
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(500, 600)];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(100, 400), Span::new(500, 600)]
        );
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 300)]);
    }

    // ── compute_saturated_spans / peak ───────────────────

    #[test]
    fn saturated_spans_basic() {
        let allocs = vec![Span::new(0, 100), Span::new(50, 150)];
        assert_eq!(compute_saturated_spans(&allocs, 2), vec![Span::new(50, 100)]);
    }

    #[test]
    fn saturated_spans_no_overlap() {
        let allocs = vec![Span::new(0, 100), Span::new(200, 300)];
        assert!(compute_saturated_spans(&allocs, 2).is_empty());
    }

    #[test]
    fn saturated_spans_abutting_do_not_stack() {
        let allocs = vec![Span::new(0, 100), Span::new(100, 200)];
        assert!(compute_saturated_spans(&allocs, 2).is_empty());
        assert_eq!(compute_saturated_spans(&allocs, 1), vec![Span::new(0, 200)]);
    }

    #[test]
    fn saturated_spans_three_overlap_capacity_three() {
        let allocs = vec![Span::new(0, 100), Span::new(25, 75), Span::new(50, 150)];
        assert_eq!(compute_saturated_spans(&allocs, 3), vec![Span::new(50, 75)]);
    }

    #[test]
    fn saturated_spans_empty() {
        assert!(compute_saturated_spans(&[], 5).is_empty());
    }

    #[test]
    fn peak_counts_only_true_overlap() {
        assert_eq!(peak_concurrency(&[]), 0);
        assert_eq!(peak_concurrency(&[Span::new(10, 20), Span::new(20, 30)]), 1);
        assert_eq!(
            peak_concurrency(&[Span::new(0, 100), Span::new(10, 20), Span::new(15, 50), Span::new(60, 70)]),
            3
        );
    }

    // ── availability ─────────────────────────────────────

    #[test]
    fn availability_single_slot() {
        let window = Span::new(9 * H, 17 * H);
        let booked = vec![Span::new(10 * H, 11 * H), Span::new(13 * H, 14 * H)];
        assert_eq!(
            availability(&booked, &window, 1, None),
            vec![
                Span::new(9 * H, 10 * H),
                Span::new(11 * H, 13 * H),
                Span::new(14 * H, 17 * H),
            ]
        );
    }

    #[test]
    fn availability_multi_slot_only_blocks_when_full() {
        let window = Span::new(0, 100);
        let booked = vec![Span::new(10, 60), Span::new(40, 80)];
        assert_eq!(availability(&booked, &window, 2, None), vec![Span::new(0, 40), Span::new(60, 100)]);
        assert_eq!(availability(&booked, &window, 3, None), vec![window]);
    }

    #[test]
    fn availability_clamps_to_window_and_filters_short_gaps() {
        let window = Span::new(100, 200);
        let booked = vec![Span::new(0, 110), Span::new(115, 190)];
        assert_eq!(
            availability(&booked, &window, 1, None),
            vec![Span::new(110, 115), Span::new(190, 200)]
        );
        assert_eq!(availability(&booked, &window, 1, Some(10)), vec![Span::new(190, 200)]);
    }
}
