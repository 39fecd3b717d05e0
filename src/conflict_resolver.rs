//! Decides per record: skip / apply / reject, using `last_changed_for_sync`
//! vs `last_synced` with dual tolerance windows (§4.3).

use chrono::{DateTime, Duration, Utc};

/// Tolerance windows, one per side (§6.3; floors enforced by `config`).
#[derive(Debug, Clone, Copy)]
pub struct Tolerances {
    pub relational_ms: i64,
    pub sheet_ms: i64,
}

/// The two timestamps tracked on one side of a record pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct SideState {
    pub last_changed_for_sync: Option<DateTime<Utc>>,
    pub last_synced: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Neither side changed since its last sync.
    Unchanged,
    /// Only the destination changed; the source is stale.
    SkipDestinationNewer,
    /// Both changed but the destination's change is newer (or the
    /// `load_cars` set differs with no side "winning" on time — still a
    /// destination-favors-skip decision per §4.3's tie language only applies
    /// to the equal-delta case, not this one).
    SkipBothChangedDestinationNewer,
    Proceed,
}

impl Decision {
    pub fn should_proceed(self) -> bool {
        matches!(self, Decision::Proceed)
    }
}

/// `LC - LS > tolerance`; missing either timestamp counts as changed (§4.3).
fn has_changed(state: SideState, tolerance_ms: i64) -> bool {
    match (state.last_changed_for_sync, state.last_synced) {
        (Some(lc), Some(ls)) => (lc - ls) > Duration::milliseconds(tolerance_ms),
        _ => true,
    }
}

/// Evaluates the S→T decision for one record pair (§4.3). `source_side`
/// relies on `source_tolerance_ms`, `target_side` on `target_tolerance_ms` —
/// callers pass the relational tolerance for whichever side is the
/// relational one and the sheet tolerance for the sheet side; the tie-break
/// in step 4 always uses the sheet tolerance as epsilon regardless of
/// direction.
pub fn resolve(
    source: SideState,
    source_tolerance_ms: i64,
    target: SideState,
    target_tolerance_ms: i64,
    sheet_tolerance_ms: i64,
) -> Decision {
    let source_changed = has_changed(source, source_tolerance_ms);
    let target_changed = has_changed(target, target_tolerance_ms);

    match (source_changed, target_changed) {
        (false, false) => Decision::Unchanged,
        (true, false) => Decision::Proceed,
        (false, true) => Decision::SkipDestinationNewer,
        (true, true) => {
            let (Some(lc_source), Some(lc_target)) =
                (source.last_changed_for_sync, target.last_changed_for_sync)
            else {
                // one side lacks a change marker entirely: treat as source
                // newer, since an absent LC already forced `changed = true`.
                return Decision::Proceed;
            };
            let delta = lc_source - lc_target;
            let eps = Duration::milliseconds(sheet_tolerance_ms);
            if delta.abs() <= eps {
                Decision::Proceed
            } else if delta > Duration::zero() {
                Decision::Proceed
            } else {
                Decision::SkipBothChangedDestinationNewer
            }
        }
    }
}

/// After a successful propagation, the marker to stamp on the SOURCE side's
/// `last_synced` (§4.3): `max(LC_source, now())`, implemented per the
/// spec's asymmetric rule — stamp `LC_source` if it is strictly newer than
/// the prior `last_synced`, else stamp `now`.
pub fn stamp_last_synced(source: SideState, now: DateTime<Utc>) -> DateTime<Utc> {
    match (source.last_changed_for_sync, source.last_synced) {
        (Some(lc), Some(ls)) if lc > ls => lc,
        (Some(lc), None) => lc,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn both_unchanged_skips() {
        let side = SideState {
            last_changed_for_sync: Some(ts("2024-01-01T00:00:00Z")),
            last_synced: Some(ts("2024-01-01T00:00:00Z")),
        };
        let d = resolve(side, 60_000, side, 60_000, 60_000);
        assert_eq!(d, Decision::Unchanged);
    }

    #[test]
    fn only_source_changed_proceeds() {
        let source = SideState {
            last_changed_for_sync: Some(ts("2024-01-01T00:01:00Z")),
            last_synced: Some(ts("2024-01-01T00:00:00Z")),
        };
        let target = SideState {
            last_changed_for_sync: Some(ts("2024-01-01T00:00:00Z")),
            last_synced: Some(ts("2024-01-01T00:00:00Z")),
        };
        let d = resolve(source, 1000, target, 1000, 60_000);
        assert_eq!(d, Decision::Proceed);
    }

    #[test]
    fn only_target_changed_skips() {
        let source = SideState {
            last_changed_for_sync: Some(ts("2024-01-01T00:00:00Z")),
            last_synced: Some(ts("2024-01-01T00:00:00Z")),
        };
        let target = SideState {
            last_changed_for_sync: Some(ts("2024-01-01T00:01:00Z")),
            last_synced: Some(ts("2024-01-01T00:00:00Z")),
        };
        let d = resolve(source, 1000, target, 1000, 60_000);
        assert_eq!(d, Decision::SkipDestinationNewer);
    }

    /// S2 from the spec scenarios: relational car LC 10:00/LS 09:00; sheet
    /// recA LC 10:30/LS 09:30. Sheet→relational must PROCEED (source newer
    /// by 30min, outside the 1min sheet tolerance).
    #[test]
    fn scenario_s2_sheet_to_relational_proceeds() {
        let sheet_source = SideState {
            last_changed_for_sync: Some(ts("2024-01-02T10:30:00Z")),
            last_synced: Some(ts("2024-01-02T09:30:00Z")),
        };
        let relational_target = SideState {
            last_changed_for_sync: Some(ts("2024-01-02T10:00:00Z")),
            last_synced: Some(ts("2024-01-02T09:00:00Z")),
        };
        let d = resolve(sheet_source, 60_000, relational_target, 1000, 60_000);
        assert_eq!(d, Decision::Proceed);
    }

    /// S2's other half: relational→sheet in the same run must SKIP, because
    /// the sheet (now the target) is newer.
    #[test]
    fn scenario_s2_relational_to_sheet_skips() {
        let relational_source = SideState {
            last_changed_for_sync: Some(ts("2024-01-02T10:00:00Z")),
            last_synced: Some(ts("2024-01-02T09:00:00Z")),
        };
        let sheet_target = SideState {
            last_changed_for_sync: Some(ts("2024-01-02T10:30:00Z")),
            last_synced: Some(ts("2024-01-02T09:30:00Z")),
        };
        let d = resolve(relational_source, 1000, sheet_target, 60_000, 60_000);
        assert_eq!(d, Decision::SkipBothChangedDestinationNewer);
    }

    #[test]
    fn equal_delta_within_epsilon_proceeds_source_wins_tie() {
        let source = SideState {
            last_changed_for_sync: Some(ts("2024-01-01T00:00:30Z")),
            last_synced: Some(ts("2024-01-01T00:00:00Z")),
        };
        let target = SideState {
            last_changed_for_sync: Some(ts("2024-01-01T00:00:00Z")),
            last_synced: Some(ts("2023-12-31T00:00:00Z")),
        };
        // delta = 30s, sheet tolerance epsilon = 60s -> within epsilon.
        let d = resolve(source, 1000, target, 1000, 60_000);
        assert_eq!(d, Decision::Proceed);
    }

    #[test]
    fn missing_timestamps_count_as_changed() {
        let source = SideState { last_changed_for_sync: None, last_synced: None };
        let target = SideState {
            last_changed_for_sync: Some(ts("2024-01-01T00:00:00Z")),
            last_synced: Some(ts("2024-01-01T00:00:00Z")),
        };
        assert_eq!(resolve(source, 1000, target, 1000, 60_000), Decision::Proceed);
    }

    #[test]
    fn stamp_uses_lc_when_newer_than_prior_ls() {
        let side = SideState {
            last_changed_for_sync: Some(ts("2024-01-01T00:01:00Z")),
            last_synced: Some(ts("2024-01-01T00:00:00Z")),
        };
        let now = ts("2024-06-01T00:00:00Z");
        assert_eq!(stamp_last_synced(side, now), ts("2024-01-01T00:01:00Z"));
    }

    #[test]
    fn stamp_uses_now_when_ls_already_caught_up() {
        let side = SideState {
            last_changed_for_sync: Some(ts("2024-01-01T00:00:00Z")),
            last_synced: Some(ts("2024-01-01T00:00:00Z")),
        };
        let now = ts("2024-06-01T00:00:00Z");
        assert_eq!(stamp_last_synced(side, now), now);
    }

    #[test]
    fn p9_tolerance_property() {
        // relational LC/LS delta <= tolerance -> relational side reports
        // "unchanged" in has_changed, so relational->sheet direction skips.
        let side = SideState {
            last_changed_for_sync: Some(ts("2024-01-01T00:00:01Z")),
            last_synced: Some(ts("2024-01-01T00:00:00Z")),
        };
        assert!(!has_changed(side, 5000));
    }
}
