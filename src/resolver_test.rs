#![allow(clippy::float_cmp)]

use uuid::Uuid;

use super::*;

const EPS: f64 = 1e-6;

fn set(points: &[(f64, f64)]) -> Vec<Annotation> {
    let mut set: Vec<Annotation> = points.iter().map(|&(lon, lat)| Annotation::new(lon, lat, 10.0)).collect();
    renumber(&mut set);
    set
}

fn envelope(change: Change, ts: i64, source: Source) -> UpdateEnvelope {
    UpdateEnvelope::new(change, Timestamp(ts), source)
}

fn replace(points: &[(f64, f64)], ts: i64, source: Source) -> UpdateEnvelope {
    envelope(Change::Replace(set(points)), ts, source)
}

fn point(index: usize, lon: f64, lat: f64, ts: i64, source: Source) -> UpdateEnvelope {
    envelope(Change::PointUpdate { index, position: Position::new(lon, lat) }, ts, source)
}

fn next_of(decision: &Decision) -> &[Annotation] {
    match decision {
        Decision::Accept(update) | Decision::Merge { update, .. } => &update.next,
        Decision::Reject(reason) => panic!("expected acceptance, got {reason}"),
    }
}

fn no_overrides(len: usize) -> IndexTable<Position> {
    IndexTable::with_len(len)
}

fn guard(session: Uuid, index: usize, committing: bool) -> DragGuard {
    DragGuard { session, index, position: Position::new(5.0, 5.0), committing }
}

// =============================================================
// Stamp ordering
// =============================================================

#[test]
fn stamp_older_is_superseded() {
    let last = Stamp { timestamp: Timestamp(10), is_self: false };
    assert!(last.supersedes(&Stamp { timestamp: Timestamp(9), is_self: true }));
    assert!(!last.supersedes(&Stamp { timestamp: Timestamp(11), is_self: false }));
}

#[test]
fn stamp_tie_prefers_self() {
    let self_last = Stamp { timestamp: Timestamp(10), is_self: true };
    let other_last = Stamp { timestamp: Timestamp(10), is_self: false };
    assert!(self_last.supersedes(&Stamp { timestamp: Timestamp(10), is_self: false }));
    assert!(!self_last.supersedes(&Stamp { timestamp: Timestamp(10), is_self: true }));
    assert!(!other_last.supersedes(&Stamp { timestamp: Timestamp(10), is_self: true }));
    assert!(!other_last.supersedes(&Stamp { timestamp: Timestamp(10), is_self: false }));
}

// =============================================================
// Basic acceptance and staleness
// =============================================================

#[test]
fn first_envelope_for_scope_is_accepted() {
    let current = set(&[(1.0, 1.0)]);
    let mut resolver = ConflictResolver::new(EPS, 1);
    let decision = resolver.resolve(&current, &no_overrides(1), None, &replace(&[(2.0, 2.0)], 5, Source::ExternalSync));
    assert!(matches!(decision, Decision::Accept(_)));
    assert_eq!(next_of(&decision)[0].position(), Position::new(2.0, 2.0));
    assert_eq!(
        resolver.last_accepted(Scope::Whole),
        Some(Stamp { timestamp: Timestamp(5), is_self: false })
    );
}

#[test]
fn older_envelope_for_same_scope_is_stale() {
    let current = set(&[(1.0, 1.0)]);
    let mut resolver = ConflictResolver::new(EPS, 1);
    resolver.resolve(&current, &no_overrides(1), None, &replace(&[(2.0, 2.0)], 10, Source::ExternalSync));
    let stale = resolver.resolve(&current, &no_overrides(1), None, &replace(&[(3.0, 3.0)], 9, Source::ExternalSync));
    assert_eq!(stale, Decision::Reject(RejectReason::Stale));
}

#[test]
fn scopes_are_independent() {
    let current = set(&[(1.0, 1.0), (2.0, 2.0)]);
    let mut resolver = ConflictResolver::new(EPS, 2);
    resolver.resolve(&current, &no_overrides(2), None, &point(0, 5.0, 5.0, 100, Source::Local));
    let other_index = resolver.resolve(&current, &no_overrides(2), None, &point(1, 6.0, 6.0, 50, Source::Local));
    assert!(matches!(other_index, Decision::Accept(_)));
    let same_index = resolver.resolve(&current, &no_overrides(2), None, &point(0, 7.0, 7.0, 50, Source::Local));
    assert_eq!(same_index, Decision::Reject(RejectReason::Stale));
}

#[test]
fn equal_timestamp_self_beats_other_either_order() {
    let current = set(&[(1.0, 1.0)]);

    let mut resolver = ConflictResolver::new(EPS, 1);
    resolver.resolve(&current, &no_overrides(1), None, &replace(&[(2.0, 2.0)], 10, Source::Local));
    let other = resolver.resolve(&current, &no_overrides(1), None, &replace(&[(3.0, 3.0)], 10, Source::ExternalSync));
    assert_eq!(other, Decision::Reject(RejectReason::Stale));

    let mut resolver = ConflictResolver::new(EPS, 1);
    resolver.resolve(&current, &no_overrides(1), None, &replace(&[(3.0, 3.0)], 10, Source::ExternalSync));
    let mine = resolver.resolve(&current, &no_overrides(1), None, &replace(&[(2.0, 2.0)], 10, Source::Local));
    assert_eq!(next_of(&mine)[0].position(), Position::new(2.0, 2.0));
}

#[test]
fn identical_payload_is_accepted_unchanged() {
    let current = set(&[(1.0, 1.0)]);
    let mut resolver = ConflictResolver::new(EPS, 1);
    let env = replace(&[(1.0, 1.0)], 10, Source::ExternalSync);
    let first = resolver.resolve(&current, &no_overrides(1), None, &env);
    let second = resolver.resolve(&current, &no_overrides(1), None, &env);
    assert_eq!(next_of(&first), current.as_slice());
    assert_eq!(first, second);
}

#[test]
fn out_of_range_point_is_rejected() {
    let current = set(&[(1.0, 1.0)]);
    let mut resolver = ConflictResolver::new(EPS, 1);
    let decision = resolver.resolve(&current, &no_overrides(1), None, &point(3, 0.0, 0.0, 1, Source::Local));
    assert_eq!(decision, Decision::Reject(RejectReason::OutOfRange));
    assert_eq!(resolver.last_accepted(Scope::Index(3)), None);
}

// =============================================================
// Overrides and merge
// =============================================================

#[test]
fn conflicting_override_keeps_index_and_merges_rest() {
    let current = set(&[(105.82, 21.05), (106.0, 20.0)]);
    let mut overrides = no_overrides(2);
    overrides.set(0, Position::new(105.82, 21.05));
    let mut resolver = ConflictResolver::new(EPS, 2);
    let env = replace(&[(105.80, 21.03), (107.0, 19.0)], 10, Source::ExternalSync);
    let decision = resolver.resolve(&current, &overrides, None, &env);
    let Decision::Merge { update, kept } = decision else {
        panic!("expected merge");
    };
    assert_eq!(kept, vec![0]);
    assert_eq!(update.next[0].position(), Position::new(105.82, 21.05));
    assert_eq!(update.next[1].position(), Position::new(107.0, 19.0));
    assert_eq!(update.overrides, OverridePlan::Confirm(Vec::new()));
    assert_eq!(resolver.last_accepted(Scope::Index(0)), None);
    assert_eq!(resolver.last_accepted(Scope::Index(1)).map(|s| s.timestamp), Some(Timestamp(10)));
}

#[test]
fn conflicting_override_on_only_change_is_rejected() {
    let current = set(&[(105.82, 21.05)]);
    let mut overrides = no_overrides(1);
    overrides.set(0, Position::new(105.82, 21.05));
    let mut resolver = ConflictResolver::new(EPS, 1);
    let env = replace(&[(105.80, 21.03)], 1, Source::ExternalSync);
    assert_eq!(resolver.resolve(&current, &overrides, None, &env), Decision::Reject(RejectReason::Conflict));
    assert_eq!(resolver.last_accepted(Scope::Whole), None);
}

#[test]
fn matching_payload_confirms_override() {
    let current = set(&[(105.82, 21.05)]);
    let mut overrides = no_overrides(1);
    overrides.set(0, Position::new(105.82, 21.05));
    let mut resolver = ConflictResolver::new(EPS, 1);
    let mut confirmed = set(&[(105.820_000_4, 21.05)]);
    confirmed[0].id = Some(Uuid::new_v4());
    let env = envelope(Change::Replace(confirmed), 10, Source::ServerSuccess);
    let decision = resolver.resolve(&current, &overrides, None, &env);
    let Decision::Accept(update) = decision else {
        panic!("expected accept");
    };
    assert_eq!(update.overrides, OverridePlan::Confirm(vec![0]));
    assert!(update.next[0].id.is_some());
}

#[test]
fn newer_index_stamp_keeps_index_in_older_replace() {
    let current = set(&[(1.0, 1.0), (2.0, 2.0)]);
    let mut resolver = ConflictResolver::new(EPS, 2);
    resolver.resolve(&current, &no_overrides(2), None, &point(0, 5.0, 5.0, 20, Source::Local));
    let after_edit = set(&[(5.0, 5.0), (2.0, 2.0)]);
    let env = replace(&[(1.0, 1.0), (3.0, 3.0)], 15, Source::ServerSuccess);
    let Decision::Merge { update, kept } = resolver.resolve(&after_edit, &no_overrides(2), None, &env) else {
        panic!("expected merge");
    };
    assert_eq!(kept, vec![0]);
    assert_eq!(update.next[0].position(), Position::new(5.0, 5.0));
    assert_eq!(update.next[1].position(), Position::new(3.0, 3.0));
}

#[test]
fn different_length_forces_whole_accept() {
    let current = set(&[(105.82, 21.05)]);
    let mut overrides = no_overrides(1);
    overrides.set(0, Position::new(105.82, 21.05));
    let mut resolver = ConflictResolver::new(EPS, 1);
    let env = replace(&[(1.0, 1.0), (2.0, 2.0)], 10, Source::ExternalSync);
    let Decision::Accept(update) = resolver.resolve(&current, &overrides, None, &env) else {
        panic!("expected accept");
    };
    assert_eq!(update.next.len(), 2);
    assert_eq!(update.overrides, OverridePlan::Reset { pin: None });
}

// =============================================================
// Structural changes
// =============================================================

#[test]
fn remove_reindexes_and_rekeys_stamps() {
    let current = set(&[(1.0, 1.0), (2.0, 2.0)]);
    let mut resolver = ConflictResolver::new(EPS, 2);
    resolver.resolve(&current, &no_overrides(2), None, &point(1, 3.0, 3.0, 10, Source::Local));
    let after_point = set(&[(1.0, 1.0), (3.0, 3.0)]);
    let remove = envelope(Change::Remove { index: 0 }, 11, Source::Local);
    let decision = resolver.resolve(&after_point, &no_overrides(2), None, &remove);
    let Decision::Accept(update) = decision else {
        panic!("expected accept");
    };
    assert_eq!(update.next.len(), 1);
    assert_eq!(update.next[0].index, 0);
    assert_eq!(update.overrides, OverridePlan::Removed(0));
    assert_eq!(resolver.last_accepted(Scope::Index(0)).map(|s| s.timestamp), Some(Timestamp(10)));
}

#[test]
fn insert_shifts_overrides() {
    let current = set(&[(1.0, 1.0)]);
    let mut resolver = ConflictResolver::new(EPS, 1);
    let change = Change::Insert { index: 0, annotation: Annotation::new(9.0, 9.0, 1.0) };
    let insert = envelope(change, 1, Source::Local);
    let Decision::Accept(update) = resolver.resolve(&current, &no_overrides(1), None, &insert) else {
        panic!("expected accept");
    };
    assert_eq!(update.overrides, OverridePlan::Inserted(0));
    assert_eq!(update.next[1].position(), Position::new(1.0, 1.0));
}

#[test]
fn replayed_insert_is_applied_once() {
    let mut current = set(&[(1.0, 1.0)]);
    let mut resolver = ConflictResolver::new(EPS, 1);
    let insert = envelope(Change::Insert { index: 1, annotation: Annotation::new(2.0, 2.0, 1.0) }, 5, Source::Local);
    for _ in 0..2 {
        let decision = resolver.resolve(&current, &no_overrides(current.len()), None, &insert);
        current = next_of(&decision).to_vec();
    }
    assert_eq!(current.len(), 2);
    assert_eq!(resolver.last_accepted(Scope::Index(1)).map(|s| s.timestamp), Some(Timestamp(5)));
}

#[test]
fn replayed_remove_is_applied_once() {
    let mut current = set(&[(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]);
    let mut resolver = ConflictResolver::new(EPS, 3);
    let remove = envelope(Change::Remove { index: 0 }, 5, Source::Local);
    for _ in 0..2 {
        let decision = resolver.resolve(&current, &no_overrides(current.len()), None, &remove);
        current = next_of(&decision).to_vec();
    }
    assert_eq!(current.len(), 2);
    assert_eq!(current[0].position(), Position::new(2.0, 2.0));
}

#[test]
fn distinct_inserts_with_equal_stamp_both_apply() {
    let current = set(&[(1.0, 1.0)]);
    let mut resolver = ConflictResolver::new(EPS, 1);
    let first = envelope(Change::Insert { index: 1, annotation: Annotation::new(2.0, 2.0, 1.0) }, 5, Source::Local);
    let current = next_of(&resolver.resolve(&current, &no_overrides(1), None, &first)).to_vec();
    let second = envelope(Change::Insert { index: 2, annotation: Annotation::new(3.0, 3.0, 1.0) }, 5, Source::Local);
    let current = next_of(&resolver.resolve(&current, &no_overrides(2), None, &second)).to_vec();
    assert_eq!(current.len(), 3);
}

// =============================================================
// Revert
// =============================================================

#[test]
fn revert_wins_regardless_of_timestamp() {
    let current = set(&[(105.82, 21.05)]);
    let mut overrides = no_overrides(1);
    overrides.set(0, Position::new(105.82, 21.05));
    let mut resolver = ConflictResolver::new(EPS, 1);
    resolver.resolve(&current, &overrides, None, &replace(&[(105.82, 21.05)], 1_000, Source::Local));
    let revert = envelope(Change::Revert(set(&[(105.80, 21.03)])), 1, Source::ServerErrorRevert);
    let Decision::Accept(update) = resolver.resolve(&current, &overrides, None, &revert) else {
        panic!("expected accept");
    };
    assert_eq!(update.next[0].position(), Position::new(105.80, 21.03));
    assert_eq!(update.overrides, OverridePlan::Reset { pin: None });
}

#[test]
fn revert_pins_active_drag_override() {
    let current = set(&[(1.0, 1.0), (2.0, 2.0)]);
    let guard = guard(Uuid::new_v4(), 1, false);
    let mut resolver = ConflictResolver::new(EPS, 2);
    let revert = envelope(Change::Revert(set(&[(0.0, 0.0), (0.0, 0.0)])), 1, Source::ServerErrorRevert);
    let Decision::Accept(update) = resolver.resolve(&current, &no_overrides(2), Some(guard), &revert) else {
        panic!("expected accept");
    };
    assert_eq!(update.overrides, OverridePlan::Reset { pin: Some((1, Position::new(5.0, 5.0))) });
}

#[test]
fn revert_pins_drag_position_without_prior_override() {
    let current = set(&[(105.90, 21.10)]);
    let pointer = Position::new(105.90, 21.10);
    let guard = DragGuard { session: Uuid::new_v4(), index: 0, position: pointer, committing: false };
    let mut resolver = ConflictResolver::new(EPS, 1);
    let revert = envelope(Change::Revert(set(&[(105.80, 21.03)])), 1, Source::ServerErrorRevert);
    let Decision::Accept(update) = resolver.resolve(&current, &no_overrides(1), Some(guard), &revert) else {
        panic!("expected accept");
    };
    assert_eq!(update.next[0].position(), Position::new(105.80, 21.03));
    assert_eq!(update.overrides, OverridePlan::Reset { pin: Some((0, Position::new(105.90, 21.10))) });
}

// =============================================================
// Drag isolation
// =============================================================

#[test]
fn point_update_on_dragged_index_is_rejected() {
    let current = set(&[(1.0, 1.0), (2.0, 2.0)]);
    let guard = guard(Uuid::new_v4(), 0, false);
    let mut resolver = ConflictResolver::new(EPS, 2);
    let decision = resolver.resolve(&current, &no_overrides(2), Some(guard), &point(0, 9.0, 9.0, 99, Source::Local));
    assert_eq!(decision, Decision::Reject(RejectReason::DragActive));
    let radius = envelope(Change::RadiusUpdate { index: 0, radius: 2.0 }, 99, Source::Peer("slider".into()));
    assert_eq!(
        resolver.resolve(&current, &no_overrides(2), Some(guard), &radius),
        Decision::Reject(RejectReason::DragActive)
    );
}

#[test]
fn other_index_may_change_during_drag() {
    let current = set(&[(1.0, 1.0), (2.0, 2.0)]);
    let guard = guard(Uuid::new_v4(), 0, false);
    let mut resolver = ConflictResolver::new(EPS, 2);
    let decision = resolver.resolve(&current, &no_overrides(2), Some(guard), &point(1, 9.0, 9.0, 1, Source::Local));
    assert_eq!(next_of(&decision)[1].position(), Position::new(9.0, 9.0));
}

#[test]
fn structural_change_during_drag_is_rejected() {
    let current = set(&[(1.0, 1.0), (2.0, 2.0)]);
    let guard = guard(Uuid::new_v4(), 1, false);
    let mut resolver = ConflictResolver::new(EPS, 2);
    let remove = envelope(Change::Remove { index: 0 }, 1, Source::Local);
    assert_eq!(
        resolver.resolve(&current, &no_overrides(2), Some(guard), &remove),
        Decision::Reject(RejectReason::DragActive)
    );
    let shorter = replace(&[(1.0, 1.0)], 1, Source::ExternalSync);
    assert_eq!(
        resolver.resolve(&current, &no_overrides(2), Some(guard), &shorter),
        Decision::Reject(RejectReason::DragActive)
    );
}

#[test]
fn replace_during_drag_keeps_dragged_index() {
    let current = set(&[(1.0, 1.0), (2.0, 2.0)]);
    let guard = guard(Uuid::new_v4(), 0, false);
    let mut resolver = ConflictResolver::new(EPS, 2);
    let env = replace(&[(8.0, 8.0), (9.0, 9.0)], 5, Source::ExternalSync);
    let Decision::Merge { update, kept } = resolver.resolve(&current, &no_overrides(2), Some(guard), &env) else {
        panic!("expected merge");
    };
    assert_eq!(kept, vec![0]);
    assert_eq!(update.next[0].position(), Position::new(1.0, 1.0));
    assert_eq!(update.next[1].position(), Position::new(9.0, 9.0));
}

#[test]
fn own_drag_end_is_admitted_and_keeps_override() {
    let current = set(&[(105.80, 21.03)]);
    let session = Uuid::new_v4();
    let guard = guard(session, 0, true);
    let mut overrides = no_overrides(1);
    overrides.set(0, Position::new(105.82, 21.05));
    let mut resolver = ConflictResolver::new(EPS, 1);
    let env = point(0, 105.82, 21.05, 5, Source::DragEnd(session));
    let Decision::Accept(update) = resolver.resolve(&current, &overrides, Some(guard), &env) else {
        panic!("expected accept");
    };
    assert_eq!(update.next[0].position(), Position::new(105.82, 21.05));
    assert_eq!(update.overrides, OverridePlan::Confirm(Vec::new()));
}

#[test]
fn drag_end_from_another_session_is_rejected() {
    let current = set(&[(105.80, 21.03)]);
    let guard = guard(Uuid::new_v4(), 0, true);
    let mut resolver = ConflictResolver::new(EPS, 1);
    let env = point(0, 105.82, 21.05, 5, Source::DragEnd(Uuid::new_v4()));
    assert_eq!(
        resolver.resolve(&current, &no_overrides(1), Some(guard), &env),
        Decision::Reject(RejectReason::DragActive)
    );
}

#[test]
fn server_success_admitted_only_once_committing() {
    let current = set(&[(105.80, 21.03)]);
    let mut overrides = no_overrides(1);
    overrides.set(0, Position::new(105.82, 21.05));
    let session = Uuid::new_v4();
    let env = replace(&[(105.82, 21.05)], 5, Source::ServerSuccess);

    let mut resolver = ConflictResolver::new(EPS, 1);
    let dragging = guard(session, 0, false);
    assert!(resolver.resolve(&current, &overrides, Some(dragging), &env).is_rejected());

    let mut resolver = ConflictResolver::new(EPS, 1);
    let committing = guard(session, 0, true);
    let Decision::Accept(update) = resolver.resolve(&current, &overrides, Some(committing), &env) else {
        panic!("expected accept");
    };
    assert_eq!(update.overrides, OverridePlan::Confirm(vec![0]));
}

#[test]
fn revert_after_commit_drops_drag_override() {
    let current = set(&[(105.82, 21.05)]);
    let guard = guard(Uuid::new_v4(), 0, true);
    let mut resolver = ConflictResolver::new(EPS, 1);
    let revert = envelope(Change::Revert(set(&[(105.80, 21.03)])), 1, Source::ServerErrorRevert);
    let Decision::Accept(update) = resolver.resolve(&current, &no_overrides(1), Some(guard), &revert) else {
        panic!("expected accept");
    };
    assert_eq!(update.overrides, OverridePlan::Reset { pin: None });
}
