#![allow(clippy::float_cmp)]

use uuid::Uuid;

use super::*;

fn sanitizer() -> Sanitizer {
    Sanitizer { fallback: Position::new(105.8342, 21.0278), default_radius_km: 10.0 }
}

// =============================================================
// Position
// =============================================================

#[test]
fn position_bounds_are_inclusive() {
    assert!(Position::new(180.0, 90.0).is_valid());
    assert!(Position::new(-180.0, -90.0).is_valid());
    assert!(Position::new(0.0, 0.0).is_valid());
}

#[test]
fn position_out_of_range_is_invalid() {
    assert!(!Position::new(180.000_1, 0.0).is_valid());
    assert!(!Position::new(0.0, -90.5).is_valid());
    assert!(!Position::new(f64::NAN, 0.0).is_valid());
    assert!(!Position::new(0.0, f64::INFINITY).is_valid());
}

#[test]
fn approx_eq_within_epsilon() {
    let a = Position::new(105.82, 21.05);
    let b = Position::new(105.820_000_5, 21.049_999_5);
    assert!(a.approx_eq(&b, 1e-6));
}

#[test]
fn approx_eq_outside_epsilon() {
    let a = Position::new(105.82, 21.05);
    let b = Position::new(105.80, 21.03);
    assert!(!a.approx_eq(&b, 1e-6));
}

// =============================================================
// Sanitizer
// =============================================================

#[test]
fn valid_record_passes_through() {
    let id = Uuid::new_v4();
    let record = AnnotationRecord { id: Some(id), longitude: 105.80, latitude: 21.03, radius: Some(4.5) };
    let annotation = sanitizer().annotation(3, &record);
    assert_eq!(annotation.index, 3);
    assert_eq!(annotation.id, Some(id));
    assert_eq!(annotation.position(), Position::new(105.80, 21.03));
    assert_eq!(annotation.radius, 4.5);
}

#[test]
fn out_of_range_longitude_uses_fallback_and_keeps_radius() {
    let record = AnnotationRecord::new(250.0, 21.03, Some(7.0));
    let annotation = sanitizer().annotation(0, &record);
    assert_eq!(annotation.position(), Position::new(105.8342, 21.0278));
    assert_eq!(annotation.radius, 7.0);
}

#[test]
fn out_of_range_latitude_uses_fallback() {
    let record = AnnotationRecord::new(105.0, -95.0, Some(2.0));
    let annotation = sanitizer().annotation(0, &record);
    assert_eq!(annotation.position(), Position::new(105.8342, 21.0278));
}

#[test]
fn missing_radius_defaults() {
    let record = AnnotationRecord::new(105.0, 21.0, None);
    assert_eq!(sanitizer().annotation(0, &record).radius, 10.0);
}

#[test]
fn non_positive_radius_defaults() {
    for radius in [0.0, -3.0, f64::NAN] {
        let record = AnnotationRecord::new(105.0, 21.0, Some(radius));
        assert_eq!(sanitizer().annotation(0, &record).radius, 10.0);
    }
}

#[test]
fn one_bad_point_does_not_block_batch() {
    let records = vec![
        AnnotationRecord::new(105.0, 21.0, Some(1.0)),
        AnnotationRecord::new(f64::NAN, 21.0, Some(2.0)),
        AnnotationRecord::new(106.0, 22.0, Some(3.0)),
    ];
    let annotations = sanitizer().annotations(&records);
    assert_eq!(annotations.len(), 3);
    assert_eq!(annotations[0].position(), Position::new(105.0, 21.0));
    assert_eq!(annotations[1].position(), Position::new(105.8342, 21.0278));
    assert_eq!(annotations[1].radius, 2.0);
    assert_eq!(annotations[2].index, 2);
}

#[test]
fn repair_reports_whether_anything_changed() {
    let mut good = Annotation::new(1.0, 1.0, 1.0);
    assert!(!sanitizer().repair(&mut good));
    let mut bad = Annotation::new(1.0, 1.0, -1.0);
    assert!(sanitizer().repair(&mut bad));
    assert_eq!(bad.radius, 10.0);
}

// =============================================================
// Records and renumbering
// =============================================================

#[test]
fn record_missing_latitude_is_malformed() {
    let result = serde_json::from_value::<AnnotationRecord>(serde_json::json!({ "longitude": 1.0 }));
    assert!(result.is_err());
}

#[test]
fn record_without_radius_or_id_parses() {
    let record: AnnotationRecord =
        serde_json::from_value(serde_json::json!({ "longitude": 1.0, "latitude": 2.0 })).unwrap();
    assert_eq!(record, AnnotationRecord::new(1.0, 2.0, None));
}

#[test]
fn to_record_omits_absent_id() {
    let json = serde_json::to_value(Annotation::new(1.0, 2.0, 3.0).to_record()).unwrap();
    assert_eq!(json, serde_json::json!({ "longitude": 1.0, "latitude": 2.0, "radius": 3.0 }));
}

#[test]
fn renumber_makes_indices_dense() {
    let mut set = vec![Annotation::new(0.0, 0.0, 1.0), Annotation::new(1.0, 1.0, 1.0)];
    set[0].index = 7;
    set[1].index = 7;
    renumber(&mut set);
    assert_eq!(set[0].index, 0);
    assert_eq!(set[1].index, 1);
}
