use proptest::prelude::*;
use proptest::test_runner::FileFailurePersistence;
use regionswap::{box_points, order_points_clockwise, rotation_angle, Point2f};

fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(128);

    let mut config =
        ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource("proptest-regressions"));
    config.cases = cases;
    config
}

fn arb_rotated_rect() -> impl Strategy<Value = ([Point2f; 4], f32)> {
    (50.0f32..150.0, 50.0f32..150.0, 5.0f32..80.0, 5.0f32..80.0, 0.0f32..360.0)
        .prop_map(|(cx, cy, w, h, angle)| (box_points(Point2f::new(cx, cy), w, h, angle), angle))
}

fn arb_permutation() -> impl Strategy<Value = [usize; 4]> {
    Just(vec![0usize, 1, 2, 3]).prop_shuffle().prop_map(|v| [v[0], v[1], v[2], v[3]])
}

fn cross(o: Point2f, a: Point2f, b: Point2f) -> f32 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

#[test]
fn oblong_rect_at_obtuse_angle_is_reported_modulo_right_angles() {
    let quad = box_points(Point2f::new(100.0, 100.0), 60.0, 20.0, 120.0);
    let est = rotation_angle(&quad);
    assert!((est - 30.0).abs() < 1e-2, "estimated {est}");
    assert!((0.0..90.0).contains(&est));
    let diff = (est - 120.0).rem_euclid(90.0);
    assert!(diff < 0.01 || diff > 89.99);
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn canonical_order_ignores_input_order((quad, _) in arb_rotated_rect(), perm in arb_permutation()) {
        let permuted = perm.map(|i| quad[i]);
        prop_assert_eq!(order_points_clockwise(&permuted), order_points_clockwise(&quad));
    }

    #[test]
    fn canonical_order_is_idempotent((quad, _) in arb_rotated_rect()) {
        let once = order_points_clockwise(&quad);
        prop_assert_eq!(order_points_clockwise(&once), once);
    }

    #[test]
    fn canonical_order_winds_clockwise_from_the_top((quad, _) in arb_rotated_rect()) {
        let c = order_points_clockwise(&quad);
        // Clockwise on screen is a positive cross product with y pointing down.
        prop_assert!(cross(c[0], c[1], c[2]) > 0.0);
        let key = |p: &Point2f| p.y as f64 + p.x as f64 * 1e-6;
        prop_assert!(c.iter().all(|p| key(&c[0]) <= key(p)));
    }

    #[test]
    fn rotation_matches_input_modulo_right_angles((quad, angle) in arb_rotated_rect()) {
        let est = rotation_angle(&quad);
        prop_assert!((0.0..360.0).contains(&est));

        let diff = (est - angle).rem_euclid(90.0);
        prop_assert!(diff < 0.01 || diff > 89.99, "estimated {est}, rotated by {angle}");
    }
}
