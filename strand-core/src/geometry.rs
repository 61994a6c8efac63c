//! Point/segment/path proximity queries shared by growth and field code.

use glam::Vec3;

/// Result of a [`closest_on_path`] search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PathHit {
    /// Closest point found on the path.
    pub point: Vec3,
    /// Index of the segment (`path[segment] -> path[segment + 1]`) holding
    /// `point`. For a single-point path this is `0`.
    pub segment: usize,
    /// Euclidean distance from the query point to `point`.
    pub distance: f32,
}

/// Projects `p` onto the segment `a -> b`, clamping to its endpoints.
///
/// A degenerate segment (`a == b`) projects everything onto `a`.
pub fn closest_on_line(p: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 <= f32::EPSILON {
        return a;
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    a + ab * t
}

/// Distance from `p` to the segment `a -> b`.
#[inline]
pub fn distance_to_segment(p: Vec3, a: Vec3, b: Vec3) -> f32 {
    p.distance(closest_on_line(p, a, b))
}

/// Local nearest-point search along a polyline.
///
/// Starting at segment `start_index`, walks forward through the path and
/// keeps the running minimum. The walk stops once `overshoot` consecutive
/// segments fail to improve on it, so the result is only the nearest point
/// in the neighbourhood of `start_index`; callers rely on successive
/// queries moving along the path.
///
/// ### Parameters
/// - `point` - Query position.
/// - `path` - Polyline vertices.
/// - `start_index` - First segment to inspect; clamped to the last segment.
/// - `overshoot` - Non-improving segments tolerated before stopping
///   (`0` behaves like `1`).
///
/// ### Returns
/// `None` for an empty path, otherwise the best [`PathHit`].
pub fn closest_on_path(
    point: Vec3,
    path: &[Vec3],
    start_index: usize,
    overshoot: usize,
) -> Option<PathHit> {
    match path.len() {
        0 => return None,
        1 => {
            return Some(PathHit {
                point: path[0],
                segment: 0,
                distance: point.distance(path[0]),
            });
        }
        _ => {}
    }

    let last_segment = path.len() - 2;
    let start = start_index.min(last_segment);
    let patience = overshoot.max(1);

    let mut best: Option<(Vec3, usize, f32)> = None;
    let mut misses = 0;

    for i in start..=last_segment {
        let c = closest_on_line(point, path[i], path[i + 1]);
        let d2 = point.distance_squared(c);
        match best {
            Some((_, _, best_d2)) if d2 >= best_d2 => {
                misses += 1;
                if misses >= patience {
                    break;
                }
            }
            _ => {
                best = Some((c, i, d2));
                misses = 0;
            }
        }
    }

    best.map(|(p, segment, d2)| PathHit {
        point: p,
        segment,
        distance: d2.sqrt(),
    })
}

/// Distance from `point` to `path`, searched locally around `hint`.
///
/// Returns `f32::INFINITY` for an empty path.
pub fn distance_to_path(point: Vec3, path: &[Vec3], hint: usize, overshoot: usize) -> f32 {
    closest_on_path(point, path, hint, overshoot)
        .map(|hit| hit.distance)
        .unwrap_or(f32::INFINITY)
}

/// Total arc length of a polyline.
pub fn path_length(path: &[Vec3]) -> f32 {
    path.windows(2).map(|w| w[0].distance(w[1])).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn closest_on_line_clamps_to_near_endpoint() {
        let c = closest_on_line(
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
        );
        assert_eq!(c, Vec3::ZERO);
    }

    #[test]
    fn closest_on_line_projects_inside_segment() {
        let c = closest_on_line(Vec3::new(1.5, 3.0, 0.0), Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(c, Vec3::new(1.5, 0.0, 0.0));

        // Past the far end the projection clamps to `b`.
        let c = closest_on_line(Vec3::new(5.0, 1.0, 0.0), Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(c, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn degenerate_segment_projects_onto_start() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(closest_on_line(Vec3::ZERO, a, a), a);
        assert_relative_eq!(distance_to_segment(Vec3::ZERO, a, a), a.length());
    }

    #[test]
    fn closest_on_path_finds_nearby_segment() {
        let path = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(3.0, 0.0, 0.0),
        ];
        let hit = closest_on_path(Vec3::new(2.5, 1.0, 0.0), &path, 0, 3).unwrap();
        assert_eq!(hit.segment, 2);
        assert_relative_eq!(hit.point.x, 2.5);
        assert_relative_eq!(hit.distance, 1.0);
    }

    #[test]
    fn closest_on_path_starts_at_hint() {
        let path = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 5.0, 0.0),
            Vec3::new(0.0, 10.0, 0.0),
            Vec3::new(0.0, 15.0, 0.0),
            Vec3::new(0.0, 0.1, 0.0),
        ];
        let query = Vec3::ZERO;

        // The first segment touches the query; the next one is worse.
        let hit = closest_on_path(query, &path, 0, 1).unwrap();
        assert_eq!(hit.segment, 0);
        assert_relative_eq!(hit.distance, 0.0);

        // Starting later, the search only sees the tail of the path.
        let hit = closest_on_path(query, &path, 3, 1).unwrap();
        assert_eq!(hit.segment, 3);
        assert_relative_eq!(hit.distance, 0.1, epsilon = 1e-5);
    }

    #[test]
    fn closest_on_path_is_local_not_global() {
        let path = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 4.0, 0.0),
            Vec3::new(1.0, 8.0, 0.0),
            Vec3::new(5.0, 8.0, 0.0),
            Vec3::new(5.0, 0.5, 0.0),
        ];
        let query = Vec3::new(5.0, 0.0, 0.0);
        let local = closest_on_path(query, &path, 0, 1).unwrap();
        let exhaustive = closest_on_path(query, &path, 0, path.len()).unwrap();
        assert!(exhaustive.distance < local.distance);
        assert_eq!(exhaustive.segment, 4);
    }

    #[test]
    fn closest_on_path_handles_tiny_paths() {
        assert!(closest_on_path(Vec3::ZERO, &[], 0, 3).is_none());

        let single = [Vec3::new(0.0, 2.0, 0.0)];
        let hit = closest_on_path(Vec3::ZERO, &single, 5, 3).unwrap();
        assert_eq!(hit.point, single[0]);
        assert_relative_eq!(hit.distance, 2.0);

        assert_eq!(distance_to_path(Vec3::ZERO, &[], 0, 3), f32::INFINITY);
    }

    #[test]
    fn hint_past_the_end_is_clamped() {
        let path = [Vec3::ZERO, Vec3::X, Vec3::new(2.0, 0.0, 0.0)];
        let hit = closest_on_path(Vec3::new(0.0, 1.0, 0.0), &path, 99, 3).unwrap();
        assert_eq!(hit.segment, 1);
    }

    #[test]
    fn path_length_sums_segments() {
        let path = [Vec3::ZERO, Vec3::new(3.0, 4.0, 0.0), Vec3::new(3.0, 4.0, 1.0)];
        assert_relative_eq!(path_length(&path), 6.0);
    }
}
