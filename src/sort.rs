//! Back-to-front triangle ordering for alpha blending.

use glam::Vec3;

use crate::geometry::{BufferAttribute, GeometryError, implicit_indices};

/// Reorders triangles so the one whose centroid is farthest from `camera`
/// comes first.
///
/// Triangles are read from `index` when present, otherwise from the implicit
/// sequence `0..positions.count()`. `camera` must already be in the same space
/// as `positions`. Equal distances keep their current relative order, so
/// sorting an already sorted buffer returns it unchanged. Indices left over
/// after the last full triangle are appended as they are.
pub fn sort_back_to_front(
    positions: &BufferAttribute<f32>,
    index: Option<&[u32]>,
    camera: Vec3,
) -> Result<Vec<u32>, GeometryError> {
    let implicit: Vec<u32>;
    let corners = match index {
        Some(index) => index,
        None => {
            implicit = implicit_indices(positions.count())?;
            implicit.as_slice()
        }
    };

    let count = positions.count();
    let triangles = corners.chunks_exact(3);
    let remainder = triangles.remainder();

    let mut keyed = Vec::with_capacity(corners.len() / 3);
    for tri in triangles {
        let mut centroid = Vec3::ZERO;
        for &i in tri {
            if i as usize >= count {
                return Err(GeometryError::IndexOutOfRange { index: i, count });
            }
            centroid += positions.vec3(i as usize);
        }
        centroid /= 3.0;
        keyed.push((camera.distance_squared(centroid), [tri[0], tri[1], tri[2]]));
    }

    // `sort_by` is stable.
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut sorted = Vec::with_capacity(corners.len());
    for (_, tri) in &keyed {
        sorted.extend_from_slice(tri);
    }
    sorted.extend_from_slice(remainder);
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(values: Vec<f32>) -> BufferAttribute<f32> {
        BufferAttribute::new(values, 3).unwrap()
    }

    /// Two triangles: one around z = 0, one around z = -5.
    fn two_triangles() -> BufferAttribute<f32> {
        positions(vec![
            0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, -5.0, //
            1.0, 0.0, -5.0, //
            0.0, 1.0, -5.0,
        ])
    }

    #[test]
    fn farther_triangle_comes_first() {
        let pos = two_triangles();
        let sorted = sort_back_to_front(&pos, Some(&[0, 1, 2, 3, 4, 5]), Vec3::new(0.0, 0.0, 10.0))
            .unwrap();
        assert_eq!(sorted, vec![3, 4, 5, 0, 1, 2]);

        // From the other side the order flips.
        let sorted =
            sort_back_to_front(&pos, Some(&sorted), Vec3::new(0.0, 0.0, -20.0)).unwrap();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn implicit_index_is_used_without_buffer() {
        let pos = two_triangles();
        let sorted = sort_back_to_front(&pos, None, Vec3::new(0.0, 0.0, 10.0)).unwrap();
        assert_eq!(sorted, vec![3, 4, 5, 0, 1, 2]);
    }

    #[test]
    fn sorting_is_idempotent() {
        let pos = two_triangles();
        let camera = Vec3::new(3.0, -2.0, 7.0);
        let once = sort_back_to_front(&pos, Some(&[0, 1, 2, 3, 4, 5]), camera).unwrap();
        let twice = sort_back_to_front(&pos, Some(&once), camera).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn ties_keep_input_order() {
        // Both triangles share a centroid.
        let pos = positions(vec![
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, //
        ]);
        let sorted =
            sort_back_to_front(&pos, Some(&[0, 1, 2, 2, 1, 0]), Vec3::new(0.0, 0.0, 4.0)).unwrap();
        assert_eq!(sorted, vec![0, 1, 2, 2, 1, 0]);
    }

    #[test]
    fn single_triangle_is_unchanged() {
        let pos = positions(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        let sorted = sort_back_to_front(&pos, Some(&[0, 1, 2]), Vec3::new(0.0, 0.0, 10.0)).unwrap();
        assert_eq!(sorted, vec![0, 1, 2]);
    }

    #[test]
    fn partial_triple_stays_at_end() {
        let pos = two_triangles();
        let sorted =
            sort_back_to_front(&pos, Some(&[0, 1, 2, 3, 4, 5, 1]), Vec3::new(0.0, 0.0, 10.0))
                .unwrap();
        assert_eq!(sorted, vec![3, 4, 5, 0, 1, 2, 1]);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let pos = two_triangles();
        assert_eq!(
            sort_back_to_front(&pos, Some(&[0, 1, 9]), Vec3::ZERO).unwrap_err(),
            GeometryError::IndexOutOfRange { index: 9, count: 6 }
        );
    }
}
