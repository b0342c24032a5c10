//! Small array helpers for the scatter search

/// Index of the first smallest element, `None` for an empty slice
///
/// Elements are expected to be comparable, i.e. no NaN.
pub fn argmin(values: &[f64]) -> Option<usize> {
    let (&first, rest) = values.split_first()?;
    let (idx, _) = rest
        .iter()
        .enumerate()
        .fold((0, first), |(min_idx, min_val), (idx, &val)| {
            if val < min_val {
                (idx + 1, val)
            } else {
                (min_idx, min_val)
            }
        });
    Some(idx)
}

/// Abscissa of the vertex of the parabola through three points
///
/// Returns `None` unless the parabola opens upwards, i.e. the vertex is a minimum.
pub fn parabola_vertex(x: [f64; 3], y: [f64; 3]) -> Option<f64> {
    let slope01 = (y[1] - y[0]) / (x[1] - x[0]);
    let slope12 = (y[2] - y[1]) / (x[2] - x[1]);
    let a = (slope12 - slope01) / (x[2] - x[0]);
    if !(a.is_finite() && a > 0.0) {
        return None;
    }
    let b = slope01 - a * (x[0] + x[1]);
    let vertex = -0.5 * b / a;
    vertex.is_finite().then_some(vertex)
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    #[test]
    fn test_argmin_basic() {
        assert_eq!(argmin(&[3.0, 1.0, 2.0, 5.0]), Some(1));
    }

    #[test]
    fn test_argmin_first_of_ties() {
        assert_eq!(argmin(&[2.0, 0.5, 0.5, 0.5]), Some(1));
        assert_eq!(argmin(&[1.0, 1.0, 1.0]), Some(0));
    }

    #[test]
    fn test_argmin_last_element() {
        assert_eq!(argmin(&[3.0, 2.0, 1.0]), Some(2));
    }

    #[test]
    fn test_argmin_empty() {
        assert_eq!(argmin(&[]), None);
    }

    #[test]
    fn test_parabola_vertex_uneven_nodes() {
        // y = 3 (x - 0.7)^2 - 2
        let f = |x: f64| 3.0 * (x - 0.7).powi(2) - 2.0;
        let x = [-1.0, 0.25, 2.0];
        let vertex = parabola_vertex(x, x.map(f)).unwrap();
        assert_relative_eq!(vertex, 0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_parabola_vertex_concave() {
        assert_eq!(parabola_vertex([0.0, 1.0, 2.0], [0.0, 1.0, 0.0]), None);
        assert_eq!(parabola_vertex([0.0, 1.0, 2.0], [0.0, 1.0, 2.0]), None);
    }
}
