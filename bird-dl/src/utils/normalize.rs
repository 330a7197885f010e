use crate::common::*;

/// The smallest value range that can be stretched to [0, 1].
pub const MIN_VALUE_RANGE: f32 = 1e-6;

/// Shift the values to start at zero and divide them by the new maximum.
///
/// The blend operators produce unbounded sums, and this maps the sum back into
/// [0, 1]. It returns `None` when the image is constant or contains non-finite
/// values, in which case no meaningful rescaling exists.
pub fn renormalized(mut image: Array3<f32>) -> Option<Array3<f32>> {
    let (min, max) = value_range(image.view())?;
    let range = max - min;

    if range < MIN_VALUE_RANGE {
        return None;
    }

    image.mapv_inplace(|value| ((value - min) / range).clamp(0.0, 1.0));
    Some(image)
}

/// Blend `addition * weight` into `base` and renormalize the sum.
pub fn blend(base: ArrayView3<f32>, addition: ArrayView3<f32>, weight: f32) -> Option<Array3<f32>> {
    if base.shape() != addition.shape() {
        return None;
    }
    let sum = &base + &(&addition * weight);
    renormalized(sum)
}

/// Clip every value into [0, 1].
pub fn clip_unit(image: &mut Array3<f32>) {
    image.mapv_inplace(|value| value.clamp(0.0, 1.0));
}

/// The minimum and maximum values, or `None` if any value is not finite.
pub fn value_range(image: ArrayView3<f32>) -> Option<(f32, f32)> {
    image.iter().try_fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &value| {
        value.is_finite().then(|| (min.min(value), max.max(value)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn renormalize_spans_unit_range() {
        let image = Array3::from_shape_vec((1, 2, 2), vec![0.5, 1.0, 1.5, 2.5]).unwrap();
        let image = renormalized(image).unwrap();
        assert_abs_diff_eq!(image[[0, 0, 0]], 0.0);
        assert_abs_diff_eq!(image[[0, 1, 1]], 1.0);
        assert_abs_diff_eq!(image[[0, 0, 1]], 0.25);
    }

    #[test]
    fn renormalize_rejects_constant_image() {
        let image = Array3::from_elem((1, 4, 4), 0.7);
        assert!(renormalized(image).is_none());
    }

    #[test]
    fn renormalize_rejects_non_finite_values() {
        let mut image = Array3::zeros((1, 2, 2));
        image[[0, 1, 0]] = f32::NAN;
        image[[0, 0, 1]] = 1.0;
        assert!(renormalized(image).is_none());
    }

    #[test]
    fn blend_of_image_with_itself_keeps_shape() {
        let image = Array3::from_shape_fn((1, 3, 3), |(_, y, x)| (y * 3 + x) as f32 / 8.0);
        let blended = blend(image.view(), image.view(), 1.0).unwrap();
        assert_eq!(blended.shape(), &[1, 3, 3]);
        assert_abs_diff_eq!(blended[[0, 2, 2]], 1.0);
    }
}
