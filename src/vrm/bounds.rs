use glam::Vec3;

/// Axis-aligned bounding box. An empty box has `min > max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.expand(*p);
        }
        aabb
    }

    pub fn expand(&mut self, point: Vec3) {
        if !point.is_finite() {
            return;
        }
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&mut self, other: &Aabb) {
        if !other.is_empty() {
            self.expand(other.min);
            self.expand(other.max);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }

    /// Largest edge length.
    pub fn max_dimension(&self) -> f32 {
        self.size().max_element()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_box() {
        let aabb = Aabb::empty();
        assert!(aabb.is_empty());
        assert_eq!(aabb.size(), Vec3::ZERO);
        assert_eq!(aabb.max_dimension(), 0.0);
    }

    #[test]
    fn test_from_points() {
        let points = [Vec3::new(-1.0, 0.0, 2.0), Vec3::new(1.0, 3.0, -2.0)];
        let aabb = Aabb::from_points(&points);
        assert_eq!(aabb.center(), Vec3::new(0.0, 1.5, 0.0));
        assert_eq!(aabb.size(), Vec3::new(2.0, 3.0, 4.0));
        assert_eq!(aabb.max_dimension(), 4.0);
    }

    #[test]
    fn test_single_point_is_not_empty_but_flat() {
        let aabb = Aabb::from_points(&[Vec3::ONE]);
        assert!(!aabb.is_empty());
        assert_eq!(aabb.max_dimension(), 0.0);
    }

    #[test]
    fn test_non_finite_points_are_skipped() {
        let aabb = Aabb::from_points(&[Vec3::new(f32::NAN, 0.0, 0.0), Vec3::ZERO]);
        assert_eq!(aabb.min, Vec3::ZERO);
        assert_eq!(aabb.max, Vec3::ZERO);
    }

    #[test]
    fn test_union_ignores_empty() {
        let mut a = Aabb::from_points(&[Vec3::ZERO, Vec3::ONE]);
        a.union(&Aabb::empty());
        assert_eq!(a.max, Vec3::ONE);
        a.union(&Aabb::from_points(&[Vec3::splat(-1.0)]));
        assert_eq!(a.min, Vec3::splat(-1.0));
    }
}
