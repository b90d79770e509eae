use core::ops::{Index, IndexMut};
use nalgebra::Vector3;

/// One of the three body axes the stabilizer controls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    Roll,
    Pitch,
    Yaw,
}

impl Axis {
    /// Every axis in the order the control loop visits them.
    pub const ALL: [Axis; 3] = [Axis::Roll, Axis::Pitch, Axis::Yaw];

    /// Position of this axis in a roll/pitch/yaw ordered sequence.
    pub const fn index(self) -> usize {
        match self {
            Axis::Roll => 0,
            Axis::Pitch => 1,
            Axis::Yaw => 2,
        }
    }
}

/// A value for each of roll, pitch and yaw, indexed by [`Axis`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PerAxis<T>(pub [T; 3]);

impl<T> PerAxis<T> {
    pub const fn new(roll: T, pitch: T, yaw: T) -> Self {
        Self([roll, pitch, yaw])
    }

    pub fn from_fn(mut f: impl FnMut(Axis) -> T) -> Self {
        Self([f(Axis::Roll), f(Axis::Pitch), f(Axis::Yaw)])
    }

    pub fn iter(&self) -> impl Iterator<Item = (Axis, &T)> {
        Axis::ALL.into_iter().zip(self.0.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Axis, &mut T)> {
        Axis::ALL.into_iter().zip(self.0.iter_mut())
    }
}

impl<T: Copy> PerAxis<T> {
    pub const fn splat(value: T) -> Self {
        Self([value; 3])
    }
}

impl<T> Index<Axis> for PerAxis<T> {
    type Output = T;

    fn index(&self, axis: Axis) -> &T {
        &self.0[axis.index()]
    }
}

impl<T> IndexMut<Axis> for PerAxis<T> {
    fn index_mut(&mut self, axis: Axis) -> &mut T {
        &mut self.0[axis.index()]
    }
}

impl From<PerAxis<f32>> for Vector3<f32> {
    fn from(values: PerAxis<f32>) -> Self {
        Vector3::new(values.0[0], values.0[1], values.0[2])
    }
}

impl From<Vector3<f32>> for PerAxis<f32> {
    fn from(v: Vector3<f32>) -> Self {
        PerAxis::new(v.x, v.y, v.z)
    }
}
