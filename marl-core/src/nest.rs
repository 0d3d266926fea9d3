//! Structured numeric containers.
//!
//! Rewards, discounts and observations of a multi-agent system are nested structures keyed by
//! agent id, possibly with further nesting inside. [`Nest`] holds such a structure with
//! n-dimensional `f32` arrays at its leaves and provides the operations the n-step computation
//! needs: structure broadcasting, NumPy-style shape broadcasting and element-wise arithmetic.
//!
//! ```rust
//! use marl_core::Nest;
//!
//! let reward = Nest::map([("agent_0", Nest::scalar(1.0)), ("agent_1", Nest::scalar(2.0))]);
//! let scaled = reward.mul(&Nest::scalar(0.5)).unwrap();
//! assert_eq!(scaled.get("agent_1").and_then(Nest::as_scalar), Some(1.0));
//! ```
use crate::error::MarlError;
use ndarray::{Array1, ArrayD, IxDyn, Zip};
use std::collections::BTreeMap;

/// A nested structure of `f32` arrays.
#[derive(Clone, Debug, PartialEq)]
pub enum Nest {
    /// An n-dimensional array. Scalars are 0-dimensional arrays.
    Leaf(ArrayD<f32>),

    /// Child structures keyed by name. Iteration order is the key order.
    Map(BTreeMap<String, Nest>),
}

impl Default for Nest {
    fn default() -> Self {
        Nest::empty()
    }
}

impl From<f32> for Nest {
    fn from(v: f32) -> Self {
        Nest::scalar(v)
    }
}

impl From<ArrayD<f32>> for Nest {
    fn from(v: ArrayD<f32>) -> Self {
        Nest::Leaf(v)
    }
}

/// Shape resulting from broadcasting two shapes against each other.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>, MarlError> {
    let n = a.len().max(b.len());
    let dim = |s: &[usize], i: usize| {
        let offset = n - s.len();
        if i < offset {
            1
        } else {
            s[i - offset]
        }
    };

    (0..n)
        .map(|i| match (dim(a, i), dim(b, i)) {
            (x, y) if x == y => Ok(x),
            (1, y) => Ok(y),
            (x, 1) => Ok(x),
            _ => Err(MarlError::StructureMismatch(format!(
                "shapes {:?} and {:?} cannot be broadcast together",
                a, b
            ))),
        })
        .collect()
}

/// Broadcasts an array to the given shape, returning an owned copy.
pub fn broadcast_to(a: &ArrayD<f32>, shape: &[usize]) -> Result<ArrayD<f32>, MarlError> {
    a.broadcast(IxDyn(shape))
        .map(|v| v.to_owned())
        .ok_or_else(|| {
            MarlError::StructureMismatch(format!(
                "shape {:?} cannot be broadcast to {:?}",
                a.shape(),
                shape
            ))
        })
}

fn zip_arrays(
    a: &ArrayD<f32>,
    b: &ArrayD<f32>,
    f: impl Fn(f32, f32) -> f32,
) -> Result<ArrayD<f32>, MarlError> {
    let shape = broadcast_shape(a.shape(), b.shape())?;
    let (av, bv) = match (a.broadcast(IxDyn(&shape)), b.broadcast(IxDyn(&shape))) {
        (Some(av), Some(bv)) => (av, bv),
        _ => {
            return Err(MarlError::StructureMismatch(format!(
                "shapes {:?} and {:?} cannot be broadcast together",
                a.shape(),
                b.shape()
            )))
        }
    };
    Ok(Zip::from(&av).and(&bv).map_collect(|&x, &y| f(x, y)))
}

/// Element-wise product with broadcasting.
pub fn mul_arrays(a: &ArrayD<f32>, b: &ArrayD<f32>) -> Result<ArrayD<f32>, MarlError> {
    zip_arrays(a, b, |x, y| x * y)
}

/// Element-wise sum with broadcasting.
pub fn add_arrays(a: &ArrayD<f32>, b: &ArrayD<f32>) -> Result<ArrayD<f32>, MarlError> {
    zip_arrays(a, b, |x, y| x + y)
}

impl Nest {
    /// A 0-dimensional leaf.
    pub fn scalar(v: f32) -> Self {
        Nest::Leaf(ArrayD::from_elem(IxDyn(&[]), v))
    }

    /// A 1-dimensional leaf.
    pub fn vector(v: Vec<f32>) -> Self {
        Nest::Leaf(Array1::from(v).into_dyn())
    }

    /// A leaf with the given shape.
    pub fn from_shape_vec(shape: &[usize], data: Vec<f32>) -> Result<Self, MarlError> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(Nest::Leaf)
            .map_err(|e| MarlError::StructureMismatch(e.to_string()))
    }

    /// A map from key-value pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Nest)>,
    {
        Nest::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// An empty map.
    pub fn empty() -> Self {
        Nest::Map(BTreeMap::new())
    }

    /// Child under `key`, if this is a map.
    pub fn get(&self, key: &str) -> Option<&Nest> {
        match self {
            Nest::Map(m) => m.get(key),
            Nest::Leaf(_) => None,
        }
    }

    /// Keys of a map in order. Empty for a leaf.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Nest::Map(m) => m.keys().cloned().collect(),
            Nest::Leaf(_) => vec![],
        }
    }

    /// Returns `true` for a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Nest::Leaf(_))
    }

    /// The array of a leaf.
    pub fn as_leaf(&self) -> Option<&ArrayD<f32>> {
        match self {
            Nest::Leaf(a) => Some(a),
            Nest::Map(_) => None,
        }
    }

    /// The value of a leaf holding exactly one element.
    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            Nest::Leaf(a) if a.len() == 1 => a.iter().next().copied(),
            _ => None,
        }
    }

    /// Same structure and shapes, filled with zeros.
    pub fn zeros_like(&self) -> Nest {
        match self {
            Nest::Leaf(a) => Nest::Leaf(ArrayD::zeros(a.raw_dim())),
            Nest::Map(m) => Nest::Map(m.iter().map(|(k, v)| (k.clone(), v.zeros_like())).collect()),
        }
    }

    /// Leaves in depth-first key order.
    pub fn leaves(&self) -> Vec<&ArrayD<f32>> {
        let mut out = vec![];
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a ArrayD<f32>>) {
        match self {
            Nest::Leaf(a) => out.push(a),
            Nest::Map(m) => m.values().for_each(|v| v.collect_leaves(out)),
        }
    }

    /// Consumes the nest and returns its leaves in depth-first key order.
    pub fn into_leaves(self) -> Vec<ArrayD<f32>> {
        match self {
            Nest::Leaf(a) => vec![a],
            Nest::Map(m) => m.into_values().flat_map(Nest::into_leaves).collect(),
        }
    }

    /// Returns `true` if both nests have the same keys at every level.
    ///
    /// Leaf shapes are not compared.
    pub fn same_structure(&self, other: &Nest) -> bool {
        match (self, other) {
            (Nest::Leaf(_), Nest::Leaf(_)) => true,
            (Nest::Map(a), Nest::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.same_structure(vb))
            }
            _ => false,
        }
    }

    /// Rebuilds a nest with the structure of `template` from leaves in depth-first key order.
    pub fn unflatten_as(template: &Nest, leaves: Vec<ArrayD<f32>>) -> Result<Nest, MarlError> {
        let n_leaves = leaves.len();
        let mut iter = leaves.into_iter();
        let nest = Self::unflatten_rec(template, &mut iter)?;
        if iter.next().is_some() {
            return Err(MarlError::StructureMismatch(format!(
                "{} leaves given for a structure with {} leaves",
                n_leaves,
                template.leaves().len()
            )));
        }
        Ok(nest)
    }

    fn unflatten_rec(
        template: &Nest,
        iter: &mut impl Iterator<Item = ArrayD<f32>>,
    ) -> Result<Nest, MarlError> {
        match template {
            Nest::Leaf(_) => iter.next().map(Nest::Leaf).ok_or_else(|| {
                MarlError::StructureMismatch("too few leaves to unflatten".to_string())
            }),
            Nest::Map(m) => m
                .iter()
                .map(|(k, v)| Ok((k.clone(), Self::unflatten_rec(v, iter)?)))
                .collect::<Result<BTreeMap<_, _>, MarlError>>()
                .map(Nest::Map),
        }
    }

    fn replicate_into(leaf: &ArrayD<f32>, template: &Nest) -> Nest {
        match template {
            Nest::Leaf(_) => Nest::Leaf(leaf.clone()),
            Nest::Map(m) => Nest::Map(
                m.iter()
                    .map(|(k, v)| (k.clone(), Self::replicate_into(leaf, v)))
                    .collect(),
            ),
        }
    }

    /// Gives all arguments the same nested structure.
    ///
    /// All maps among `nests` must share one structure. Leaves are replicated into that
    /// structure. If every argument is a leaf they are returned unchanged.
    pub fn broadcast_structures(nests: &[&Nest]) -> Result<Vec<Nest>, MarlError> {
        let template = match nests.iter().find(|n| !n.is_leaf()) {
            Some(t) => *t,
            None => return Ok(nests.iter().map(|n| (*n).clone()).collect()),
        };

        nests
            .iter()
            .map(|n| match n {
                Nest::Leaf(a) => Ok(Self::replicate_into(a, template)),
                Nest::Map(_) if n.same_structure(template) => Ok((*n).clone()),
                Nest::Map(_) => Err(MarlError::StructureMismatch(format!(
                    "structures with keys {:?} and {:?} differ",
                    n.keys(),
                    template.keys()
                ))),
            })
            .collect()
    }

    fn zip_with(
        &self,
        other: &Nest,
        f: fn(&ArrayD<f32>, &ArrayD<f32>) -> Result<ArrayD<f32>, MarlError>,
    ) -> Result<Nest, MarlError> {
        let b = Self::broadcast_structures(&[self, other])?;
        let leaves = b[0]
            .leaves()
            .into_iter()
            .zip(b[1].leaves())
            .map(|(x, y)| f(x, y))
            .collect::<Result<Vec<_>, _>>()?;
        Self::unflatten_as(&b[0], leaves)
    }

    /// Element-wise product with structure and shape broadcasting.
    pub fn mul(&self, other: &Nest) -> Result<Nest, MarlError> {
        self.zip_with(other, mul_arrays)
    }

    /// Element-wise sum with structure and shape broadcasting.
    pub fn add(&self, other: &Nest) -> Result<Nest, MarlError> {
        self.zip_with(other, add_arrays)
    }

    /// Compares structures, shapes and values with an absolute tolerance.
    pub fn approx_eq(&self, other: &Nest, tol: f32) -> bool {
        match (self, other) {
            (Nest::Leaf(a), Nest::Leaf(b)) => {
                a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tol)
            }
            (Nest::Map(a), Nest::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.approx_eq(vb, tol))
            }
            _ => false,
        }
    }
}
