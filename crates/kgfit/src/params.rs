//! Embedding matrices and the per-model family registry.
//!
//! Every model owns a [`ParameterRegistry`]: a fixed set of named
//! [`Family`] values, each pairing one [`EmbeddingParameterSet`] with the
//! [`GradientAccumulator`] that collects its batch gradient. The set of
//! families is decided when the model is built and never changes.
//!
//! | Model | Families |
//! |-------|----------|
//! | Translational | `E`, `R` |
//! | Bilinear-Diagonal | `E`, `R` |
//! | Bilinear-Matrix | `E`, `R` (rows of width k²) |
//! | Complex-Bilinear | `Er`, `Ei`, `Rr`, `Ri` |
//! | Ensemble | `weights` |

use std::collections::HashMap;
use std::path::Path;

use ndarray::{Array2, ArrayView1, ArrayViewMut1};

use crate::error::{Error, Result};
use crate::gradient::GradientAccumulator;
use crate::io;

/// Subdirectory of a dump location that holds family matrices.
pub const PARAMETERS_DIR: &str = "parameters";

/// Dense embedding matrix; row `id` is the embedding of `id`.
///
/// The shape is fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingParameterSet {
    values: Array2<f64>,
}

impl EmbeddingParameterSet {
    /// Zero-filled set of `count` embeddings of width `dim`.
    pub fn zeros(count: usize, dim: usize) -> Self {
        Self {
            values: Array2::zeros((count, dim)),
        }
    }

    /// Wrap an existing `count x dim` matrix.
    pub fn from_matrix(values: Array2<f64>) -> Self {
        Self { values }
    }

    /// Number of embeddings.
    pub fn count(&self) -> usize {
        self.values.nrows()
    }

    /// Embedding width.
    pub fn dim(&self) -> usize {
        self.values.ncols()
    }

    /// Embedding of `id`.
    pub fn row(&self, id: usize) -> ArrayView1<'_, f64> {
        self.values.row(id)
    }

    pub(crate) fn row_mut(&mut self, id: usize) -> ArrayViewMut1<'_, f64> {
        self.values.row_mut(id)
    }

    /// The whole matrix.
    pub fn matrix(&self) -> &Array2<f64> {
        &self.values
    }

    #[cfg(test)]
    pub(crate) fn matrix_mut(&mut self) -> &mut Array2<f64> {
        &mut self.values
    }
}

/// Role of a family, used to pick regularization and normalization settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyKind {
    /// Indexed by entity id.
    Entity,
    /// Indexed by relation id.
    Relation,
    /// Anything else (ensemble weights).
    Auxiliary,
}

/// Handle to a family inside its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FamilyId(usize);

/// One named parameter matrix with its gradient accumulator.
#[derive(Debug, Clone)]
pub struct Family {
    name: String,
    kind: FamilyKind,
    /// Current parameter values.
    pub params: EmbeddingParameterSet,
    /// Gradient collected during the current batch.
    pub gradient: GradientAccumulator,
}

impl Family {
    fn new(name: &str, kind: FamilyKind, params: EmbeddingParameterSet) -> Self {
        let gradient = GradientAccumulator::new(params.count(), params.dim());
        Self {
            name: name.to_string(),
            kind,
            params,
            gradient,
        }
    }

    /// Family name, also its dump file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role of the family.
    pub fn kind(&self) -> FamilyKind {
        self.kind
    }

    /// Add the L2 penalty gradient `2·λ·scale·param[id]·count[id]` for touched ids.
    pub fn add_l2(&mut self, lambda: f64, scale: f64) {
        let weight = 2.0 * lambda * scale;
        if weight <= 0.0 {
            return;
        }
        let params = &self.params;
        self.gradient.for_each_mut(|id, count, mut grad| {
            grad.scaled_add(weight * count as f64, &params.row(id));
        });
    }

    /// Subtract each touched gradient slot from its parameter row.
    pub fn apply_gradient(&mut self) {
        for (id, _, step) in self.gradient.iter() {
            let mut row = self.params.row_mut(id);
            row -= &step;
        }
    }

    /// Rescale every touched embedding to unit L2 norm.
    pub fn normalize_touched(&mut self) {
        for &id in self.gradient.ids() {
            let mut row = self.params.row_mut(id);
            let norm = row.dot(&row).sqrt();
            if norm > 0.0 {
                row /= norm;
            }
        }
    }
}

/// Named families of one model, fixed after construction.
#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    families: Vec<Family>,
    index: HashMap<String, usize>,
}

impl ParameterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a family. Names must be unique.
    pub fn register(
        &mut self,
        name: &str,
        kind: FamilyKind,
        params: EmbeddingParameterSet,
    ) -> Result<FamilyId> {
        if self.index.contains_key(name) {
            return Err(Error::Config(format!("duplicate parameter family `{name}`")));
        }
        let id = self.families.len();
        self.families.push(Family::new(name, kind, params));
        self.index.insert(name.to_string(), id);
        Ok(FamilyId(id))
    }

    /// Handle of a family by name.
    pub fn id_of(&self, name: &str) -> Option<FamilyId> {
        self.index.get(name).copied().map(FamilyId)
    }

    /// Family by name.
    pub fn get(&self, name: &str) -> Option<&Family> {
        self.index.get(name).map(|&i| &self.families[i])
    }

    /// Mutable family by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Family> {
        let i = *self.index.get(name)?;
        Some(&mut self.families[i])
    }

    /// Family by handle.
    pub fn family(&self, id: FamilyId) -> &Family {
        &self.families[id.0]
    }

    /// Mutable family by handle.
    pub fn family_mut(&mut self, id: FamilyId) -> &mut Family {
        &mut self.families[id.0]
    }

    /// Parameters of a family by handle.
    pub fn params(&self, id: FamilyId) -> &EmbeddingParameterSet {
        &self.families[id.0].params
    }

    /// Gradient accumulator of a family by handle.
    pub fn gradient_mut(&mut self, id: FamilyId) -> &mut GradientAccumulator {
        &mut self.families[id.0].gradient
    }

    /// Number of families.
    pub fn len(&self) -> usize {
        self.families.len()
    }

    /// Whether the registry has no families.
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Families in registration order.
    pub fn iter(&self) -> std::slice::Iter<'_, Family> {
        self.families.iter()
    }

    /// Mutable families in registration order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Family> {
        self.families.iter_mut()
    }

    /// Reset every gradient accumulator.
    pub fn reset_gradients(&mut self) {
        for family in &mut self.families {
            family.gradient.reset();
        }
    }

    /// Subtract every accumulated step from its parameters.
    pub fn apply_gradients(&mut self) {
        for family in &mut self.families {
            family.apply_gradient();
        }
    }

    /// Write each family to `dir/parameters/<name>`.
    pub fn dump(&self, dir: &Path) -> Result<()> {
        let parameters = dir.join(PARAMETERS_DIR);
        std::fs::create_dir_all(&parameters)?;
        for family in &self.families {
            io::dump_matrix(parameters.join(family.name()), family.params.matrix())?;
        }
        Ok(())
    }
}
