//! Named per-entity data arrays.

use serde::{Deserialize, Serialize};

/// Tag payload over the closed scalar set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TagData {
    I8(Vec<i8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F64(Vec<f64>),
}

impl TagData {
    /// Total number of scalar values.
    pub fn len(&self) -> usize {
        match self {
            TagData::I8(v) => v.len(),
            TagData::I32(v) => v.len(),
            TagData::I64(v) => v.len(),
            TagData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named array with `ncomps` scalars per entity of one dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    name: String,
    ncomps: usize,
    data: TagData,
}

impl Tag {
    pub(crate) fn new(name: String, ncomps: usize, data: TagData) -> Self {
        Self { name, ncomps, data }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ncomps(&self) -> usize {
        self.ncomps
    }

    pub fn data(&self) -> &TagData {
        &self.data
    }

    pub(crate) fn set_data(&mut self, data: TagData) {
        self.data = data;
    }
}
