//! The aggregation pipeline builder (C5): a closed algebra of stages that serialize to the
//! aggregation-pipeline documents the `aggregate` command expects, per spec §4.6. Grounded on the
//! shape of the teacher driver's `operation/aggregate.rs` (`Aggregate`/`AggregateTarget`), but the
//! stage/accumulator/sort enums themselves are this core's own closed algebra — spec §4.6 names
//! an explicit, bounded stage set rather than the teacher's escape-hatch-only `Vec<Document>`.

mod accumulator;
mod stage;

pub use accumulator::Accumulator;
pub use stage::{GeoNearOptions, LookupStage, Sort, SortOrder, Stage};

use bson::{Bson, Document};

/// A sequence of stages, in the order the server will apply them.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Renders the pipeline as the `Bson` array the `aggregate` command expects.
    pub fn to_bson(&self) -> Bson {
        Bson::Array(self.stages.iter().map(Stage::to_document).map(Bson::Document).collect())
    }
}

impl FromIterator<Stage> for Pipeline {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        Self { stages: iter.into_iter().collect() }
    }
}
