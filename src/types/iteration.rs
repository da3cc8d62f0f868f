//! Iteration (round) records and the stage ordinal they carry.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{DatasetId, IterationId, ModelId, ProjectId};
use super::result::{ResultKind, ResultRef, UnknownStateCode};

/// One phase of an iteration round.
///
/// Serialized as the backend's ordinal (`0..=5`). The static descriptor for
/// each stage lives in [`crate::state::stages`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Stage {
    #[default]
    PrepareMining,
    Mining,
    Labelling,
    Merging,
    Training,
    /// Terminal stage: the round is complete.
    Next,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::PrepareMining,
        Stage::Mining,
        Stage::Labelling,
        Stage::Merging,
        Stage::Training,
        Stage::Next,
    ];

    pub fn ordinal(&self) -> u8 {
        match self {
            Stage::PrepareMining => 0,
            Stage::Mining => 1,
            Stage::Labelling => 2,
            Stage::Merging => 3,
            Stage::Training => 4,
            Stage::Next => 5,
        }
    }

    /// Looks up a stage by ordinal, returning `None` for anything outside `0..=5`.
    pub fn from_ordinal(ordinal: u8) -> Option<Stage> {
        Stage::ALL.get(usize::from(ordinal)).copied()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Next)
    }
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> u8 {
        stage.ordinal()
    }
}

impl TryFrom<u8> for Stage {
    type Error = UnknownStateCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Stage::from_ordinal(code).ok_or(UnknownStateCode { set: "stage", code })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ordinal())
    }
}

/// A bindable field of an [`Iteration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationField {
    TestSet,
    MiningSet,
    MiningResult,
    LabelSet,
    TrainUpdateSet,
    Model,
    TrainSet,
}

impl IterationField {
    /// The kind of result this field holds.
    pub fn kind(&self) -> ResultKind {
        match self {
            IterationField::Model => ResultKind::Model,
            _ => ResultKind::Dataset,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IterationField::TestSet => "test_set",
            IterationField::MiningSet => "mining_set",
            IterationField::MiningResult => "mining_result",
            IterationField::LabelSet => "label_set",
            IterationField::TrainUpdateSet => "train_update_set",
            IterationField::Model => "model",
            IterationField::TrainSet => "train_set",
        }
    }
}

/// One round of the active-learning loop.
///
/// Superseded, never deleted, by the next round's iteration, which links back
/// through `prev_iteration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iteration {
    pub id: IterationId,
    pub project_id: ProjectId,
    pub round: u32,
    pub current_stage: Stage,
    #[serde(default)]
    pub test_set: Option<DatasetId>,
    #[serde(default)]
    pub mining_set: Option<DatasetId>,
    #[serde(default)]
    pub mining_result: Option<DatasetId>,
    #[serde(default)]
    pub label_set: Option<DatasetId>,
    #[serde(default)]
    pub train_update_set: Option<DatasetId>,
    /// Model produced by this round's training stage.
    #[serde(default)]
    pub model: Option<ModelId>,
    /// Model the round mines with: the previous round's model, or the
    /// project's seed model for round 1.
    #[serde(default)]
    pub seed_model: Option<ModelId>,
    /// Training set carried over from the previous round (or the project for round 1).
    #[serde(default)]
    pub train_set: Option<DatasetId>,
    #[serde(default)]
    pub prev_iteration: IterationId,
}

impl Iteration {
    /// Returns the result bound to `field`, if any.
    pub fn field(&self, field: IterationField) -> Option<ResultRef> {
        match field {
            IterationField::TestSet => self.test_set.map(ResultRef::dataset),
            IterationField::MiningSet => self.mining_set.map(ResultRef::dataset),
            IterationField::MiningResult => self.mining_result.map(ResultRef::dataset),
            IterationField::LabelSet => self.label_set.map(ResultRef::dataset),
            IterationField::TrainUpdateSet => self.train_update_set.map(ResultRef::dataset),
            IterationField::Model => self.model.map(ResultRef::model),
            IterationField::TrainSet => self.train_set.map(ResultRef::dataset),
        }
    }

    /// Training set the round produced: the merged update if merging ran,
    /// otherwise the carried-over set.
    pub fn derived_train_set(&self) -> Option<DatasetId> {
        self.train_update_set.or(self.train_set)
    }
}

/// Request body for creating an iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIteration {
    pub project_id: ProjectId,
    pub round: u32,
    pub prev_iteration: IterationId,
    pub test_set: Option<DatasetId>,
    pub mining_set: Option<DatasetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_set: Option<DatasetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_model: Option<ModelId>,
}
