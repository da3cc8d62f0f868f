//! Project records and the round-zero slot bindings.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::ids::{DatasetId, GroupId, IterationId, ModelId, ProjectId};
use super::result::ResultState;

/// A project as the loop controller sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Keywords (class names) the project is trained on.
    pub keywords: Vec<String>,
    #[serde(default)]
    pub train_set: Option<DatasetId>,
    #[serde(default)]
    pub test_set: Option<DatasetId>,
    #[serde(default)]
    pub mining_set: Option<DatasetId>,
    #[serde(default)]
    pub model: Option<ModelId>,
    #[serde(default)]
    pub candidate_train_set: Option<DatasetId>,
    /// Project-level held-out evaluation sets.
    #[serde(default)]
    pub testing_sets: Vec<DatasetId>,
    #[serde(default)]
    pub current_iteration: Option<IterationId>,
}

impl Project {
    /// Returns the keyword set for intersection checks.
    pub fn keyword_set(&self) -> HashSet<&str> {
        self.keywords.iter().map(String::as_str).collect()
    }

    /// Returns the slot bindings currently persisted on the project.
    pub fn slots(&self) -> ProjectSlots {
        ProjectSlots {
            candidate_train_set: self.candidate_train_set,
            test_set: self.test_set,
            mining_set: self.mining_set,
            model: self.model,
        }
    }
}

/// A dataset offered as a slot candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub id: DatasetId,
    pub group_id: GroupId,
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub state: ResultState,
}

/// A model offered as a slot candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: ModelId,
    pub name: String,
    pub state: ResultState,
}

/// A project-level preparation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    CandidateTrainSet,
    TestSet,
    MiningSet,
    Model,
}

impl SlotKind {
    pub fn name(&self) -> &'static str {
        match self {
            SlotKind::CandidateTrainSet => "candidate_train_set",
            SlotKind::TestSet => "test_set",
            SlotKind::MiningSet => "mining_set",
            SlotKind::Model => "model",
        }
    }
}

/// Round-zero slot bindings.
///
/// INVARIANTS (kept by the eligibility filters, not checked here):
/// - a dataset id occupies at most one slot
/// - every non-mining dataset slot shares a keyword with the project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSlots {
    pub candidate_train_set: Option<DatasetId>,
    pub test_set: Option<DatasetId>,
    pub mining_set: Option<DatasetId>,
    pub model: Option<ModelId>,
}

impl ProjectSlots {
    /// Returns the dataset bound to a dataset slot. Always `None` for [`SlotKind::Model`].
    pub fn dataset(&self, slot: SlotKind) -> Option<DatasetId> {
        match slot {
            SlotKind::CandidateTrainSet => self.candidate_train_set,
            SlotKind::TestSet => self.test_set,
            SlotKind::MiningSet => self.mining_set,
            SlotKind::Model => None,
        }
    }

    pub fn is_bound(&self, slot: SlotKind) -> bool {
        match slot {
            SlotKind::Model => self.model.is_some(),
            other => self.dataset(other).is_some(),
        }
    }

    /// Binds a dataset slot, returning the updated bindings.
    pub fn with_dataset(mut self, slot: SlotKind, id: Option<DatasetId>) -> Self {
        match slot {
            SlotKind::CandidateTrainSet => self.candidate_train_set = id,
            SlotKind::TestSet => self.test_set = id,
            SlotKind::MiningSet => self.mining_set = id,
            SlotKind::Model => {}
        }
        self
    }
}

/// Partial project update. Only `Some` fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUpdate {
    pub id: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_set: Option<DatasetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_train_set: Option<DatasetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_set: Option<DatasetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mining_set: Option<DatasetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_iteration: Option<IterationId>,
}

impl ProjectUpdate {
    /// An update that persists all slot bindings.
    pub fn slots(id: ProjectId, slots: &ProjectSlots) -> Self {
        ProjectUpdate {
            id,
            candidate_train_set: slots.candidate_train_set,
            test_set: slots.test_set,
            mining_set: slots.mining_set,
            model: slots.model,
            ..Default::default()
        }
    }
}
