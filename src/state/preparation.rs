//! Round-zero preparation.
//!
//! Before round 1 a project needs a test set, a mining set and a seed model,
//! plus optionally a candidate training set to merge into the project's
//! training set. This module computes the slots, filters the choices offered
//! to each, and plans how the loop is started.
//!
//! Slot invariants are kept by restricting what can be chosen, not by
//! rejecting a submission:
//! - a dataset id occupies at most one slot (the project's training set
//!   counts as occupied)
//! - every non-mining dataset slot shares at least one keyword with the project

use thiserror::Error;

use crate::effects::{TaskKind, TaskRequest};
use crate::types::{
    DatasetId, DatasetSummary, IterationId, ModelSummary, NewIteration, Project, ProjectSlots,
    ResultRef, ResultState, SlotKind,
};

/// A filter composed into a slot's eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFilter {
    /// Dataset keywords must intersect the project's (always true for mining).
    MatchKeywords,
    /// Excludes the project's held-out evaluation sets.
    NotTestingSet,
    /// Excludes datasets bound to a different slot.
    ExcludeSelected,
}

/// One preparation slot and the filters applied to its candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareSlot {
    pub kind: SlotKind,
    pub optional: bool,
    pub filters: &'static [SlotFilter],
}

const CANDIDATE_FILTERS: &[SlotFilter] = &[
    SlotFilter::MatchKeywords,
    SlotFilter::NotTestingSet,
    SlotFilter::ExcludeSelected,
];
const TEST_FILTERS: &[SlotFilter] = &[SlotFilter::MatchKeywords, SlotFilter::ExcludeSelected];
const MINING_FILTERS: &[SlotFilter] = &[
    SlotFilter::MatchKeywords,
    SlotFilter::NotTestingSet,
    SlotFilter::ExcludeSelected,
];

/// Returns the ordered preparation slots for a project.
///
/// The candidate training set is offered only while the project has a
/// training set to merge it into.
pub fn preparation_slots(project: &Project) -> Vec<PrepareSlot> {
    let mut slots = Vec::with_capacity(4);
    if project.train_set.is_some() {
        slots.push(PrepareSlot {
            kind: SlotKind::CandidateTrainSet,
            optional: true,
            filters: CANDIDATE_FILTERS,
        });
    }
    slots.push(PrepareSlot {
        kind: SlotKind::TestSet,
        optional: false,
        filters: TEST_FILTERS,
    });
    slots.push(PrepareSlot {
        kind: SlotKind::MiningSet,
        optional: false,
        filters: MINING_FILTERS,
    });
    slots.push(PrepareSlot {
        kind: SlotKind::Model,
        optional: false,
        filters: &[],
    });
    slots
}

/// Keyword relevance check. The mining slot accepts anything.
pub fn match_keywords(slot: SlotKind, dataset: &DatasetSummary, project: &Project) -> bool {
    if slot == SlotKind::MiningSet {
        return true;
    }
    let keywords = project.keyword_set();
    dataset
        .keywords
        .iter()
        .any(|k| keywords.contains(k.as_str()))
}

/// Excludes the project's held-out evaluation sets.
pub fn not_testing_set(dataset: &DatasetSummary, project: &Project) -> bool {
    !project.testing_sets.contains(&dataset.id)
}

/// Excludes a dataset bound to any slot other than `slot`.
pub fn exclude_selected(
    slot: SlotKind,
    dataset: &DatasetSummary,
    project: &Project,
    slots: &ProjectSlots,
) -> bool {
    occupied_by_others(slot, project, slots).all(|id| id != dataset.id)
}

fn occupied_by_others<'a>(
    slot: SlotKind,
    project: &'a Project,
    slots: &'a ProjectSlots,
) -> impl Iterator<Item = DatasetId> + 'a {
    [
        SlotKind::CandidateTrainSet,
        SlotKind::TestSet,
        SlotKind::MiningSet,
    ]
    .into_iter()
    .filter(move |other| *other != slot)
    .filter_map(move |other| slots.dataset(other))
    .chain(project.train_set)
}

/// Filters `candidates` down to the datasets `slot` may be bound to.
///
/// Only valid datasets are offered. Order is preserved.
pub fn eligible_datasets(
    slot: &PrepareSlot,
    candidates: &[DatasetSummary],
    project: &Project,
    slots: &ProjectSlots,
) -> Vec<DatasetSummary> {
    candidates
        .iter()
        .filter(|d| d.state == ResultState::Valid)
        .filter(|d| {
            slot.filters.iter().all(|filter| match filter {
                SlotFilter::MatchKeywords => match_keywords(slot.kind, d, project),
                SlotFilter::NotTestingSet => not_testing_set(d, project),
                SlotFilter::ExcludeSelected => exclude_selected(slot.kind, d, project, slots),
            })
        })
        .cloned()
        .collect()
}

/// Filters model candidates down to valid models.
pub fn eligible_models(candidates: &[ModelSummary]) -> Vec<ModelSummary> {
    candidates
        .iter()
        .filter(|m| m.state == ResultState::Valid)
        .cloned()
        .collect()
}

/// Returns true if every required slot is bound.
pub fn ready_to_start(project: &Project, slots: &ProjectSlots) -> bool {
    preparation_slots(project)
        .iter()
        .filter(|s| !s.optional)
        .all(|s| slots.is_bound(s.kind))
}

/// Errors from planning the loop start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreparationError {
    /// A required slot is unbound.
    #[error("required slot {} is not bound", .0.name())]
    SlotMissing(SlotKind),

    /// The project already has an iteration.
    #[error("project already started (iteration {0})")]
    AlreadyStarted(IterationId),
}

/// How to start the loop once the slots are ready.
#[derive(Debug, Clone, PartialEq)]
pub enum StartPlan {
    /// Create round 1 directly.
    CreateRound(NewIteration),

    /// Merge the candidate training set into the project's training set first.
    ///
    /// The round is created only after the merge result is valid, with the
    /// merged dataset as its training set.
    MergeThenCreate {
        merge: TaskRequest,
        then: NewIteration,
    },
}

/// Plans the loop start for the given slot bindings.
pub fn plan_start(project: &Project, slots: &ProjectSlots) -> Result<StartPlan, PreparationError> {
    if let Some(existing) = project.current_iteration.filter(|id| !id.is_none()) {
        return Err(PreparationError::AlreadyStarted(existing));
    }
    if let Some(missing) = preparation_slots(project)
        .iter()
        .find(|s| !s.optional && !slots.is_bound(s.kind))
    {
        return Err(PreparationError::SlotMissing(missing.kind));
    }

    let round = NewIteration {
        project_id: project.id,
        round: 1,
        prev_iteration: IterationId::NONE,
        test_set: slots.test_set,
        mining_set: slots.mining_set,
        train_set: project.train_set,
        seed_model: slots.model,
    };

    match (slots.candidate_train_set, project.train_set) {
        (Some(candidate), Some(train_set)) => Ok(StartPlan::MergeThenCreate {
            merge: TaskRequest {
                kind: TaskKind::Merge,
                project_id: project.id,
                iteration_id: None,
                stage: None,
                inputs: vec![ResultRef::dataset(train_set), ResultRef::dataset(candidate)],
                options: serde_json::Value::Null,
            },
            then: round,
        }),
        _ => Ok(StartPlan::CreateRound(round)),
    }
}
