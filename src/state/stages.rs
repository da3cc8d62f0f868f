//! Static stage descriptor table.
//!
//! Each stage declares the iteration field it populates, the field it
//! consumes, the task kind that produces its output and a URL template for
//! the task-creation screen. Loop completion is detected by [`Stage::next`]
//! returning `None`; there is no separate sentinel.

use crate::effects::TaskKind;
use crate::types::{Iteration, IterationField, ResultRef, Stage};

/// Label shown when no iteration has started yet (round 0).
pub const PREPARE_LABEL: &str = "prepare";

/// Immutable description of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDescriptor {
    pub stage: Stage,
    pub label: &'static str,
    /// Field populated by this stage's task. `None` only at the terminal stage.
    pub output: Option<IterationField>,
    /// Field consumed by this stage's task.
    pub input: Option<IterationField>,
    /// Consulted when `input` is unbound (training falls back to the carried-over set).
    pub fallback_input: Option<IterationField>,
    pub task_kind: Option<TaskKind>,
    pub url_template: Option<&'static str>,
    pub skippable: bool,
}

static DESCRIPTORS: [StageDescriptor; 6] = [
    StageDescriptor {
        stage: Stage::PrepareMining,
        label: "prepareMining",
        output: Some(IterationField::MiningSet),
        input: Some(IterationField::MiningSet),
        fallback_input: None,
        task_kind: Some(TaskKind::Fusion),
        url_template: Some("/project/{project}/fusion?iteration={iteration}&did={input}"),
        skippable: true,
    },
    StageDescriptor {
        stage: Stage::Mining,
        label: "mining",
        output: Some(IterationField::MiningResult),
        input: Some(IterationField::MiningSet),
        fallback_input: None,
        task_kind: Some(TaskKind::Mining),
        url_template: Some("/project/{project}/mining?iteration={iteration}&did={input}"),
        skippable: true,
    },
    StageDescriptor {
        stage: Stage::Labelling,
        label: "labelling",
        output: Some(IterationField::LabelSet),
        input: Some(IterationField::MiningResult),
        fallback_input: None,
        task_kind: Some(TaskKind::Label),
        url_template: Some("/project/{project}/label?iteration={iteration}&did={input}"),
        skippable: true,
    },
    StageDescriptor {
        stage: Stage::Merging,
        label: "merging",
        output: Some(IterationField::TrainUpdateSet),
        input: Some(IterationField::LabelSet),
        fallback_input: None,
        task_kind: Some(TaskKind::Merge),
        url_template: Some("/project/{project}/merge?iteration={iteration}&mid={input}"),
        skippable: true,
    },
    StageDescriptor {
        stage: Stage::Training,
        label: "training",
        output: Some(IterationField::Model),
        input: Some(IterationField::TrainUpdateSet),
        fallback_input: Some(IterationField::TrainSet),
        task_kind: Some(TaskKind::Train),
        url_template: Some("/project/{project}/train?iteration={iteration}&did={input}"),
        skippable: false,
    },
    StageDescriptor {
        stage: Stage::Next,
        label: "next",
        output: None,
        input: Some(IterationField::Model),
        fallback_input: None,
        task_kind: None,
        url_template: None,
        skippable: false,
    },
];

impl Stage {
    /// Returns the static descriptor for this stage.
    pub fn descriptor(&self) -> &'static StageDescriptor {
        &DESCRIPTORS[usize::from(self.ordinal())]
    }

    /// Returns the following stage, or `None` at the terminal stage.
    pub fn next(&self) -> Option<Stage> {
        Stage::from_ordinal(self.ordinal() + 1)
    }

    pub fn label(&self) -> &'static str {
        self.descriptor().label
    }
}

impl StageDescriptor {
    /// Returns the descriptor of the following stage.
    pub fn next(&self) -> Option<&'static StageDescriptor> {
        self.stage.next().map(|s| s.descriptor())
    }

    /// Resolves the input this stage consumes for a given iteration.
    pub fn resolve_input(&self, iteration: &Iteration) -> Option<ResultRef> {
        self.input
            .and_then(|f| iteration.field(f))
            .or_else(|| self.fallback_input.and_then(|f| iteration.field(f)))
    }

    /// Expands the URL template into the task-creation target for `iteration`.
    ///
    /// Placeholders: `{project}`, `{iteration}` and `{input}`. An unbound input
    /// expands to an empty string so the target screen can prompt for it.
    pub fn task_url(&self, iteration: &Iteration) -> Option<String> {
        let template = self.url_template?;
        let input = self
            .resolve_input(iteration)
            .map(|r| r.id.to_string())
            .unwrap_or_default();
        Some(
            template
                .replace("{project}", &iteration.project_id.0.to_string())
                .replace("{iteration}", &iteration.id.0.to_string())
                .replace("{input}", &input),
        )
    }
}

/// Keys of every stage output bound on `iteration`, in stage order.
pub fn bound_outputs(iteration: &Iteration) -> Vec<ResultRef> {
    DESCRIPTORS
        .iter()
        .filter_map(|d| d.output.and_then(|f| iteration.field(f)))
        .collect()
}

/// Human-readable name of the current step.
///
/// Falls back to [`PREPARE_LABEL`] when no iteration has started.
pub fn step_name(iteration: Option<&Iteration>) -> &'static str {
    match iteration {
        Some(it) if it.round > 0 => it.current_stage.label(),
        _ => PREPARE_LABEL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DatasetId, IterationId, ModelId, ProjectId};

    fn iteration(stage: Stage) -> Iteration {
        Iteration {
            id: IterationId(7),
            project_id: ProjectId(3),
            round: 1,
            current_stage: stage,
            test_set: Some(DatasetId(1)),
            mining_set: Some(DatasetId(2)),
            mining_result: None,
            label_set: None,
            train_update_set: None,
            model: None,
            seed_model: None,
            train_set: Some(DatasetId(5)),
            prev_iteration: IterationId::NONE,
        }
    }

    #[test]
    fn table_is_ordered_by_ordinal() {
        for (i, d) in DESCRIPTORS.iter().enumerate() {
            assert_eq!(usize::from(d.stage.ordinal()), i);
        }
    }

    #[test]
    fn next_chain_visits_every_stage_once() {
        let mut visited = vec![Stage::PrepareMining];
        let mut current = Stage::PrepareMining;
        while let Some(next) = current.next() {
            visited.push(next);
            current = next;
        }
        assert_eq!(visited, Stage::ALL.to_vec());
        assert!(Stage::Next.descriptor().next().is_none());
    }

    #[test]
    fn only_terminal_stage_lacks_output() {
        for stage in Stage::ALL {
            let d = stage.descriptor();
            assert_eq!(d.output.is_none(), stage.is_terminal());
            assert_eq!(d.url_template.is_none(), stage.is_terminal());
        }
    }

    #[test]
    fn training_is_not_skippable() {
        assert!(!Stage::Training.descriptor().skippable);
        assert!(Stage::Mining.descriptor().skippable);
    }

    #[test]
    fn training_input_falls_back_to_train_set() {
        let it = iteration(Stage::Training);
        assert_eq!(
            Stage::Training.descriptor().resolve_input(&it),
            Some(ResultRef::dataset(5u64))
        );
    }

    #[test]
    fn task_url_expands_placeholders() {
        let it = iteration(Stage::Mining);
        assert_eq!(
            Stage::Mining.descriptor().task_url(&it).as_deref(),
            Some("/project/3/mining?iteration=7&did=2")
        );
        assert_eq!(Stage::Next.descriptor().task_url(&it), None);
    }

    #[test]
    fn task_url_leaves_unbound_input_empty() {
        let it = iteration(Stage::Labelling);
        assert_eq!(
            Stage::Labelling.descriptor().task_url(&it).as_deref(),
            Some("/project/3/label?iteration=7&did=")
        );
    }

    #[test]
    fn bound_outputs_skips_inputs_and_unbound_fields() {
        let mut it = iteration(Stage::Training);
        it.label_set = Some(DatasetId(4));
        it.model = Some(ModelId(9));

        assert_eq!(
            bound_outputs(&it),
            vec![
                ResultRef::dataset(2u64),
                ResultRef::dataset(4u64),
                ResultRef::model(9u64)
            ]
        );
    }

    #[test]
    fn step_name_falls_back_to_prepare() {
        assert_eq!(step_name(None), PREPARE_LABEL);
        let mut it = iteration(Stage::Labelling);
        assert_eq!(step_name(Some(&it)), "labelling");
        it.round = 0;
        assert_eq!(step_name(Some(&it)), PREPARE_LABEL);
    }
}
