use shared::domain::FinalStatus;

use super::*;
use crate::test_support::{complete, error, start, step};

fn fold(view: TaskView, envelopes: &[EventEnvelope]) -> (TaskView, Vec<SequenceAnomaly>) {
    envelopes
        .iter()
        .fold((view, Vec::new()), |(view, mut anomalies), envelope| {
            let reduction = reduce(&view, envelope);
            anomalies.extend(reduction.anomalies);
            (reduction.view, anomalies)
        })
}

#[test]
fn in_order_steps_are_appended_in_order() {
    for n in [1_u32, 2, 7, 40] {
        let envelopes: Vec<_> = (1..=n)
            .map(|i| step("t1", i, &format!("https://site/{i}")))
            .collect();
        let (view, anomalies) = fold(TaskView::for_task("t1".into()), &envelopes);

        assert!(anomalies.is_empty(), "n={n}: {anomalies:?}");
        let numbers: Vec<u32> = view.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, (1..=n).collect::<Vec<_>>());
        assert_eq!(view.steps[0].url, "https://site/1");
    }
}

#[test]
fn reduce_is_pure() {
    let (view, _) = fold(
        TaskView::for_task("t1".into()),
        &[start("t1"), step("t1", 1, "https://x")],
    );
    let before = view.clone();
    let envelope = step("t1", 2, "https://y");

    let first = reduce(&view, &envelope);
    let second = reduce(&view, &envelope);

    assert_eq!(first, second);
    assert_eq!(view, before);
}

#[test]
fn full_run_scenario_ends_completed_with_summary() {
    let (view, anomalies) = fold(
        TaskView::for_task("t1".into()),
        &[
            start("t1"),
            step("t1", 1, "https://x"),
            step("t1", 2, "https://y"),
            complete("t1", FinalStatus::Completed, "found 3 flights"),
        ],
    );

    assert!(anomalies.is_empty());
    assert_eq!(view.status, TaskStatus::Completed);
    let steps: Vec<(u32, &str)> = view
        .steps
        .iter()
        .map(|s| (s.step_number, s.url.as_str()))
        .collect();
    assert_eq!(steps, vec![(1, "https://x"), (2, "https://y")]);
    assert_eq!(view.final_summary.as_deref(), Some("found 3 flights"));
    assert!(view.is_completed());
}

#[test]
fn first_step_out_of_order_is_kept_and_flagged() {
    let reduction = reduce(&TaskView::for_task("t1".into()), &step("t1", 3, "https://z"));

    assert_eq!(reduction.view.steps.len(), 1);
    assert_eq!(reduction.view.steps[0].step_number, 3);
    assert_eq!(
        reduction.anomalies,
        vec![SequenceAnomaly::OutOfOrder {
            expected: 1,
            received: 3
        }]
    );
}

#[test]
fn duplicate_step_number_is_appended_and_flagged() {
    let (view, anomalies) = fold(
        TaskView::for_task("t1".into()),
        &[start("t1"), step("t1", 1, "https://a"), step("t1", 1, "https://a")],
    );
    assert_eq!(view.steps.len(), 2);
    assert_eq!(
        anomalies,
        vec![SequenceAnomaly::OutOfOrder {
            expected: 2,
            received: 1
        }]
    );
}

#[test]
fn step_after_completion_is_appended_without_reverting_status() {
    let (completed, _) = fold(
        TaskView::for_task("t1".into()),
        &[
            start("t1"),
            step("t1", 1, "https://x"),
            complete("t1", FinalStatus::Completed, "done"),
        ],
    );

    let reduction = reduce(&completed, &step("t1", 2, "https://late"));

    assert_eq!(reduction.view.status, TaskStatus::Completed);
    assert_eq!(reduction.view.steps.len(), 2);
    assert_eq!(
        reduction.anomalies,
        vec![SequenceAnomaly::AfterCompletion {
            step_number: 2,
            status: TaskStatus::Completed
        }]
    );
}

#[test]
fn task_start_resets_and_is_idempotent() {
    let (dirty, _) = fold(
        TaskView::for_task("t1".into()),
        &[step("t1", 1, "https://x"), error("t1", "hiccup")],
    );

    let once = reduce(&dirty, &start("t1")).view;
    let twice = reduce(&once, &start("t1")).view;

    assert_eq!(once, twice);
    assert_eq!(once.status, TaskStatus::Running);
    assert!(once.steps.is_empty());
    assert!(once.last_error.is_none());
    assert!(once.final_summary.is_none());
    assert_eq!(once.max_steps, Some(15));
}

#[test]
fn error_fails_an_unfinished_task() {
    let (view, _) = fold(
        TaskView::for_task("t1".into()),
        &[start("t1"), error("t1", "browser crashed")],
    );
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.last_error.as_deref(), Some("browser crashed"));
}

#[test]
fn error_after_completion_keeps_final_status() {
    let (view, _) = fold(
        TaskView::for_task("t1".into()),
        &[
            start("t1"),
            complete("t1", FinalStatus::Cancelled, "stopped by user"),
            error("t1", "cleanup failed"),
        ],
    );
    assert_eq!(view.status, TaskStatus::Cancelled);
    assert_eq!(view.last_error.as_deref(), Some("cleanup failed"));
}

#[test]
fn first_step_promotes_pending_view_to_running() {
    let reduction = reduce(&TaskView::for_task("t1".into()), &step("t1", 1, "https://x"));
    assert_eq!(reduction.view.status, TaskStatus::Running);
}
