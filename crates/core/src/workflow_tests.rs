// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::action::ActionState;

fn diamond() -> Workflow {
    let mut wf = Workflow::new();
    for name in ["a", "b", "c", "d"] {
        wf.add_task(WorkflowTask::new(name, 100.0, 1, 1)).unwrap();
    }
    wf.add_control_dependency("a", "b").unwrap();
    wf.add_control_dependency("a", "c").unwrap();
    wf.add_control_dependency("b", "d").unwrap();
    wf.add_control_dependency("c", "d").unwrap();
    wf
}

#[test]
fn duplicate_task_rejected() {
    let mut wf = Workflow::new();
    wf.add_task(WorkflowTask::new("t", 1.0, 1, 1)).unwrap();
    assert!(matches!(
        wf.add_task(WorkflowTask::new("t", 1.0, 1, 1)),
        Err(WorkflowError::DuplicateTask(_))
    ));
}

#[test]
fn cycle_refused() {
    let mut wf = diamond();
    assert!(matches!(
        wf.add_control_dependency("d", "a"),
        Err(WorkflowError::Cycle { .. })
    ));
}

#[test]
fn ready_tasks_follow_completion() {
    let mut wf = diamond();
    let ready: Vec<_> = wf.ready_tasks().iter().map(|t| t.name.clone()).collect();
    assert_eq!(ready, ["a"]);

    wf.mark_completed("a");
    let ready: Vec<_> = wf.ready_tasks().iter().map(|t| t.name.clone()).collect();
    assert_eq!(ready, ["b", "c"]);

    wf.mark_completed("b");
    wf.mark_completed("c");
    let ready: Vec<_> = wf.ready_tasks().iter().map(|t| t.name.clone()).collect();
    assert_eq!(ready, ["d"]);

    wf.mark_completed("d");
    assert!(wf.is_done());
}

#[test]
fn input_files_are_unproduced_inputs() {
    let raw = File::new("raw", 10);
    let mid = File::new("mid", 10);
    let mut wf = Workflow::new();
    wf.add_task(WorkflowTask::new("t1", 1.0, 1, 1).with_input(raw.clone()).with_output(mid.clone()))
        .unwrap();
    wf.add_task(WorkflowTask::new("t2", 1.0, 1, 1).with_input(mid)).unwrap();

    let inputs: Vec<_> = wf.input_files().iter().map(|f| f.id().clone()).collect();
    assert_eq!(inputs, [raw.id().clone()]);
}

#[test]
fn standard_job_shape() {
    let input = File::new("in", 10);
    let output = File::new("out", 20);
    let task = WorkflowTask::new("t", 100.0, 1, 4)
        .with_input(input.clone())
        .with_output(output.clone());

    let (job, compute_name) = StandardJob::assemble(
        &task,
        |f| Some(Location::at_root("store", f.clone())),
        &[],
    )
    .unwrap();

    let j = job.borrow();
    assert_eq!(compute_name, "t-compute");
    assert_eq!(j.action_count(), 3);
    let compute = j.action_index("t-compute").unwrap();
    let read = j.action_index("t-read-in").unwrap();
    let write = j.action_index("t-write-out").unwrap();
    assert!(j.parents_of(compute).contains(&read));
    assert!(j.children_of(compute).contains(&write));
}

#[test]
fn standard_job_requires_locations() {
    let task = WorkflowTask::new("t", 1.0, 1, 1).with_input(File::new("in", 1));
    assert!(matches!(
        StandardJob::assemble(&task, |_| None, &[]),
        Err(WorkflowError::MissingFileLocation(_))
    ));
}

#[test]
fn standard_job_cleanup_runs_after_writes() {
    let output = File::new("out", 20);
    let task = WorkflowTask::new("t", 1.0, 1, 1).with_output(output.clone());
    let loc = Location::at_root("store", output);
    let (job, _) = StandardJob::assemble(
        &task,
        |f| Some(Location::at_root("store", f.clone())),
        std::slice::from_ref(&loc),
    )
    .unwrap();

    let mut j = job.borrow_mut();
    j.mark_submitted(0.0).unwrap();
    let del = j.action_index("t-delete-out").unwrap();
    assert_eq!(j.action(del).state(), ActionState::NotReady);
    assert!(!j.parents_of(del).is_empty());
}
