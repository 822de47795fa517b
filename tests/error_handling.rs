//! Error recovery tests
//!
//! First-registered matching callback wins; `halt_on_error: false`
//! continues the fold with the pre-failure change set; everything else
//! goes through the boundary, where a match turns into a recovered result
//! and a miss re-raises the decorated error.

use std::cell::RefCell;
use std::rc::Rc;

use stepline::{Pipeline, StepError, StepStatus};

fn failing_pipeline(kind: &'static str) -> Pipeline<String> {
    Pipeline::configure(|p| {
        p.step_fn(|_, word: &String| Ok(Some(word.to_uppercase())))
            .label("upcase")
            .register()?;
        p.step_fn(move |_, _| Err(StepError::new(kind, "boom")))
            .label("explode")
            .register()?;
        p.step_fn(|_, word: &String| Ok(Some(word.chars().rev().collect())))
            .label("reverse")
            .register()?;
        Ok(())
    })
    .unwrap()
}

#[test]
fn non_halting_callback_recovers_and_continues() {
    let mut pipeline = failing_pipeline("argument_error");
    pipeline.on_error(["argument_error"], false, |_, change_set: &String, _| {
        change_set.clone()
    });

    let result = pipeline.execute("hello".to_string()).unwrap();
    assert_eq!(result, "OLLEH");

    let statuses: Vec<StepStatus> = pipeline.steps().iter().map(|s| s.status()).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Success, StepStatus::Failed, StepStatus::Success]
    );

    let log = pipeline.status_log().unwrap();
    assert_eq!(log.borrow().status("explode"), Some(StepStatus::Failed));
}

#[test]
fn halting_callback_recovers_at_the_boundary() {
    let mut pipeline = failing_pipeline("argument_error");
    pipeline.on_error(["argument_error"], true, |step, change_set: &String, error| {
        assert_eq!(step.map(|s| s.label()), Some("explode"));
        assert_eq!(error.kind().as_str(), "argument_error");
        format!("rescued {change_set}")
    });

    let result = pipeline.execute("hello".to_string()).unwrap();
    // the handler result becomes the pipeline result; later steps never ran
    assert_eq!(result, "rescued HELLO");
    assert_eq!(pipeline.steps()[2].status(), StepStatus::Pending);
}

#[test]
fn unmatched_errors_propagate_with_context() {
    let mut pipeline = failing_pipeline("io_error");
    pipeline.on_error(["argument_error"], false, |_, change_set: &String, _| {
        change_set.clone()
    });

    let error = pipeline.execute("hello".to_string()).unwrap_err();
    assert_eq!(error.kind().as_str(), "io_error");
    assert_eq!(error.step_error().message(), "boom");

    let context = error.context().unwrap();
    assert_eq!(context.change_set, "HELLO");
    assert_eq!(context.step_label.as_deref(), Some("explode"));
    assert_eq!(context.step_index, Some(1));
}

#[test]
fn first_registered_matching_callback_wins() {
    let hits: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let mut pipeline = failing_pipeline("other_custom_error");
    pipeline.derive_error("other_custom_error", "custom_error");

    let general_hits = Rc::clone(&hits);
    pipeline.on_error(["custom_error"], true, move |_, change_set: &String, _| {
        general_hits.borrow_mut().push("general");
        change_set.clone()
    });
    let specific_hits = Rc::clone(&hits);
    pipeline.on_error(
        ["other_custom_error"],
        true,
        move |_, change_set: &String, _| {
            specific_hits.borrow_mut().push("specific");
            change_set.clone()
        },
    );

    pipeline.execute("hello".to_string()).unwrap();
    assert_eq!(*hits.borrow(), vec!["general"]);
}

#[test]
fn empty_match_set_catches_any_kind() {
    let mut pipeline = failing_pipeline("whatever_error");
    pipeline.on_any_error(true, |_, _, error| format!("caught {}", error.kind()));

    let result = pipeline.execute("hello".to_string()).unwrap();
    assert_eq!(result, "caught whatever_error");
}

#[test]
fn failing_before_execution_hook_is_recovered_without_a_step() {
    let mut pipeline: Pipeline<String> = Pipeline::configure(|p| {
        p.step_fn(|_, word: &String| Ok(Some(word.to_uppercase())))
            .register()?;
        Ok(())
    })
    .unwrap();
    pipeline.before_execution(|_| Err(StepError::new("setup_error", "bad input")));
    pipeline.on_error(["setup_error"], true, |step, change_set: &String, _| {
        assert!(step.is_none());
        format!("fell back with {change_set}")
    });

    let result = pipeline.execute("hello".to_string()).unwrap();
    assert_eq!(result, "fell back with hello");
    // the fold never started
    assert_eq!(pipeline.steps()[0].status(), StepStatus::Pending);
}

#[test]
fn failing_after_step_hook_marks_the_step_failed() {
    let mut pipeline: Pipeline<String> = Pipeline::configure(|p| {
        p.step_fn(|_, word: &String| Ok(Some(word.to_uppercase())))
            .label("upcase")
            .register()?;
        Ok(())
    })
    .unwrap();
    pipeline.after_step(|_| Err(StepError::new("audit_error", "rejected")));

    let error = pipeline.execute("hello".to_string()).unwrap_err();
    assert_eq!(error.kind().as_str(), "audit_error");
    assert_eq!(pipeline.steps()[0].status(), StepStatus::Failed);
    assert_eq!(
        pipeline.steps()[0].error().map(|e| e.kind().as_str()),
        Some("audit_error")
    );
}

#[test]
fn failed_step_retains_error_telemetry() {
    let mut pipeline = failing_pipeline("argument_error");

    let error = pipeline.execute("hello".to_string()).unwrap_err();
    assert_eq!(error.kind().as_str(), "argument_error");

    let step = &pipeline.steps()[1];
    assert_eq!(step.status(), StepStatus::Failed);
    assert_eq!(step.error().map(|e| e.message()), Some("boom"));
    assert!(step.duration().is_some());
}
