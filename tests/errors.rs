//! Error handling: a failing reaction body aborts execution through the
//! failure callback; an error stop completes the current tag first.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use cadence::runtime::{App, Config, ReactionError, RuntimeError, Trigger};

#[test]
fn reaction_failure_aborts() {
    let mut app = App::new(
        "failing",
        Config {
            fast: true,
            ..Default::default()
        },
    );
    let top = app.top();

    app.add_reaction(top, "explode", |_ctx| {
        Err(ReactionError::new("deliberate failure"))
    })
    .with_trigger(Trigger::Startup)
    .finish()
    .unwrap();

    let failed = Arc::new(AtomicBool::new(false));
    let flag = failed.clone();
    app.on_failure(move || flag.store(true, Ordering::SeqCst));
    app.on_success(|| panic!("must not succeed"));

    let result = app.run();
    assert!(matches!(result, Err(RuntimeError::ReactionFailure { .. })));
    assert!(failed.load(Ordering::SeqCst));
}

#[test]
fn error_stop_completes_the_tag() {
    let mut app = App::new(
        "error_stop",
        Config {
            fast: true,
            ..Default::default()
        },
    );
    let top = app.top();

    app.add_reaction(top, "first", |ctx| {
        ctx.request_error_stop("something went wrong");
        Ok(())
    })
    .with_trigger(Trigger::Startup)
    .finish()
    .unwrap();

    // Still runs: the error stop finishes the current tag deterministically.
    let second_ran = Arc::new(AtomicBool::new(false));
    let flag = second_ran.clone();
    app.add_reaction(top, "second", move |_ctx| {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    })
    .with_trigger(Trigger::Startup)
    .finish()
    .unwrap();

    let failed = Arc::new(AtomicBool::new(false));
    let flag = failed.clone();
    app.on_failure(move || flag.store(true, Ordering::SeqCst));

    let result = app.run();
    assert!(matches!(result, Err(RuntimeError::ErrorStop(_))));
    assert!(second_ran.load(Ordering::SeqCst));
    assert!(failed.load(Ordering::SeqCst));
}
