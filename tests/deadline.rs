//! Deadline handling at dispatch: a reaction dispatched past its
//! deadline runs its late handler instead of its body.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use cadence::runtime::{App, Config, TimeValue, Trigger};

#[test]
fn missed_deadline_runs_late_handler() {
    let mut app = App::new(
        "deadline",
        Config {
            fast: true,
            ..Default::default()
        },
    );
    let top = app.top();

    // Delays dispatch of everything behind it past the 1 ms deadline.
    app.add_reaction(top, "stall", |_ctx| {
        std::thread::sleep(std::time::Duration::from_millis(20));
        Ok(())
    })
    .with_trigger(Trigger::Startup)
    .finish()
    .unwrap();

    let body_ran = Arc::new(AtomicBool::new(false));
    let late_ran = Arc::new(AtomicBool::new(false));

    let body = body_ran.clone();
    let late = late_ran.clone();
    app.add_reaction(top, "tight", move |_ctx| {
        body.store(true, Ordering::SeqCst);
        Ok(())
    })
    .with_trigger(Trigger::Startup)
    .with_deadline(TimeValue::new(0, 1_000_000))
    .with_late_handler(move |_ctx| {
        late.store(true, Ordering::SeqCst);
        Ok(())
    })
    .finish()
    .unwrap();

    let relaxed_ran = Arc::new(AtomicBool::new(false));
    let relaxed = relaxed_ran.clone();
    app.add_reaction(top, "relaxed", move |_ctx| {
        relaxed.store(true, Ordering::SeqCst);
        Ok(())
    })
    .with_trigger(Trigger::Startup)
    .with_deadline(TimeValue::new(3_600, 0))
    .with_late_handler(|_ctx| panic!("an hour has not passed"))
    .finish()
    .unwrap();

    app.run().unwrap();

    assert!(!body_ran.load(Ordering::SeqCst));
    assert!(late_ran.load(Ordering::SeqCst));
    assert!(relaxed_ran.load(Ordering::SeqCst));
}
