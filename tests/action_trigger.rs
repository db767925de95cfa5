//! A zero-offset timer fires two reactions in declaration order; the
//! second schedules a logical action, read one microstep later by a
//! third reaction that also observes an unscheduled action as absent.

use std::sync::{Arc, Mutex};

use cadence::runtime::{App, Config, TimeValue};

#[test]
fn action_trigger() {
    let mut app = App::new(
        "action_trigger",
        Config {
            fast: true,
            ..Default::default()
        },
    );
    let top = app.top();
    let t = app
        .add_timer(top, "t", TimeValue::ZERO, TimeValue::ZERO)
        .unwrap();
    let a1 = app.add_action::<String>(top, "a1", TimeValue::ZERO).unwrap();
    let a2 = app.add_action::<String>(top, "a2", TimeValue::ZERO).unwrap();

    let order: Arc<Mutex<Vec<(&'static str, u32)>>> = Arc::new(Mutex::new(Vec::new()));

    let log = order.clone();
    app.add_reaction(top, "r1", move |ctx| {
        log.lock().unwrap().push(("r1", ctx.get_microstep()));
        Ok(())
    })
    .with_trigger(t)
    .finish()
    .unwrap();

    let log = order.clone();
    app.add_reaction(top, "r2", move |ctx| {
        log.lock().unwrap().push(("r2", ctx.get_microstep()));
        if ctx.get_microstep() == 0 {
            ctx.schedule(a1, TimeValue::ZERO, Some("hello".to_owned()))?;
        }
        Ok(())
    })
    .with_trigger(t)
    .with_sched(a1)
    .finish()
    .unwrap();

    let log = order.clone();
    app.add_reaction(top, "r3", move |ctx| {
        log.lock().unwrap().push(("r3", ctx.get_microstep()));
        assert_eq!(ctx.get_action(a1)?, Some("hello".to_owned()));
        assert!(!ctx.is_action_present(a2));
        ctx.request_stop();
        Ok(())
    })
    .with_trigger(a1)
    .finish()
    .unwrap();

    app.run().unwrap();

    let order = order.lock().unwrap();
    // The timer's reactions run immediately at microstep 0; its first
    // queued event lands one microstep later, together with the action.
    assert_eq!(order[..2], [("r1", 0), ("r2", 0)]);
    assert_eq!(
        order[2..],
        [("r1", 1), ("r2", 1), ("r3", 1)],
        "reactions at a tag must run in declaration order"
    );
}
