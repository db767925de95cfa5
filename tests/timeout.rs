//! The execution timeout schedules a shutdown that cannot be cancelled;
//! a periodic timer fires at exact multiples of its period until then.

use std::sync::{Arc, Mutex};

use cadence::runtime::{App, Config, TimeValue};

#[test]
fn timeout_stops_periodic_timer() {
    let mut app = App::new(
        "timeout",
        Config {
            fast: true,
            timeout: Some(TimeValue::new(1, 0)),
            ..Default::default()
        },
    );
    let top = app.top();
    let t = app
        .add_timer(top, "t", TimeValue::ZERO, TimeValue::new(0, 100_000_000))
        .unwrap();

    let firings: Arc<Mutex<Vec<TimeValue>>> = Arc::new(Mutex::new(Vec::new()));
    let log = firings.clone();
    app.add_reaction(top, "tick", move |ctx| {
        log.lock().unwrap().push(ctx.get_elapsed_logical_time());
        Ok(())
    })
    .with_trigger(t)
    .finish()
    .unwrap();

    app.run().unwrap();

    let firings = firings.lock().unwrap();
    // Immediate staging at (0,0), the first queued event at (0,1), then
    // every 100 ms up to and including the shutdown instant.
    assert_eq!(firings.len(), 12);
    assert_eq!(firings[0], TimeValue::ZERO);
    assert_eq!(firings[1], TimeValue::ZERO);
    for (i, elapsed) in firings[2..].iter().enumerate() {
        assert_eq!(*elapsed, TimeValue::new(0, 100_000_000).checked_mul(i as u64 + 1).unwrap());
    }
    assert_eq!(*firings.last().unwrap(), TimeValue::new(1, 0));
}
