//! Multiports: fixed-width arrays of ports with member-wise connections
//! and present-if-any semantics.

use std::sync::{Arc, Mutex};

use cadence::runtime::{App, Config, Trigger};

#[test]
fn multiport_partial_presence() {
    let mut app = App::new(
        "multiport",
        Config {
            fast: true,
            ..Default::default()
        },
    );
    let top = app.top();
    let producer = app.add_reactor(top, "producer").unwrap();
    let consumer = app.add_reactor(top, "consumer").unwrap();

    let outs = app.add_multiport_output::<u32>(producer, "outs", 3).unwrap();
    let ins = app.add_multiport_input::<u32>(consumer, "ins", 3).unwrap();

    let out_ports = app.multiport(outs).unwrap().ports().to_vec();
    let in_ports = app.multiport(ins).unwrap().ports().to_vec();
    for (&src, &dst) in out_ports.iter().zip(&in_ports) {
        app.connect(src, dst).unwrap();
    }

    app.add_reaction(producer, "emit", move |ctx| {
        // Members 0 and 2 only; member 1 stays absent this tag.
        ctx.set_at(outs, 0, 10u32)?;
        ctx.set_at(outs, 2, 30u32)?;
        Ok(())
    })
    .with_trigger(Trigger::Startup)
    .with_write_multi(outs)
    .finish()
    .unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let observed = received.clone();
    app.add_reaction(consumer, "collect", move |ctx| {
        assert!(ctx.any_present(ins));
        for idx in 0..ctx.width(ins)? {
            observed.lock().unwrap().push(ctx.get_at::<u32>(ins, idx)?);
        }
        Ok(())
    })
    .with_trigger(ins)
    .with_read_multi(ins)
    .finish()
    .unwrap();

    app.run().unwrap();
    assert_eq!(*received.lock().unwrap(), vec![Some(10), None, Some(30)]);
}
