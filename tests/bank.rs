//! A bank of three periodic reactors: fully-qualified names carry the
//! bank index, and each member sees its own index.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use cadence::runtime::{App, Config, TimeValue};

#[test]
fn bank_of_three() {
    let mut app = App::new(
        "app",
        Config {
            fast: true,
            timeout: Some(TimeValue::new(1, 0)),
            ..Default::default()
        },
    );
    let top = app.top();

    let seen: Arc<Mutex<HashSet<usize>>> = Arc::new(Mutex::new(HashSet::new()));
    let seen_in_build = seen.clone();
    let members = app
        .add_bank(top, "b", 3, |env, member, idx| {
            let t = env.add_timer(member, "t", TimeValue::ZERO, TimeValue::new(1, 0))?;
            let seen = seen_in_build.clone();
            env.add_reaction(member, "tick", move |ctx| {
                let bank_index = ctx.get_bank_index().expect("member of a bank");
                assert_eq!(bank_index, idx);
                seen.lock().unwrap().insert(bank_index);
                Ok(())
            })
            .with_trigger(t)
            .finish()?;
            Ok(())
        })
        .unwrap();

    assert_eq!(members.len(), 3);
    assert_eq!(app.fqn(members[0]), "app.b[0]");
    assert_eq!(app.fqn(members[1]), "app.b[1]");
    assert_eq!(app.fqn(members[2]), "app.b[2]");

    app.run().unwrap();
    assert_eq!(*seen.lock().unwrap(), HashSet::from([0, 1, 2]));
}
