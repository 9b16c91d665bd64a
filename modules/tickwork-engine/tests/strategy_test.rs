//! Integration tests for strategy chains.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::json;
use tickwork_engine::{
    responder, Incident, IncidentCode, ManualClock, Outcome, Processor, Responder, StrategyId,
};

// ---------------------------------------------------------------------------
// Test errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
#[error("door is locked")]
struct Locked;

#[derive(Debug, thiserror::Error)]
#[error("battery is flat")]
struct FlatBattery;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Log = Rc<RefCell<Vec<String>>>;

fn setup() -> (Processor, ManualClock, Log) {
    let clock = ManualClock::new(0);
    let processor = Processor::new(clock.clone());
    (processor, clock, Rc::new(RefCell::new(Vec::new())))
}

fn step(log: &Log, label: &str) -> Responder {
    returning(log, label, Outcome::Success)
}

fn returning(log: &Log, label: &str, outcome: Outcome) -> Responder {
    let log = log.clone();
    let label = label.to_string();
    responder(move |_, _| {
        log.borrow_mut().push(label.clone());
        Ok(outcome)
    })
}

fn failing<E, F>(log: &Log, label: &str, make: F) -> Responder
where
    E: std::error::Error + Send + Sync + 'static,
    F: Fn() -> E + 'static,
{
    let log = log.clone();
    let label = label.to_string();
    responder(move |_, _| {
        log.borrow_mut().push(label.clone());
        Err(make().into())
    })
}

/// Handler that records its label with the incident identifier it received.
fn handler(log: &Log, label: &str) -> Responder {
    let log = log.clone();
    let label = label.to_string();
    responder(move |_, incident| {
        let id = incident.identifier().unwrap_or("-");
        log.borrow_mut().push(format!("{label}({id})"));
        Ok(Outcome::Success)
    })
}

fn run(processor: &mut Processor, root: StrategyId) -> Outcome {
    let incident = Incident::new(processor.now());
    processor.invoke_chain(root, &incident)
}

fn fire(processor: &mut Processor, code: IncidentCode) {
    processor.notify(code, &Incident::new(processor.now())).unwrap();
}

fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

// ===========================================================================
// Immediate flow
// ===========================================================================

#[test]
fn immediate_chain_runs_synchronously_in_order() {
    let (mut p, _clock, log) = setup();
    let root = p
        .chain("A", step(&log, "A"))
        .then_immediately("B", step(&log, "B"))
        .then_immediately("C", step(&log, "C"))
        .build();

    assert_eq!(run(&mut p, root), Outcome::Success);
    assert_eq!(entries(&log), vec!["A", "B", "C"]);
    assert!(p.time_keeper().is_empty());
}

#[test]
fn non_success_stops_the_chain() {
    let (mut p, _clock, log) = setup();
    let root = p
        .chain("A", step(&log, "A"))
        .then_immediately("B", returning(&log, "B", Outcome::Failure))
        .then_immediately("C", step(&log, "C"))
        .build();

    assert_eq!(run(&mut p, root), Outcome::Failure);
    assert_eq!(entries(&log), vec!["A", "B"]);
}

#[test]
fn and_then_continues_on_the_next_tick() {
    let (mut p, clock, log) = setup();
    let root = p
        .chain("A", step(&log, "A"))
        .and_then("B", step(&log, "B"))
        .then_immediately("C", step(&log, "C"))
        .build();

    run(&mut p, root);
    assert_eq!(entries(&log), vec!["A"]);

    clock.advance(1);
    p.update();
    assert_eq!(entries(&log), vec!["A", "B", "C"]);
}

#[test]
fn scheduled_chain_runs_when_due() {
    let (mut p, clock, log) = setup();
    let root = p
        .chain("A", step(&log, "A"))
        .then_immediately("B", step(&log, "B"))
        .build();
    p.schedule_at(5, root);

    clock.set(6);
    p.update();
    assert_eq!(entries(&log), vec!["A", "B"]);
}

#[test]
fn chain_registered_on_an_incident_runs_per_fire() {
    let (mut p, _clock, log) = setup();
    let bell = p.code("bell");
    let root = p
        .chain("answer", step(&log, "answer"))
        .then_immediately("greet", step(&log, "greet"))
        .build();
    p.on_incident_strategy(bell, root, 2).unwrap();

    for _ in 0..3 {
        fire(&mut p, bell);
    }
    assert_eq!(entries(&log), vec!["answer", "greet", "answer", "greet"]);
}

#[test]
fn strategy_for_incident_bridges_chains_to_responders() {
    let (mut p, _clock, log) = setup();
    let done = p.code("done");
    p.on_incident(done, step(&log, "heard"), -1, None).unwrap();
    let notifier = p.strategy_for_incident(done);
    let root = p
        .chain("work", step(&log, "work"))
        .then_immediately("announce", responder(move |p, incident| {
            Ok(p.invoke_chain(notifier, incident))
        }))
        .then_immediately("rest", step(&log, "rest"))
        .build();

    run(&mut p, root);
    assert_eq!(entries(&log), vec!["work", "heard", "rest"]);
}

// ===========================================================================
// Exceptions
// ===========================================================================

#[test]
fn catch_then_finally_each_run_once_and_the_chain_stops() {
    let (mut p, _clock, log) = setup();
    let root = p
        .chain("A", failing(&log, "A", || Locked))
        .catch::<Locked>(handler(&log, "handler"))
        .finally(handler(&log, "fin"))
        .then_immediately("D", step(&log, "D"))
        .build();

    assert_eq!(run(&mut p, root), Outcome::Halt);
    assert_eq!(entries(&log), vec!["A", "handler(Locked)", "fin(Locked)"]);
}

#[test]
fn catch_is_skipped_and_finally_runs_in_normal_flow() {
    let (mut p, _clock, log) = setup();
    let root = p
        .chain("A", step(&log, "A"))
        .catch::<Locked>(handler(&log, "handler"))
        .finally(handler(&log, "fin"))
        .then_immediately("D", step(&log, "D"))
        .build();

    assert_eq!(run(&mut p, root), Outcome::Success);
    assert_eq!(entries(&log), vec!["A", "fin(-)", "D"]);
}

#[test]
fn handler_incident_describes_the_failure() {
    let (mut p, _clock, _log) = setup();
    let seen = Rc::new(RefCell::new(None));
    let sink = seen.clone();
    let root = p
        .chain("open door", responder(|_, _| Err(Locked.into())))
        .catch_any(responder(move |_, incident| {
            *sink.borrow_mut() = Some(incident.clone());
            Ok(Outcome::Success)
        }))
        .build();

    let trigger = Incident::new(0).with_identifier("arrival");
    p.invoke_chain(root, &trigger);

    let incident = seen.borrow().clone().unwrap();
    assert_eq!(incident.identifier(), Some("Error"));
    assert_eq!(incident.source, json!("open door: arrival"));
    assert_eq!(incident.detail, json!("door is locked"));
}

#[test]
fn first_matching_catch_in_the_block_handles_the_error() {
    let (mut p, _clock, log) = setup();
    let root = p
        .chain("A", failing(&log, "A", || FlatBattery))
        .catch::<Locked>(handler(&log, "locked"))
        .catch::<FlatBattery>(handler(&log, "battery"))
        .build();

    run(&mut p, root);
    assert_eq!(entries(&log), vec!["A", "battery(FlatBattery)"]);
}

#[test]
fn unmatched_error_still_runs_finally() {
    let (mut p, _clock, log) = setup();
    let root = p
        .chain("A", failing(&log, "A", || FlatBattery))
        .catch::<Locked>(handler(&log, "locked"))
        .finally(handler(&log, "fin"))
        .build();

    run(&mut p, root);
    assert_eq!(entries(&log), vec!["A", "fin(Exception)"]);
}

#[test]
fn finally_before_the_handler_runs_first() {
    let (mut p, _clock, log) = setup();
    let root = p
        .chain("A", failing(&log, "A", || Locked))
        .finally(handler(&log, "fin"))
        .catch_any(handler(&log, "handler"))
        .build();

    run(&mut p, root);
    assert_eq!(entries(&log), vec!["A", "fin(Error)", "handler(Error)"]);
}

#[test]
fn error_in_a_deferred_step_reaches_the_handler() {
    let (mut p, _clock, log) = setup();
    let knock = p.code("knock");
    let root = p
        .chain("arm", step(&log, "arm"))
        .then_on_incident(knock, Some(failing(&log, "answer", || Locked)), 1)
        .catch::<Locked>(handler(&log, "handler"))
        .then_immediately("after", step(&log, "after"))
        .build();

    run(&mut p, root);
    fire(&mut p, knock);
    fire(&mut p, knock);

    assert_eq!(entries(&log), vec!["arm", "answer", "handler(Locked)"]);
    assert_eq!(p.registry().responder_count(knock), 0);
}

// ===========================================================================
// Waiting steps
// ===========================================================================

#[test]
fn on_incident_step_waits_for_count_fires() {
    let (mut p, _clock, log) = setup();
    let knock = p.code("knock");
    let root = p
        .chain("arm", step(&log, "arm"))
        .then_on_incident(knock, Some(step(&log, "knocked")), 2)
        .then_immediately("open", step(&log, "open"))
        .build();

    assert_eq!(run(&mut p, root), Outcome::Halt);
    assert_eq!(entries(&log), vec!["arm"]);

    for _ in 0..3 {
        fire(&mut p, knock);
    }
    assert_eq!(entries(&log), vec!["arm", "knocked", "knocked", "open"]);
}

#[test]
fn while_step_repeats_until_the_procedure_stops_halting() {
    let (mut p, _clock, log) = setup();
    let poll = p.code("poll");
    let left = Rc::new(Cell::new(2));
    let polls = log.clone();
    let root = p
        .chain("start", step(&log, "start"))
        .then_while_incident(
            poll,
            responder(move |_, _| {
                polls.borrow_mut().push("poll".into());
                if left.get() > 0 {
                    left.set(left.get() - 1);
                    Ok(Outcome::Halt)
                } else {
                    Ok(Outcome::Success)
                }
            }),
        )
        .then_immediately("done", step(&log, "done"))
        .build();

    run(&mut p, root);
    for _ in 0..5 {
        fire(&mut p, poll);
    }
    assert_eq!(entries(&log), vec!["start", "poll", "poll", "poll", "done"]);
}

#[test]
fn delay_step_resumes_after_the_delay() {
    let (mut p, clock, log) = setup();
    let root = p
        .chain("start", step(&log, "start"))
        .then_delay("nap", 50, Some(step(&log, "woke")))
        .then_immediately("after", step(&log, "after"))
        .build();

    run(&mut p, root);
    clock.set(50);
    p.update();
    assert_eq!(entries(&log), vec!["start"]);

    clock.set(51);
    p.update();
    assert_eq!(entries(&log), vec!["start", "woke", "after"]);
}

#[test]
fn first_incident_wins_the_race() {
    let (mut p, _clock, log) = setup();
    let left = p.code("left");
    let right = p.code("right");
    let root = p
        .chain("start", step(&log, "start"))
        .then_do_first_incident(
            "door",
            vec![(left, step(&log, "left")), (right, step(&log, "right"))],
        )
        .then_immediately("after", step(&log, "after"))
        .build();

    run(&mut p, root);
    fire(&mut p, right);
    fire(&mut p, left);
    fire(&mut p, right);

    assert_eq!(entries(&log), vec!["start", "right", "after"]);
    assert_eq!(p.registry().responder_count(left), 0);
    assert_eq!(p.registry().responder_count(right), 0);
}

#[test]
fn clear_all_events_cancels_pending_continuations() {
    let (mut p, clock, log) = setup();
    let knock = p.code("knock");
    let waiting = p
        .chain("arm", step(&log, "arm"))
        .then_on_incident(knock, Some(step(&log, "knocked")), 1)
        .then_immediately("open", step(&log, "open"))
        .build();
    let sleeping = p
        .chain("start", step(&log, "start"))
        .then_delay("nap", 10, Some(step(&log, "woke")))
        .build();

    run(&mut p, waiting);
    run(&mut p, sleeping);
    assert_eq!(p.clear_all_events(waiting), 1);
    assert_eq!(p.clear_all_events(sleeping), 1);

    fire(&mut p, knock);
    clock.set(20);
    p.update();

    assert_eq!(entries(&log), vec!["arm", "start"]);
    assert!(p.time_keeper().is_empty());
}

// ===========================================================================
// Merit
// ===========================================================================

#[test]
fn merit_gated_step_is_skipped_without_positive_merit() {
    let (mut p, _clock, log) = setup();
    let root = p
        .chain("A", step(&log, "A"))
        .then_immediately("gated", step(&log, "gated"))
        .with_merit(|| 0.0)
        .only_on_positive_merit()
        .then_immediately("scored", step(&log, "scored"))
        .with_merit(|| 2.5)
        .only_on_positive_merit()
        .build();

    assert_eq!(run(&mut p, root), Outcome::Success);
    assert_eq!(entries(&log), vec!["A", "scored"]);
}

#[test]
fn decide_best_choice_runs_the_winner_then_continues() {
    let (mut p, _clock, log) = setup();
    let walk = p.chain("walk", step(&log, "walk")).with_merit(|| 1.0).build();
    let drive = p
        .chain("drive", step(&log, "drive"))
        .with_merit(|| 5.0)
        .then_immediately("park", step(&log, "park"))
        .build();
    let root = p
        .chain("leave", step(&log, "leave"))
        .then_decide_best_choice("travel", &[walk, drive])
        .then_immediately("arrive", step(&log, "arrive"))
        .build();

    run(&mut p, root);
    assert_eq!(entries(&log), vec!["leave", "drive", "park", "arrive"]);
}

#[test]
fn decide_best_choice_fails_without_positive_merit() {
    let (mut p, _clock, log) = setup();
    let stay = p.chain("stay", step(&log, "stay")).with_merit(|| 0.0).build();
    let root = p
        .chain("leave", step(&log, "leave"))
        .then_decide_best_choice("travel", &[stay])
        .then_immediately("arrive", step(&log, "arrive"))
        .build();

    assert_eq!(run(&mut p, root), Outcome::Failure);
    assert_eq!(entries(&log), vec!["leave"]);
}

#[test]
fn decide_first_choice_takes_the_first_positive_candidate() {
    let (mut p, _clock, log) = setup();
    let off = p.chain("off", step(&log, "off")).with_merit(|| -1.0).build();
    let cheap = p.chain("cheap", step(&log, "cheap")).with_merit(|| 1.0).build();
    let best = p.chain("best", step(&log, "best")).with_merit(|| 9.0).build();
    let root = p
        .chain("start", step(&log, "start"))
        .then_decide_first_choice("pick", &[off, cheap, best])
        .then_immediately("end", step(&log, "end"))
        .build();

    run(&mut p, root);
    assert_eq!(entries(&log), vec!["start", "cheap", "end"]);
}

// ===========================================================================
// Re-running chains
// ===========================================================================

#[test]
fn decide_best_choice_chain_runs_again() {
    let (mut p, _clock, log) = setup();
    let walk = p.chain("walk", step(&log, "walk")).with_merit(|| 1.0).build();
    let root = p
        .chain("leave", step(&log, "leave"))
        .then_decide_best_choice("travel", &[walk])
        .then_immediately("arrive", step(&log, "arrive"))
        .build();

    run(&mut p, root);
    run(&mut p, root);
    assert_eq!(
        entries(&log),
        vec!["leave", "walk", "arrive", "leave", "walk", "arrive"]
    );
    assert_eq!(p.list_strategies(walk).len(), 2);
}

#[test]
fn decide_first_choice_chain_runs_again() {
    let (mut p, _clock, log) = setup();
    let off = p.chain("off", step(&log, "off")).with_merit(|| 0.0).build();
    let drive = p
        .chain("drive", step(&log, "drive"))
        .then_immediately("park", step(&log, "park"))
        .build();
    let root = p
        .chain("start", step(&log, "start"))
        .then_decide_first_choice("pick", &[off, drive])
        .then_immediately("end", step(&log, "end"))
        .build();

    for _ in 0..3 {
        run(&mut p, root);
    }
    assert_eq!(
        entries(&log),
        ["start", "drive", "park", "end"].repeat(3)
    );
}

#[test]
fn decision_chain_registered_on_an_incident_runs_on_every_fire() {
    let (mut p, _clock, log) = setup();
    let bell = p.code("bell");
    let walk = p.chain("walk", step(&log, "walk")).with_merit(|| 1.0).build();
    let root = p
        .chain("leave", step(&log, "leave"))
        .then_decide_best_choice("travel", &[walk])
        .then_immediately("arrive", step(&log, "arrive"))
        .build();
    p.on_incident_strategy(bell, root, -1).unwrap();

    fire(&mut p, bell);
    fire(&mut p, bell);
    assert_eq!(
        entries(&log),
        vec!["leave", "walk", "arrive", "leave", "walk", "arrive"]
    );
}

#[test]
fn candidate_shared_by_two_chains_continues_each_one() {
    let (mut p, _clock, log) = setup();
    let walk = p.chain("walk", step(&log, "walk")).with_merit(|| 1.0).build();
    let home = p
        .chain("home", step(&log, "home"))
        .then_decide_best_choice("out", &[walk])
        .then_immediately("shop", step(&log, "shop"))
        .build();
    let work = p
        .chain("work", step(&log, "work"))
        .then_decide_best_choice("back", &[walk])
        .then_immediately("sofa", step(&log, "sofa"))
        .build();

    run(&mut p, home);
    run(&mut p, work);
    run(&mut p, home);
    assert_eq!(
        entries(&log),
        vec![
            "home", "walk", "shop", "work", "walk", "sofa", "home", "walk", "shop"
        ]
    );
}

#[test]
fn first_incident_race_runs_again() {
    let (mut p, _clock, log) = setup();
    let left = p.code("left");
    let right = p.code("right");
    let root = p
        .chain("start", step(&log, "start"))
        .then_do_first_incident(
            "door",
            vec![(left, step(&log, "left")), (right, step(&log, "right"))],
        )
        .then_immediately("after", step(&log, "after"))
        .build();

    run(&mut p, root);
    fire(&mut p, left);
    run(&mut p, root);
    fire(&mut p, right);
    fire(&mut p, left);

    assert_eq!(
        entries(&log),
        vec!["start", "left", "after", "start", "right", "after"]
    );
    assert_eq!(p.registry().responder_count(left), 0);
    assert_eq!(p.registry().responder_count(right), 0);
}
