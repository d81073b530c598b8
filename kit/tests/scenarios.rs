use dendrite::prelude::*;
use dendrite_test::{DiagnosticEvent, ScriptedWorker, WorkflowTester};
use std::time::Duration;

const QUIET: Duration = Duration::from_millis(100);

/// Renders its state; a worker feeds new values.
#[derive(Clone)]
struct Counting {
    ticks: ScriptedWorker<u32>,
}

impl Workflow for Counting {
    type Props = ();
    type State = u32;
    type Output = ();
    type Rendering = String;

    fn initial_state(&self, _props: &(), snapshot: Option<&Snapshot>) -> anyhow::Result<u32> {
        match snapshot {
            Some(snapshot) => Ok(snapshot.reader().read_u32()?),
            None => Ok(0),
        }
    }

    fn render(&self, _props: &(), state: &u32, ctx: &mut RenderContext<'_, u32, ()>) -> anyhow::Result<String> {
        ctx.declare_work(self.ticks.clone(), "counter", |n: u32| Action::set_state(n))?;
        Ok(state.to_string())
    }

    fn snapshot_state(&self, state: &u32) -> anyhow::Result<Snapshot> {
        Ok(Snapshot::of_u32(*state))
    }
}

#[tokio::test]
async fn test_counting_worker_renders_each_emission_then_goes_quiet() {
    let (ticks, mut script) = ScriptedWorker::new();
    let mut tester = WorkflowTester::start(Counting { ticks: ticks.clone() }, ());

    assert_eq!(tester.next_rendering().await.unwrap(), "0");
    for n in 1..=3 {
        assert!(script.emit(n));
        assert_eq!(tester.next_rendering().await.unwrap(), n.to_string());
    }
    script.finish();

    tester.assert_no_rendering(QUIET).await.unwrap();
    tester.assert_no_output(QUIET).await.unwrap();
    assert_eq!(ticks.probe().starts(), 1);
    tester.cancel().await.unwrap();
}

#[derive(Clone)]
struct Alpha;

impl Workflow for Alpha {
    type Props = ();
    type State = ();
    type Output = ();
    type Rendering = String;

    fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        Ok(())
    }

    fn render(&self, _props: &(), _state: &(), _ctx: &mut RenderContext<'_, (), ()>) -> anyhow::Result<String> {
        Ok("alpha".into())
    }
}

#[derive(Clone)]
struct Beta;

impl Workflow for Beta {
    type Props = ();
    type State = ();
    type Output = ();
    type Rendering = String;

    fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        Ok(())
    }

    fn render(&self, _props: &(), _state: &(), _ctx: &mut RenderContext<'_, (), ()>) -> anyhow::Result<String> {
        Ok("beta".into())
    }
}

/// Declares `Alpha` or `Beta` under the same key.
#[derive(Clone)]
struct Switcher;

impl StatelessWorkflow for Switcher {
    type Props = bool;
    type Output = ();
    type Rendering = String;

    fn render(&self, use_beta: &bool, ctx: &mut RenderContext<'_, (), ()>) -> anyhow::Result<String> {
        let rendering = if *use_beta {
            ctx.declare_child(&Beta, (), "x", |()| Action::noop())?
        } else {
            ctx.declare_child(&Alpha, (), "x", |()| Action::noop())?
        };
        Ok(rendering)
    }
}

fn started_ids(events: &[DiagnosticEvent], workflow: &str) -> Vec<u64> {
    events
        .iter()
        .filter_map(|event| match event {
            DiagnosticEvent::WorkflowStarted {
                workflow_id,
                workflow_type,
                ..
            } if workflow_type == workflow => Some(*workflow_id),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_same_key_with_different_type_is_a_new_child() {
    let mut tester = WorkflowTester::start(Stateless(Switcher), false);
    assert_eq!(tester.next_rendering().await.unwrap(), "alpha");

    tester.send_props(true);
    assert_eq!(tester.next_rendering().await.unwrap(), "beta");

    let events = tester.events();
    let alpha = started_ids(&events, "Alpha");
    let beta = started_ids(&events, "Beta");
    assert_eq!(alpha.len(), 1);
    assert_eq!(beta.len(), 1);
    assert!(events.contains(&DiagnosticEvent::WorkflowStopped { workflow_id: alpha[0] }));
    assert!(!events.contains(&DiagnosticEvent::WorkflowStopped { workflow_id: beta[0] }));

    // Same type again: Beta is reused, nothing new starts.
    tester.send_props(true);
    assert_eq!(tester.next_rendering().await.unwrap(), "beta");
    assert_eq!(started_ids(&tester.events(), "Beta").len(), 1);
    tester.cancel().await.unwrap();
}

#[derive(Clone)]
struct Buttons {
    presses: u32,
    first: Sink<u32, ()>,
    second: Sink<u32, ()>,
}

/// Hands out two sinks per render pass.
#[derive(Clone)]
struct Doorbell;

impl Workflow for Doorbell {
    type Props = ();
    type State = u32;
    type Output = ();
    type Rendering = Buttons;

    fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) -> anyhow::Result<u32> {
        Ok(0)
    }

    fn render(&self, _props: &(), state: &u32, ctx: &mut RenderContext<'_, u32, ()>) -> anyhow::Result<Buttons> {
        Ok(Buttons {
            presses: *state,
            first: ctx.make_action_sink(),
            second: ctx.make_action_sink(),
        })
    }
}

fn press() -> Action<u32, ()> {
    Action::new("press", |presses: &mut u32| {
        *presses += 1;
        None
    })
}

#[tokio::test]
async fn test_two_sinks_from_one_pass_accept_only_the_first_action() {
    let mut tester = WorkflowTester::start(Doorbell, ());
    let buttons = tester.next_rendering().await.unwrap();
    assert_eq!(buttons.presses, 0);

    assert_eq!(buttons.first.send(press()), Ok(()));
    let rejected = buttons.second.send(Action::set_state(100));
    assert!(matches!(rejected, Err(SinkError::AlreadyAccepted { .. })));

    let after = tester.next_rendering().await.unwrap();
    assert_eq!(after.presses, 1);
    tester.assert_no_rendering(QUIET).await.unwrap();

    // Sinks from the old pass are stale; the new pass accepts one action again.
    assert!(matches!(buttons.first.send(press()), Err(SinkError::Stale { .. })));
    after.second.send(press()).unwrap();
    assert_eq!(tester.next_rendering().await.unwrap().presses, 2);
    tester.cancel().await.unwrap();
}

#[tokio::test]
async fn test_at_most_one_action_per_pass_under_contention() {
    let mut tester = WorkflowTester::start(Doorbell, ());
    let buttons = tester.next_rendering().await.unwrap();

    let senders: Vec<_> = (0..8)
        .map(|i| {
            let sink = if i % 2 == 0 {
                buttons.first.clone()
            } else {
                buttons.second.clone()
            };
            std::thread::spawn(move || sink.send(press()).is_ok())
        })
        .collect();
    let accepted = senders
        .into_iter()
        .map(|sender| sender.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(accepted, 1);
    assert_eq!(tester.next_rendering().await.unwrap().presses, 1);
    tester.assert_no_rendering(QUIET).await.unwrap();
    tester.cancel().await.unwrap();
}

#[tokio::test]
async fn test_diagnostics_follow_the_loop() {
    let (ticks, script) = ScriptedWorker::new();
    let config = RuntimeConfig::from_toml_str("output_buffer = 2\ndiagnostics = \"tracing\"").unwrap();
    let mut tester = WorkflowTester::start_with(Counting { ticks }, (), config, None);
    tester.next_rendering().await.unwrap();
    script.emit(1);
    tester.next_rendering().await.unwrap();

    let events = tester.events();
    let position = |wanted: &DiagnosticEvent| events.iter().position(|e| e == wanted).unwrap();
    assert!(matches!(events[0], DiagnosticEvent::RuntimeStarted { .. }));
    assert!(matches!(
        events[1],
        DiagnosticEvent::WorkflowStarted { parent_id: None, .. }
    ));
    assert!(position(&DiagnosticEvent::BeforeRenderPass) < position(&DiagnosticEvent::AfterRenderPass));
    assert!(position(&DiagnosticEvent::AfterRenderPass) < position(&DiagnosticEvent::BeforeSnapshotPass));
    assert_eq!(
        tester.recorder().count(|e| matches!(e, DiagnosticEvent::WorkerStarted { .. })),
        1
    );
    assert_eq!(
        tester.recorder().count(|e| matches!(e, DiagnosticEvent::ActionApplied { emitted_output: false, .. })),
        1
    );

    tester.cancel().await.unwrap();
}
