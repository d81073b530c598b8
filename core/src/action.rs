//! # Action: State Transitions as Values
//!
//! An [`Action`] is the only legal way to change a workflow's state after it
//! has been created. It carries a transition over the state that may emit one
//! output for the parent.
//!
//! ## Design Philosophy
//!
//! * **Values, not calls**: sinks, children and workers all produce actions;
//!   the node decides when to apply them.
//! * **Named**: every action carries a name so diagnostics can say what ran.
//! * **Fallible**: an action may fail, which is fatal to the owning subtree.

use std::borrow::Cow;
use std::fmt;

pub type ApplyFn<S, O> = Box<dyn FnOnce(&mut S) -> anyhow::Result<Option<O>> + Send>;

pub struct Action<S, O> {
    name: Cow<'static, str>,
    apply: ApplyFn<S, O>,
}

impl<S: 'static, O: 'static> Action<S, O> {
    /// An infallible transition that may emit an output.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce(&mut S) -> Option<O> + Send + 'static,
    {
        Self {
            name: name.into(),
            apply: Box::new(move |state| Ok(f(state))),
        }
    }

    pub fn try_new<F>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce(&mut S) -> anyhow::Result<Option<O>> + Send + 'static,
    {
        Self {
            name: name.into(),
            apply: Box::new(f),
        }
    }

    /// Replaces the state wholesale.
    pub fn set_state(state: S) -> Self
    where
        S: Send,
    {
        Self::new("set_state", move |current| {
            *current = state;
            None
        })
    }

    /// Leaves the state untouched and emits `output`.
    pub fn emit(output: O) -> Self
    where
        O: Send,
    {
        Self::new("emit", move |_| Some(output))
    }

    pub fn noop() -> Self {
        Self::new("noop", |_| None)
    }

    /// An action that fails when applied.
    pub fn fail(error: impl Into<anyhow::Error>) -> Self {
        let error = error.into();
        Self::try_new("fail", move |_| Err(error))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply_in_place(self, state: &mut S) -> anyhow::Result<Option<O>> {
        (self.apply)(state)
    }

    /// Consumes the state and returns the advanced state with the optional output.
    pub fn apply(self, mut state: S) -> anyhow::Result<(S, Option<O>)> {
        let output = (self.apply)(&mut state)?;
        Ok((state, output))
    }

    pub fn map_output<O2, F>(self, f: F) -> Action<S, O2>
    where
        O2: 'static,
        F: FnOnce(O) -> O2 + Send + 'static,
    {
        let Action { name, apply } = self;
        Action {
            name,
            apply: Box::new(move |state| Ok(apply(state)?.map(f))),
        }
    }
}

impl<S, O> fmt::Debug for Action<S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_returns_state_and_output() {
        let action: Action<u32, String> = Action::new("increment", |n| {
            *n += 1;
            Some(format!("now {n}"))
        });
        let (state, output) = action.apply(41).unwrap();
        assert_eq!(state, 42);
        assert_eq!(output.as_deref(), Some("now 42"));
    }

    #[test]
    fn test_set_state_and_emit() {
        let mut state = 1u32;
        let out = Action::<u32, ()>::set_state(7)
            .apply_in_place(&mut state)
            .unwrap();
        assert_eq!((state, out), (7, None));

        let out = Action::<u32, &str>::emit("done")
            .apply_in_place(&mut state)
            .unwrap();
        assert_eq!((state, out), (7, Some("done")));
    }

    #[test]
    fn test_fail_reports_error() {
        let action = Action::<u32, ()>::fail(anyhow::anyhow!("worker exploded"));
        assert_eq!(action.name(), "fail");
        let err = action.apply(0).unwrap_err();
        assert_eq!(err.to_string(), "worker exploded");
    }

    #[test]
    fn test_map_output_keeps_name() {
        let action = Action::<u32, u32>::new("double", |n| {
            *n *= 2;
            Some(*n)
        })
        .map_output(|n| n.to_string());
        assert_eq!(action.name(), "double");
        assert_eq!(action.apply(4).unwrap(), (8, Some("8".to_string())));
    }
}
