//! Adapter running an [`Activity`] as a workflow [`Step`].

use async_trait::async_trait;
use tasuki_core::{
    Activity, ActivityError, ActivityResult, Context, ContextKey, Step, StepName, WorkflowError,
};

/// Reads the activity's input from the context, runs it, and stores the
/// output under another key.
///
/// An absent result stops the chain with [`WorkflowError::Absent`].
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use tasuki::prelude::*;
///
/// struct Shout;
///
/// #[async_trait]
/// impl Activity for Shout {
///     type Input = String;
///     type Output = String;
///
///     fn name(&self) -> &str {
///         "Shout"
///     }
///
///     async fn run(
///         &self,
///         input: String,
///         _cancel: &CancellationSignal,
///     ) -> Result<ActivityResult<String>, ActivityError> {
///         Ok(ActivityResult::Completed(input.to_uppercase()))
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let workflow = Workflow::builder()
///     .add_step("shout", ActivityStage::new(Shout, "text", "loud"))
///     .start_with("shout")
///     .build()
///     .expect("valid workflow");
///
/// let mut ctx = Context::new();
/// ctx.insert("text", "hello".to_string());
/// workflow.execute(&mut ctx).await.expect("workflow succeeds");
/// assert_eq!(ctx.get::<String>("loud").map(String::as_str), Some("HELLO"));
/// # });
/// ```
pub struct ActivityStage<A> {
    activity: A,
    input: ContextKey,
    output: ContextKey,
    next: Option<StepName>,
}

impl<A: Activity> ActivityStage<A> {
    /// Creates a stage that ends the workflow after it completes.
    pub fn new(activity: A, input: impl Into<ContextKey>, output: impl Into<ContextKey>) -> Self {
        Self {
            activity,
            input: input.into(),
            output: output.into(),
            next: None,
        }
    }

    /// Continues with `next` after a completed result.
    pub fn then(mut self, next: impl Into<StepName>) -> Self {
        self.next = Some(next.into());
        self
    }
}

#[async_trait]
impl<A> Step for ActivityStage<A>
where
    A: Activity,
    A::Input: Clone + Sync,
    A::Output: Sync,
{
    async fn execute(&self, ctx: &mut Context) -> Result<Option<StepName>, WorkflowError> {
        let step_name = self.name();
        let input = ctx
            .get::<A::Input>(self.input.as_str())
            .cloned()
            .ok_or_else(|| WorkflowError::MissingInput {
                step_name: step_name.clone(),
                key: self.input.to_string(),
            })?;

        let cancel = ctx.cancellation().clone();
        match self.activity.run(input, &cancel).await {
            Ok(ActivityResult::Completed(value)) => {
                ctx.insert(self.output.clone(), value);
                Ok(self.next.clone())
            }
            Ok(ActivityResult::Absent(reason)) => Err(WorkflowError::Absent { step_name, reason }),
            Err(ActivityError::Cancelled) => Err(WorkflowError::Cancelled { step_name }),
            Err(source) => Err(WorkflowError::Activity { step_name, source }),
        }
    }

    fn name(&self) -> StepName {
        StepName::new(self.activity.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasuki_core::{Absence, CancellationSignal};

    struct Lookup;

    #[async_trait]
    impl Activity for Lookup {
        type Input = String;
        type Output = usize;

        fn name(&self) -> &str {
            "Lookup"
        }

        async fn run(
            &self,
            input: String,
            _cancel: &CancellationSignal,
        ) -> Result<ActivityResult<usize>, ActivityError> {
            if input.is_empty() {
                Ok(ActivityResult::Absent(Absence::NoOutput))
            } else {
                Ok(ActivityResult::Completed(input.len()))
            }
        }
    }

    #[tokio::test]
    async fn test_stage_stores_output_and_continues() {
        let stage = ActivityStage::new(Lookup, "company", "length").then("next");
        let mut ctx = Context::new();
        ctx.insert("company", "acme".to_string());

        let next = stage.execute(&mut ctx).await.expect("execute");
        assert_eq!(next, Some(StepName::new("next")));
        assert_eq!(ctx.get::<usize>("length"), Some(&4));
    }

    #[tokio::test]
    async fn test_stage_absent_stops_chain() {
        let stage = ActivityStage::new(Lookup, "company", "length").then("next");
        let mut ctx = Context::new();
        ctx.insert("company", String::new());

        let err = stage.execute(&mut ctx).await.expect_err("absent");
        assert!(matches!(err, WorkflowError::Absent { reason: Absence::NoOutput, .. }));
        assert!(!ctx.contains_key("length"));
    }

    #[tokio::test]
    async fn test_stage_missing_input() {
        let stage = ActivityStage::new(Lookup, "company", "length");
        let err = stage
            .execute(&mut Context::new())
            .await
            .expect_err("missing input");
        assert!(matches!(err, WorkflowError::MissingInput { ref key, .. } if key == "company"));
    }
}
