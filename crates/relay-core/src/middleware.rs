use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::AssistantError;
use crate::thread::{AskOptions, Thread};

/// Whether the pipeline should go on to the next step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// State threaded through every middleware step of one ask
pub struct MiddlewareContext<'a> {
    pub chat_id: String,
    pub prompt: String,
    pub options: AskOptions,
    /// Set by a step to answer without calling the backend, or by the thread
    pub response: Option<String>,
    pub thread: &'a mut Thread,
    /// Failure of the thread, visible to `after` hooks
    pub error: Option<String>,
}

/// A step wrapped around the thread's ask
///
/// `before` hooks run in registration order. Returning [`Flow::Stop`] skips
/// the remaining steps; the thread then runs only if no step left a
/// `response`. `after` hooks run in reverse order for every step whose
/// `before` returned [`Flow::Continue`].
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn before(&self, _ctx: &mut MiddlewareContext<'_>) -> Result<Flow> {
        Ok(Flow::Continue)
    }

    async fn after(&self, _ctx: &mut MiddlewareContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Steps entered by `Pipeline::run_before`
#[derive(Debug, Clone, Copy)]
pub struct Entered {
    continued: usize,
    pub stopped: bool,
}

#[derive(Default, Clone)]
pub struct Pipeline {
    steps: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.steps.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn run_before(
        &self,
        ctx: &mut MiddlewareContext<'_>,
    ) -> Result<Entered, AssistantError> {
        let mut continued = 0;
        for step in &self.steps {
            let flow = step.before(ctx).await.map_err(|e| middleware_error(step.as_ref(), e))?;
            if flow == Flow::Stop {
                tracing::debug!(chat_id = %ctx.chat_id, middleware = step.name(), "Middleware stopped the chain");
                return Ok(Entered {
                    continued,
                    stopped: true,
                });
            }
            continued += 1;
        }
        Ok(Entered {
            continued,
            stopped: false,
        })
    }

    pub async fn run_after(
        &self,
        ctx: &mut MiddlewareContext<'_>,
        entered: Entered,
    ) -> Result<(), AssistantError> {
        for step in self.steps[..entered.continued].iter().rev() {
            step.after(ctx).await.map_err(|e| middleware_error(step.as_ref(), e))?;
        }
        Ok(())
    }
}

fn middleware_error(step: &dyn Middleware, err: anyhow::Error) -> AssistantError {
    AssistantError::Middleware {
        name: step.name().to_string(),
        message: err.to_string(),
    }
}
