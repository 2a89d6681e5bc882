use std::fmt;
use std::future::Future;

use async_trait::async_trait;

use crate::error::ExecuteError;
use crate::net::Marking;

use super::Context;

/// A transition's side effect. Returns a partial context update that is
/// merged shallowly into the instance context.
#[async_trait]
pub trait Execute: Send + Sync {
    async fn execute(
        &self,
        transition: &str,
        context: &Context,
        marking: &Marking,
    ) -> Result<Context, ExecuteError>;
}

/// Adapts an async closure over an owned context snapshot into an
/// [`Execute`].
pub struct FnExecute<F>(pub F);

impl<F> fmt::Debug for FnExecute<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnExecute")
    }
}

#[async_trait]
impl<F, Fut> Execute for FnExecute<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Context, String>> + Send,
{
    async fn execute(
        &self,
        transition: &str,
        context: &Context,
        _marking: &Marking,
    ) -> Result<Context, ExecuteError> {
        (self.0)(context.clone())
            .await
            .map_err(|message| ExecuteError::new(transition, message))
    }
}

/// Shallow merge: keys in `update` overwrite keys in `context`.
pub fn merge_context(context: &mut Context, update: Context) {
    for (k, v) in update {
        context.insert(k, v);
    }
}
