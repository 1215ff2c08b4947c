//! Drives a step source through its levels.
//!
//! A program is the same body run once per level, framed by lifecycle
//! steps:
//!
//! ```text
//! for each level:
//!     STARTED, body(level)..., FINISHED     (FINISHED cancellation ends the level)
//! COMPLETED                                 (only with more than one level)
//! close
//! ```
//!
//! `Closed` and `Completed` cancellations end the whole program quietly.
//! Anything else is a fault and is returned.

use std::future::Future;

use anyhow::Result;
use tracing::debug;

use crate::error::{Cancelled, Scope, StepError};
use crate::request::{Request, COMPLETED, FINISHED, STARTED};
use crate::worker::StepSource;

/// Run `body` once for each of `times` levels against `source`.
pub async fn run<F, Fut>(source: &StepSource, times: usize, mut body: F) -> Result<()>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let program = async {
        for level in 0..times {
            let outcome = async {
                source.submit(Request::lifecycle(STARTED)).await?;
                body(level).await?;
                source.submit(Request::lifecycle(FINISHED)).await?;
                Ok::<_, anyhow::Error>(())
            }
            .await;

            match outcome {
                Err(e) if cancellation(&e) == Some(Cancelled::Finished) => {
                    debug!(level, "level ended early");
                }
                other => other?,
            }
        }

        if times > 1 {
            source.submit(Request::lifecycle(COMPLETED)).await?;
        }
        source.close()?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    match program {
        Err(e) => match cancellation(&e) {
            Some(cancelled) if cancelled.is_expected_by(Scope::Program) => {
                debug!(%cancelled, "program ended");
                Ok(())
            }
            _ => Err(e),
        },
        ok => ok,
    }
}

/// The cancellation carried by `e`, if any.
pub fn cancellation(e: &anyhow::Error) -> Option<Cancelled> {
    if let Some(cancelled) = e.downcast_ref::<Cancelled>() {
        return Some(*cancelled);
    }
    e.downcast_ref::<StepError>().and_then(StepError::cancelled)
}
