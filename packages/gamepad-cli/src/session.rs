//! One loaded run of a script: the gamepad, the program task feeding it,
//! and the change feeds of every level.

use std::sync::Arc;

use anyhow::Result;
use gamepad::{program, ChangeBatch, Gamepad};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::script::Script;

pub struct Session {
    pub gamepad: Gamepad,
    script: Arc<Script>,
    times: usize,
    feeds: Vec<broadcast::Receiver<ChangeBatch>>,
    program: Option<JoinHandle<()>>,
}

impl Session {
    pub fn start(gamepad: Gamepad, script: Script, times: usize) -> Result<Self> {
        let mut session = Self {
            gamepad,
            script: Arc::new(script),
            times,
            feeds: Vec::new(),
            program: None,
        };
        session.load()?;
        Ok(session)
    }

    /// Reset everything and run the script's program from the top.
    pub fn load(&mut self) -> Result<()> {
        if let Some(program) = self.program.take() {
            program.abort();
        }

        let source = self.gamepad.load(self.times)?;
        let levels = self.gamepad.stores().with(|manager| manager.len());
        self.feeds = (0..levels)
            .filter_map(|index| self.gamepad.subscribe_level(index))
            .collect();

        let script = self.script.clone();
        let times = self.times;
        self.program = Some(tokio::spawn(async move {
            let body_source = source.clone();
            let result = program::run(&source, times, move |level| {
                let source = body_source.clone();
                let steps = script.steps(level).to_vec();
                async move {
                    for step in steps {
                        source.submit(step).await?;
                    }
                    Ok::<_, anyhow::Error>(())
                }
            })
            .await;

            match result {
                Ok(()) => info!("program finished"),
                Err(e) => error!(error = %e, "program failed"),
            }
        }));
        Ok(())
    }

    /// Every change batch published since the last call, with its level.
    pub fn drain_changes(&mut self) -> Vec<(usize, ChangeBatch)> {
        let mut drained = Vec::new();
        for (index, feed) in self.feeds.iter_mut().enumerate() {
            loop {
                match feed.try_recv() {
                    Ok(batch) => drained.push((index, batch)),
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }
        drained
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(program) = self.program.take() {
            program.abort();
        }
    }
}
