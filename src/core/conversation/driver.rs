//! Session drivers
//!
//! Interactive and batch operation share one turn loop; the drivers only
//! differ in how many turns they run and whether an operator is prompted
//! first. Every turn gets fresh collaborators from a [`TurnFactory`] so no
//! state leaks between turns.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use super::turn::{ConversationLoop, Turn};
use crate::errors::{ClientError, ClientResult};

/// Builds the fresh source, sink and stream one turn owns.
#[async_trait]
pub trait TurnFactory: Send {
    async fn make_turn(&mut self) -> ClientResult<Turn>;
}

/// A session strategy over the shared turn loop.
#[async_trait]
pub trait Driver: Send {
    async fn run(&mut self) -> ClientResult<()>;
}

/// Blocks until the operator is ready for the next turn.
#[async_trait]
pub trait OperatorPrompt: Send {
    /// `Ok(false)` when the operator ended the session (EOF).
    async fn wait_for_turn(&mut self) -> ClientResult<bool>;
}

/// Prompts on stdout and waits for a line on stdin.
pub struct StdinPrompt;

#[async_trait]
impl OperatorPrompt for StdinPrompt {
    async fn wait_for_turn(&mut self) -> ClientResult<bool> {
        println!("Press Enter to record a new query");
        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| ClientError::Internal(format!("stdin read failed: {e}")))?;
        Ok(read > 0)
    }
}

/// Repeats turns until the operator stops or a turn fails.
///
/// A failed turn ends the whole session; repeated failures are never masked
/// behind a fresh prompt.
pub struct InteractiveDriver<F> {
    factory: F,
    prompt: Box<dyn OperatorPrompt>,
    turn_loop: ConversationLoop,
}

impl<F: TurnFactory> InteractiveDriver<F> {
    pub fn new(factory: F, prompt: Box<dyn OperatorPrompt>, turn_loop: ConversationLoop) -> Self {
        Self {
            factory,
            prompt,
            turn_loop,
        }
    }
}

#[async_trait]
impl<F: TurnFactory> Driver for InteractiveDriver<F> {
    async fn run(&mut self) -> ClientResult<()> {
        loop {
            if !self.prompt.wait_for_turn().await? {
                info!("operator ended the session");
                return Ok(());
            }
            let turn = self.factory.make_turn().await?;
            if let Err(e) = self.turn_loop.run_turn(turn).await {
                warn!(error = %e, "turn failed, ending session");
                return Err(e);
            }
        }
    }
}

/// Runs exactly one turn, no prompt.
pub struct BatchDriver<F> {
    factory: F,
    turn_loop: ConversationLoop,
}

impl<F: TurnFactory> BatchDriver<F> {
    pub fn new(factory: F, turn_loop: ConversationLoop) -> Self {
        Self { factory, turn_loop }
    }
}

#[async_trait]
impl<F: TurnFactory> Driver for BatchDriver<F> {
    async fn run(&mut self) -> ClientResult<()> {
        let turn = self.factory.make_turn().await?;
        self.turn_loop.run_turn(turn).await?;
        Ok(())
    }
}
