//! Maps decoded commands onto the lock table.

use std::sync::Arc;

use locksmith_api::{Command, ProtocolError, Reply};
use locksmith_core::LockTable;
use tracing::{debug, warn};

use crate::metrics::{Timer, record_protocol_error, record_request};

/// Executes protocol requests against a shared [`LockTable`].
#[derive(Clone)]
pub struct RequestHandler {
    table: Arc<LockTable>,
}

impl RequestHandler {
    pub fn new(table: Arc<LockTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<LockTable> {
        &self.table
    }

    /// Parse and execute one frame of request text.
    ///
    /// Anything that does not parse as a command is answered with `FAILURE`.
    pub fn handle_frame(&self, frame: &str) -> Reply {
        match Command::parse(frame) {
            Ok(command) => self.handle(&command),
            Err(e) => self.reject(&e),
        }
    }

    pub fn handle(&self, command: &Command) -> Reply {
        let timer = Timer::new();
        let reply = match command {
            Command::Lock { name, client, mode } => {
                Reply::from(self.table.acquire(name, client, *mode).is_ok())
            }
            Command::Unlock { name, client } => {
                Reply::from(self.table.release(name, client).is_ok())
            }
        };
        record_request(command.keyword(), reply.is_success(), timer.elapsed_secs());

        debug!(
            command = command.keyword(),
            lock = command.name(),
            client = command.client(),
            %reply,
            "Request handled"
        );
        reply
    }

    /// Answer a frame that could not be decoded or parsed.
    pub fn reject(&self, error: &ProtocolError) -> Reply {
        record_protocol_error();
        warn!(error = %error, "Rejecting malformed request");
        Reply::Failure
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use locksmith_core::LockState;

    use super::*;

    fn handler() -> RequestHandler {
        RequestHandler::new(Arc::new(LockTable::new(Duration::from_secs(10))))
    }

    #[tokio::test]
    async fn test_lock_and_unlock() {
        let handler = handler();
        assert_eq!(handler.handle_frame("LOCK r1 c1 WRITE"), Reply::Success);
        assert_eq!(handler.handle_frame("LOCK r1 c2 READ"), Reply::Failure);
        assert_eq!(handler.table().state("r1"), Some(LockState::Write));

        assert_eq!(handler.handle_frame("UNLOCK r1 c2"), Reply::Failure);
        assert_eq!(handler.handle_frame("UNLOCK r1 c1"), Reply::Success);
        assert_eq!(handler.handle_frame("LOCK r1 c2 READ"), Reply::Success);
    }

    #[tokio::test]
    async fn test_malformed_frames_fail() {
        let handler = handler();
        for frame in [
            "",
            "HELLO",
            "LOCK r1",
            "LOCK r1 c1 EXCLUSIVE",
            "unlock r1 c1",
            "UNLOCK r1 c1 now",
        ] {
            assert_eq!(handler.handle_frame(frame), Reply::Failure, "frame {frame:?}");
        }
        assert!(handler.table().is_empty());
    }

    #[tokio::test]
    async fn test_unlock_unknown_lock_fails() {
        let handler = handler();
        assert_eq!(handler.handle_frame("UNLOCK ghost c1"), Reply::Failure);
        assert!(handler.table().is_empty());
    }
}
