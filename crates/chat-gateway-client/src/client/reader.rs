//! Read loop
//!
//! Pulls frames off the transport, decodes them and feeds the driver. Heartbeat
//! acks are settled here directly, never queued behind dispatches.
//!
//! Frames the driver has not taken yet wait in a bounded read-ahead buffer, so
//! the loop keeps reading acks while the consumer is slow. Once the buffer is
//! full the loop stops reading and flags the heartbeat state as stalled.

use super::driver::Command;
use super::heartbeat::HeartbeatState;
use crate::connection::Connection;
use crate::error::GatewayError;
use crate::protocol::{codec, OpCode};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Decoded frames held back while the driver is busy
pub(crate) const READ_AHEAD: usize = 256;

pub(crate) struct Reader {
    pub generation: u64,
    pub connection: Arc<dyn Connection>,
    pub heartbeat: Arc<HeartbeatState>,
    pub commands: mpsc::Sender<Command>,
    pub cancel: CancellationToken,
}

impl Reader {
    pub(crate) async fn run(self) {
        let generation = self.generation;
        tracing::debug!(generation, "Read loop started");

        let mut pending: VecDeque<Command> = VecDeque::new();
        let mut lost = false;

        loop {
            let stalled = pending.len() >= READ_AHEAD;
            if stalled != self.heartbeat.is_reader_stalled() {
                tracing::debug!(generation, stalled, backlog = pending.len(), "Read-ahead");
            }
            self.heartbeat.set_reader_stalled(stalled);
            if lost && pending.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                permit = self.commands.reserve(), if !pending.is_empty() => {
                    let Ok(permit) = permit else {
                        break;
                    };
                    if let Some(command) = pending.pop_front() {
                        permit.send(command);
                    }
                }

                received = self.connection.receive(), if !stalled && !lost => match received {
                    Ok(frame) => self.accept(&frame, &mut pending),
                    Err(error) => {
                        pending.push_back(Command::TransportLost {
                            generation,
                            error: GatewayError::Read(error),
                        });
                        lost = true;
                    }
                },
            }
        }

        self.heartbeat.set_reader_stalled(false);
        tracing::debug!(generation, "Read loop stopped");
    }

    fn accept(&self, frame: &[u8], pending: &mut VecDeque<Command>) {
        match codec::decode(frame) {
            Ok(envelope) if envelope.op == OpCode::HeartbeatAck => {
                tracing::trace!(generation = self.generation, "Heartbeat ACK");
                self.heartbeat.acknowledge();
            }
            Ok(envelope) => pending.push_back(Command::Inbound {
                generation: self.generation,
                envelope,
            }),
            Err(error) => tracing::warn!(
                generation = self.generation,
                error = %error,
                frame_len = frame.len(),
                "Discarding malformed frame"
            ),
        }
    }
}
