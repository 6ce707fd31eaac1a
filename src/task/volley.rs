//! The volley engine: the leader's measurement loop, the follower's handlers
//! and the STOP/teardown path.

use crate::node::{Listens, NetNode, Outbox};
use crate::protocol::{CallResponse, DeliveryFlags, Envelope, Message, Route, VolleyRecord};
use crate::task::bootstrap::NetworkLatency;
use crate::task::config::Role;
use crate::task::constants::{FOLLOWER_ID, LEADER_ID};
use crate::task::error::{Result, TaskError};
use crate::task::handoff::Handoff;
use crate::task::sink::RecordSink;
use chrono::Utc;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Dispatch table for both roles
pub struct VolleyListens {
    role: Role,
    handoff: Arc<Handoff>,
}

impl VolleyListens {
    pub fn new(role: Role, handoff: Arc<Handoff>) -> Self {
        Self { role, handoff }
    }

    /// The follower is signaling to the leader that it's ready
    fn l_ready(&self) {
        debug!(role = %self.role, "READY received");
        self.handoff.ready.set();
    }

    /// Also releases a leader still parked on `ready`
    fn l_stop(&self) {
        info!(role = %self.role, "STOP received");
        self.handoff.quitting.set();
        self.handoff.ready.set();
    }

    /// Answer a CALL with the time it arrived
    fn l_call(&self, message_number: u64, outbox: &dyn Outbox) {
        let recv_time = Utc::now();
        let response = Message::Response(CallResponse {
            message_number,
            recv_time,
        });
        if let Err(e) = outbox.send(Route::to(LEADER_ID), response, DeliveryFlags::NO_REPEAT) {
            warn!(message_number = message_number, error = %e, "Failed to send RESPONSE");
        }
    }

    fn l_response(&self, response: &CallResponse) {
        self.handoff.responses.put(response.clone());
    }
}

impl Listens for VolleyListens {
    fn on_message(&self, envelope: &Envelope, outbox: &dyn Outbox) {
        match &envelope.message {
            Message::Ready => self.l_ready(),
            Message::Stop => self.l_stop(),
            Message::Call { message_number } => self.l_call(*message_number, outbox),
            Message::Response(response) => self.l_response(response),
            Message::Init { .. } | Message::Start(_) | Message::Data(_) => {
                debug!(
                    key = %envelope.message.key(),
                    sender = %envelope.sender,
                    "Ignoring message not addressed to the task"
                );
            }
        }
    }
}

/// What one run of the stage did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolleyOutcome {
    /// Records emitted
    pub completed: u64,
    /// Responses whose message number did not match the outstanding CALL
    pub mismatches: u64,
    /// The loop ended before `n_messages` because `quitting` was set
    pub truncated: bool,
}

impl<N: NetNode + 'static> NetworkLatency<N> {
    /// Run the task's single stage.
    ///
    /// A follower parks until `quitting` is set and returns an empty outcome.
    /// A leader waits for `ready`, runs the volleys into `sink`, then sends
    /// exactly one `STOP` to the follower whether the loop finished, was
    /// truncated, or failed.
    pub fn volley<S>(&self, sink: &mut S) -> Result<VolleyOutcome>
    where
        S: RecordSink + ?Sized,
    {
        if self.identity.role == Role::Follower {
            // all of the follower's work happens in handlers
            self.handoff.quitting.wait();
            info!("Follower stage finished");
            return Ok(VolleyOutcome::default());
        }

        let result = if self.handoff.ready.wait_for(self.params.ready_timeout) {
            self.run_volleys(sink)
        } else {
            Err(TaskError::Liveness(format!(
                "follower did not report READY within {:?}",
                self.params.ready_timeout
            )))
        };

        self.handoff.quitting.set();
        self.send_stop();

        match &result {
            Ok(outcome) => info!(
                completed = outcome.completed,
                mismatches = outcome.mismatches,
                truncated = outcome.truncated,
                "Volleys finished"
            ),
            Err(e) => warn!(error = %e, "Volleys aborted"),
        }
        result
    }

    fn run_volleys<S>(&self, sink: &mut S) -> Result<VolleyOutcome>
    where
        S: RecordSink + ?Sized,
    {
        let n_messages = self.params.n_messages;
        let mut outcome = VolleyOutcome::default();

        for trial_num in 0..n_messages {
            if self.handoff.quitting.is_set() {
                outcome.truncated = true;
                break;
            }

            let send_time = Utc::now();
            self.node.send(
                Route::to(FOLLOWER_ID),
                Message::Call {
                    message_number: trial_num,
                },
                DeliveryFlags::NO_REPEAT,
            )?;

            let response = self
                .handoff
                .responses
                .take(self.params.response_timeout)
                .ok_or_else(|| {
                    TaskError::Liveness(format!(
                        "no RESPONSE to CALL {} within {:?}",
                        trial_num, self.params.response_timeout
                    ))
                })?;

            if response.message_number != trial_num {
                warn!(
                    expected = trial_num,
                    received = response.message_number,
                    "Received response out of order"
                );
                outcome.mismatches += 1;
            }

            let record = VolleyRecord::new(
                trial_num,
                send_time,
                response.recv_time,
                &self.ambient.subject,
                &self.ambient.name,
            );
            debug!(trial_num = trial_num, latency_ms = record.latency_ms, "Volley completed");
            sink.emit(record)?;
            outcome.completed += 1;

            if self.handoff.quitting.is_set() {
                outcome.truncated = trial_num + 1 < n_messages;
                break;
            }
            if !self.params.iti.is_zero() {
                thread::sleep(self.params.iti);
            }
        }

        Ok(outcome)
    }

    fn send_stop(&self) {
        match self
            .node
            .send(Route::to(FOLLOWER_ID), Message::Stop, DeliveryFlags::NONE)
        {
            Ok(()) => debug!("STOP sent to follower"),
            Err(e) => warn!(error = %e, "Failed to send STOP to follower"),
        }
    }

    /// Tear the task down and release the node
    pub fn end(self) {
        if self.identity.role == Role::Leader {
            self.handoff.quitting.set();
            self.handoff.ready.set();
        }
        self.node.release();
        info!(role = %self.identity.role, "Task ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{MockOutbox, NodeError};
    use crate::protocol::{latency_ms, NodeId};
    use chrono::{DateTime, Utc};
    use crate::task::bootstrap::NodeIdentity;
    use crate::task::config::{AmbientConfig, TaskParams};
    use crate::task::handoff::Timeout;
    use crate::task::sink::MockRecordSink;
    use mockall::predicate::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Node that answers each CALL synchronously through the handoff
    struct ScriptedNode {
        handoff: Arc<Handoff>,
        /// Message number to answer with, per CALL; `None` echoes the call
        answers: Mutex<Vec<Option<u64>>>,
        sent: Mutex<Vec<(Route, Message)>>,
        reply_times: Mutex<Vec<DateTime<Utc>>>,
    }

    impl ScriptedNode {
        fn new(handoff: Arc<Handoff>, answers: Vec<Option<u64>>) -> Self {
            Self {
                handoff,
                answers: Mutex::new(answers),
                sent: Mutex::new(Vec::new()),
                reply_times: Mutex::new(Vec::new()),
            }
        }

        fn stops(&self) -> usize {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, message)| *message == Message::Stop)
                .count()
        }
    }

    impl Outbox for ScriptedNode {
        fn send(
            &self,
            route: Route,
            message: Message,
            _flags: DeliveryFlags,
        ) -> crate::node::Result<()> {
            if let Message::Call { message_number } = message {
                let mut answers = self.answers.lock().unwrap();
                let answer = if answers.is_empty() {
                    Some(message_number)
                } else {
                    answers.remove(0)
                };
                if let Some(number) = answer {
                    let recv_time = Utc::now();
                    self.reply_times.lock().unwrap().push(recv_time);
                    self.handoff.responses.put(CallResponse {
                        message_number: number,
                        recv_time,
                    });
                }
            }
            self.sent.lock().unwrap().push((route, message));
            Ok(())
        }
    }

    impl NetNode for ScriptedNode {
        fn id(&self) -> NodeId {
            LEADER_ID.to_string()
        }

        fn release(&self) {}
    }

    fn leader(n_messages: u64, answers: Vec<Option<u64>>) -> NetworkLatency<ScriptedNode> {
        let params = TaskParams::leader(n_messages, "pilot_2").with_iti(Duration::ZERO);
        let ambient = AmbientConfig::default();
        let handoff = Arc::new(Handoff::new());
        handoff.ready.set();
        NetworkLatency {
            identity: NodeIdentity::for_role(&params, &ambient).unwrap(),
            params,
            ambient,
            node: ScriptedNode::new(Arc::clone(&handoff), answers),
            handoff,
        }
    }

    #[test]
    fn test_leader_emits_one_record_per_volley() -> Result<()> {
        let task = leader(4, vec![]);
        let mut sink = MockRecordSink::new();
        let mut expected = 0u64;
        sink.expect_emit().times(4).returning(move |record| {
            assert_eq!(record.trial_num, expected);
            assert!(record.trial_end);
            expected += 1;
            Ok(())
        });

        let outcome = task.volley(&mut sink)?;
        assert_eq!(outcome.completed, 4);
        assert_eq!(outcome.mismatches, 0);
        assert!(!outcome.truncated);
        assert_eq!(task.node.stops(), 1);
        assert!(task.handoff.quitting.is_set());
        Ok(())
    }

    #[test]
    fn test_zero_messages_sends_only_stop() -> Result<()> {
        let task = leader(0, vec![]);
        let mut sink = MockRecordSink::new();
        sink.expect_emit().never();

        let outcome = task.volley(&mut sink)?;
        assert_eq!(outcome, VolleyOutcome::default());
        let sent = task.node.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (Route::to(FOLLOWER_ID), Message::Stop));
        Ok(())
    }

    #[test]
    fn test_mismatch_is_counted_not_fatal() -> Result<()> {
        let task = leader(2, vec![Some(1), Some(1)]);
        let mut records: Vec<VolleyRecord> = Vec::new();

        let outcome = task.volley(&mut records)?;
        assert_eq!(outcome.completed, 2);
        assert_eq!(outcome.mismatches, 1);
        assert_eq!(records[0].trial_num, 0);

        // the mismatched reply still supplies recv_time and latency
        let reply_times = task.node.reply_times.lock().unwrap().clone();
        assert_eq!(records[0].recv_time, reply_times[0]);
        assert_eq!(
            records[0].latency_ms,
            latency_ms(records[0].send_time, reply_times[0])
        );
        Ok(())
    }

    #[test]
    fn test_response_timeout_reports_liveness_and_stops() {
        let mut task = leader(3, vec![None]);
        task.params.response_timeout = Timeout::Duration(Duration::from_millis(20));
        let mut records: Vec<VolleyRecord> = Vec::new();

        let result = task.volley(&mut records);
        assert!(matches!(result, Err(TaskError::Liveness(_))));
        assert!(records.is_empty());
        assert_eq!(task.node.stops(), 1);
    }

    #[test]
    fn test_ready_timeout_reports_liveness() {
        let mut task = leader(3, vec![]);
        task.handoff = Arc::new(Handoff::new());
        task.params.ready_timeout = Timeout::Duration(Duration::from_millis(20));
        let mut records: Vec<VolleyRecord> = Vec::new();

        assert!(matches!(
            task.volley(&mut records),
            Err(TaskError::Liveness(_))
        ));
        assert_eq!(task.node.stops(), 1);
    }

    #[test]
    fn test_sink_error_still_stops() {
        let task = leader(3, vec![]);
        let mut sink = MockRecordSink::new();
        sink.expect_emit()
            .times(1)
            .returning(|_| Err(TaskError::Sink("disk full".into())));

        assert!(matches!(task.volley(&mut sink), Err(TaskError::Sink(_))));
        assert_eq!(task.node.stops(), 1);
    }

    #[test]
    fn test_follower_answers_call() {
        let handoff = Arc::new(Handoff::new());
        let listens = VolleyListens::new(Role::Follower, handoff);
        let mut outbox = MockOutbox::new();
        outbox
            .expect_send()
            .with(
                eq(Route::to(LEADER_ID)),
                function(|message: &Message| {
                    matches!(message, Message::Response(r) if r.message_number == 3)
                }),
                eq(DeliveryFlags::NO_REPEAT),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));

        let envelope = Envelope {
            id: 0,
            sender: LEADER_ID.into(),
            route: Route::to(FOLLOWER_ID),
            message: Message::Call { message_number: 3 },
            flags: DeliveryFlags::NO_REPEAT,
        };
        listens.on_message(&envelope, &outbox);
    }

    #[test]
    fn test_follower_send_failure_is_swallowed() {
        let listens = VolleyListens::new(Role::Follower, Arc::new(Handoff::new()));
        let mut outbox = MockOutbox::new();
        outbox
            .expect_send()
            .times(1)
            .returning(|_, _, _| Err(NodeError::UnknownPeer(LEADER_ID.into())));

        let envelope = Envelope {
            id: 0,
            sender: LEADER_ID.into(),
            route: Route::to(FOLLOWER_ID),
            message: Message::Call { message_number: 0 },
            flags: DeliveryFlags::NONE,
        };
        listens.on_message(&envelope, &outbox);
    }

    #[test]
    fn test_stop_sets_quitting_and_ready() {
        let handoff = Arc::new(Handoff::new());
        let listens = VolleyListens::new(Role::Leader, Arc::clone(&handoff));
        let outbox = MockOutbox::new();
        let envelope = Envelope {
            id: 0,
            sender: FOLLOWER_ID.into(),
            route: Route::to(LEADER_ID),
            message: Message::Stop,
            flags: DeliveryFlags::NONE,
        };
        listens.on_message(&envelope, &outbox);
        assert!(handoff.quitting.is_set());
        assert!(handoff.ready.is_set());
    }
}
