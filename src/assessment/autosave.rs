//! Sends answer edits one at a time, in the order they were made.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::model::{AnswerId, AttemptId, QuestionId};
use crate::transport::AssessmentApi;

#[derive(Debug)]
struct Edit {
    session: u64,
    seq: u64,
    question: QuestionId,
    answers: Vec<AnswerId>,
}

#[derive(Debug)]
enum Message {
    Edit(Edit),
    Barrier(oneshot::Sender<()>),
}

/// Decides, at send time, which attempt an edit made during answering `session` still belongs to.
pub(super) trait Gate: Send + Sync + 'static {
    fn target(&self, session: u64) -> Option<AttemptId>;
}

impl<F> Gate for F
where
    F: Fn(u64) -> Option<AttemptId> + Send + Sync + 'static,
{
    fn target(&self, session: u64) -> Option<AttemptId> {
        self(session)
    }
}

/// The latest edit of a question that the server has not answered yet.
#[derive(Debug, Clone)]
struct Pending {
    session: u64,
    seq: u64,
    answers: Vec<AnswerId>,
    /// Passed the gate, so it reaches the server even if the session ends meanwhile.
    sending: bool,
}

/// Handle to the worker, which stops once the handle is dropped and the queue is drained.
#[derive(Debug)]
pub(super) struct Autosave {
    tx: mpsc::UnboundedSender<Message>,
    pending: Arc<DashMap<QuestionId, Pending>>,
    next_seq: AtomicU64,
}

impl Autosave {
    pub(super) fn spawn(api: Arc<dyn AssessmentApi>, gate: impl Gate) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(DashMap::new());
        tokio::spawn(run(api, gate, pending.clone(), rx));

        Self {
            tx,
            pending,
            next_seq: AtomicU64::new(0),
        }
    }

    pub(super) fn enqueue(&self, session: u64, question: QuestionId, answers: Vec<AnswerId>) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(
            question,
            Pending {
                session,
                seq,
                answers: answers.clone(),
                sending: false,
            },
        );

        let edit = Edit {
            session,
            seq,
            question,
            answers,
        };
        if self.tx.send(Message::Edit(edit)).is_err() {
            self.pending.remove(&question);
            tracing::warn!(%question, "autosave worker is gone, edit dropped");
        }
    }

    /// The selection `question` will have once its unanswered edit lands, if that edit belongs
    /// to `session` or is already on its way to the server.
    pub(super) fn pending_answers(&self, question: QuestionId, session: u64) -> Option<Vec<AnswerId>> {
        self.pending
            .get(&question)
            .filter(|pending| pending.session == session || pending.sending)
            .map(|pending| pending.answers.clone())
    }

    pub(super) fn forget_pending(&self) {
        self.pending.clear();
    }

    /// Wait until every edit enqueued so far has been sent or discarded.
    pub(super) async fn settled(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Message::Barrier(done)).is_err() {
            return;
        }

        let _ = wait.await;
    }
}

async fn run(
    api: Arc<dyn AssessmentApi>,
    gate: impl Gate,
    pending: Arc<DashMap<QuestionId, Pending>>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let edit = match message {
            Message::Edit(edit) => edit,
            Message::Barrier(done) => {
                let _ = done.send(());
                continue;
            }
        };

        match gate.target(edit.session) {
            Some(attempt) => {
                if let Some(mut latest) = pending.get_mut(&edit.question) {
                    if latest.seq == edit.seq {
                        latest.sending = true;
                    }
                }

                let sent = api
                    .send_answer_selection(attempt, edit.question, &edit.answers)
                    .await;
                if let Err(error) = sent {
                    tracing::warn!(%error, question = %edit.question, "autosave failed, edit dropped");
                }
            }
            None => {
                tracing::debug!(question = %edit.question, "no longer answering, edit discarded");
            }
        }

        pending.remove_if(&edit.question, |_, latest| latest.seq == edit.seq);
    }

    tracing::debug!("autosave worker stopped");
}
