//! Like and save toggles on the bound lesson, applied locally before the server confirms them.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashSet;
use snafu::{ensure, Location, ResultExt, Snafu};
use tracing::instrument;

use crate::model::{ContentDescriptor, ContentId, Reaction};
use crate::transport::{ProgressApi, TransportError};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReactionError {
    #[snafu(display("the {reaction} toggle is still being sent"))]
    InFlight {
        reaction: Reaction,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("could not {reaction} content {content}, change reverted: {source}"))]
    SendReaction {
        content: ContentId,
        reaction: Reaction,
        source: TransportError,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReactionState {
    pub liked: bool,
    pub saved: bool,
}

impl ReactionState {
    pub fn get(&self, reaction: Reaction) -> bool {
        match reaction {
            Reaction::Like => self.liked,
            Reaction::Save => self.saved,
        }
    }

    fn set(&mut self, reaction: Reaction, active: bool) {
        match reaction {
            Reaction::Like => self.liked = active,
            Reaction::Save => self.saved = active,
        }
    }
}

pub struct Reactions {
    api: Arc<dyn ProgressApi>,
    content: ContentId,
    state: Mutex<ReactionState>,
    in_flight: DashSet<Reaction>,
}

impl Reactions {
    pub fn new(api: Arc<dyn ProgressApi>, lesson: &ContentDescriptor) -> Self {
        Self {
            api,
            content: lesson.id,
            state: Mutex::new(ReactionState {
                liked: lesson.liked,
                saved: lesson.saved,
            }),
            in_flight: DashSet::new(),
        }
    }

    pub fn state(&self) -> ReactionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn toggle_like(&self) -> Result<bool, ReactionError> {
        self.toggle(Reaction::Like).await
    }

    pub async fn toggle_save(&self) -> Result<bool, ReactionError> {
        self.toggle(Reaction::Save).await
    }

    /// Flip `reaction` now and tell the server. Returns the new value, or reverts it on failure.
    #[instrument(skip(self))]
    pub async fn toggle(&self, reaction: Reaction) -> Result<bool, ReactionError> {
        ensure!(self.in_flight.insert(reaction), InFlightSnafu { reaction });

        let active = self.update(|state| {
            let active = !state.get(reaction);
            state.set(reaction, active);
            active
        });

        let sent = self.api.set_reaction(self.content, reaction, active).await;
        self.in_flight.remove(&reaction);

        if let Err(source) = sent {
            self.update(|state| state.set(reaction, !active));
            return Err(source).context(SendReactionSnafu {
                content: self.content,
                reaction,
            });
        }

        Ok(active)
    }

    fn update<T>(&self, f: impl FnOnce(&mut ReactionState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::ContentType;
    use crate::testing::settle;
    use crate::transport::{MemoryServer, Operation};

    fn lesson() -> ContentDescriptor {
        ContentDescriptor::new(ContentId::new(21), ContentType::Video)
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_is_visible_before_the_server_answers() {
        let server = Arc::new(MemoryServer::new());
        server.set_latency(Operation::SetReaction, Duration::from_secs(1));
        let reactions = Reactions::new(server.clone(), &lesson());

        let (toggled, during) = tokio::join!(reactions.toggle_like(), async {
            settle().await;
            reactions.state()
        });

        assert!(during.liked);
        assert!(toggled.unwrap());
        assert!(server.reaction(lesson().id, Reaction::Like));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_toggle_is_rolled_back() {
        let server = Arc::new(MemoryServer::new());
        server.fail(Operation::SetReaction);
        let reactions = Reactions::new(server.clone(), &lesson());

        let toggled = reactions.toggle_save().await;

        assert!(matches!(toggled, Err(ReactionError::SendReaction { .. })));
        assert_eq!(reactions.state(), ReactionState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn second_toggle_while_in_flight_is_rejected() {
        let server = Arc::new(MemoryServer::new());
        server.set_latency(Operation::SetReaction, Duration::from_secs(1));
        let reactions = Reactions::new(server.clone(), &lesson());

        let (first, second, other) = tokio::join!(
            reactions.toggle_like(),
            reactions.toggle_like(),
            reactions.toggle_save()
        );

        assert!(first.is_ok());
        assert!(matches!(second, Err(ReactionError::InFlight { .. })));
        assert!(other.is_ok());
        assert_eq!(
            reactions.state(),
            ReactionState {
                liked: true,
                saved: true
            }
        );
    }

    #[tokio::test]
    async fn initial_flags_come_from_the_lesson() {
        let mut liked = lesson();
        liked.liked = true;
        let reactions = Reactions::new(Arc::new(MemoryServer::new()), &liked);

        assert!(!reactions.toggle_like().await.unwrap());
    }
}
