mod memory;
mod surreal;

use std::sync::Arc;

use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;
use threadline_domain::ports::contacts::ContactRepository;
use threadline_domain::ports::conversations::ConversationRepository;
use threadline_domain::ports::labels::LabelRepository;
use threadline_domain::ports::messages::MessageRepository;
use threadline_domain::ports::outbox::OutboxRepository;

pub use memory::*;
pub use surreal::*;

/// One handle per persisted aggregate, shared by every service.
#[derive(Clone)]
pub struct Repositories {
    pub contacts: Arc<dyn ContactRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub outbox: Arc<dyn OutboxRepository>,
    pub labels: Arc<dyn LabelRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            contacts: Arc::new(InMemoryContactRepository::new()),
            conversations: Arc::new(InMemoryConversationRepository::new()),
            messages: Arc::new(InMemoryMessageRepository::new()),
            outbox: Arc::new(InMemoryOutboxRepository::new()),
            labels: Arc::new(InMemoryLabelRepository::new()),
        }
    }

    pub fn surreal(client: Arc<Surreal<Client>>) -> Self {
        Self {
            contacts: Arc::new(SurrealContactRepository::with_client(client.clone())),
            conversations: Arc::new(SurrealConversationRepository::with_client(client.clone())),
            messages: Arc::new(SurrealMessageRepository::with_client(client.clone())),
            outbox: Arc::new(SurrealOutboxRepository::with_client(client.clone())),
            labels: Arc::new(SurrealLabelRepository::with_client(client)),
        }
    }
}
