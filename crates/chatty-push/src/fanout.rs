use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use chatty_db::Database;
use chatty_types::models::{ChatKind, ChatRef};

use crate::provider::{PushNotification, PushProvider};

/// Best-effort push fan-out, decoupled from message persistence: failures
/// here are logged and never reach the sender.
pub struct Notifier<P> {
    db: Arc<Database>,
    provider: P,
}

impl<P: PushProvider> Notifier<P> {
    pub fn new(db: Arc<Database>, provider: P) -> Self {
        Self { db, provider }
    }

    /// Fire-and-forget entry point used by the gateway's send path.
    pub fn spawn_notify(self: &Arc<Self>, chat: ChatRef, sender_id: String, content: String) {
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = notifier.notify(&chat, &sender_id, &content).await {
                warn!("Push fan-out failed for chat {}: {:#}", chat.id, err);
            }
        });
    }

    /// Deliver a new-message notification to every registered device of
    /// the other participant, pruning tokens the provider reports dead.
    /// Group chats carry no push; only private chats notify.
    pub async fn notify(&self, chat: &ChatRef, sender_id: &str, content: &str) -> Result<()> {
        if chat.kind != ChatKind::Private {
            return Ok(());
        }

        let db = Arc::clone(&self.db);
        let chat_id = chat.id.clone();
        let sender = sender_id.to_string();
        let tokens: Vec<String> = tokio::task::spawn_blocking(move || {
            let private = db
                .get_private_chat(&chat_id)?
                .with_context(|| format!("private chat {} not found", chat_id))?;
            let recipient = if private.user_a == sender {
                private.user_b
            } else {
                private.user_a
            };
            let tokens = db
                .device_tokens_for_user(&recipient)?
                .into_iter()
                .map(|row| row.token)
                .collect::<Vec<_>>();
            Ok::<_, anyhow::Error>(tokens)
        })
        .await??;

        if tokens.is_empty() {
            debug!("No device tokens for chat {} recipient, skipping push", chat.id);
            return Ok(());
        }

        let notification = PushNotification {
            title: "Chatty".to_string(),
            body: content.to_string(),
        };
        let deliveries = self.provider.send_multicast(&tokens, &notification).await?;

        let dead: Vec<String> = deliveries
            .iter()
            .filter(|d| d.permanent_failure)
            .map(|d| d.token.clone())
            .collect();

        if !dead.is_empty() {
            let db = Arc::clone(&self.db);
            let count = dead.len();
            let pruned =
                tokio::task::spawn_blocking(move || db.delete_device_tokens(&dead)).await??;
            info!("Pruned {}/{} dead device tokens", pruned, count);
        }

        Ok(())
    }
}
