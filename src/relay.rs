use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::command;
use crate::entities::{BotIdentity, EntityResolver, Team, User};
use crate::rules::{Backend, Rule, RuleStore};
use crate::slack::{RtmEvent, Transport};

const MENTION_PATTERN: &str = "<@[^>]+>";
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
    username: &'a str,
    icon_url: &'a str,
}

/// Per-event processing: classification, command routing, rule matching,
/// mention rewriting and backend dispatch.
pub struct RelayDispatcher {
    resolver: EntityResolver,
    store: RuleStore,
    http: reqwest::Client,
    mention: Regex,
    /// Slave instances relay only; in-chat commands are ignored.
    slave: bool,
}

impl RelayDispatcher {
    pub fn new(resolver: EntityResolver, store: RuleStore, slave: bool) -> Result<Self> {
        Ok(Self {
            resolver,
            store,
            http: reqwest::Client::new(),
            mention: Regex::new(MENTION_PATTERN)?,
            slave,
        })
    }

    pub fn resolver_mut(&mut self) -> &mut EntityResolver {
        &mut self.resolver
    }

    /// Process one inbound event. An error here spoils only this event;
    /// the caller logs it and keeps polling.
    pub async fn handle_event(
        &mut self,
        transport: &dyn Transport,
        team: &Team,
        bot: &BotIdentity,
        event: &RtmEvent,
    ) -> Result<()> {
        let kind = match &event.kind {
            Some(kind) => kind,
            None => {
                warn!("event without a type: {event:?}");
                return Ok(());
            }
        };
        if kind != "message" {
            return Ok(());
        }
        // Bot-originated traffic would loop back through the relay.
        if event.bot_id.is_some() {
            return Ok(());
        }
        if event
            .previous_message
            .as_ref()
            .is_some_and(|m| m.bot_id.is_some())
        {
            return Ok(());
        }

        debug!("new event: {event:?}");
        let channel_id = event
            .channel
            .as_deref()
            .context("message event without a channel")?;
        let channel = self
            .resolver
            .resolve_channel(transport, team, channel_id)
            .await?;

        let text_field = event.text.as_deref().unwrap_or("");
        if event.subtype.is_none() && text_field.starts_with(&bot.command_prefix) {
            if self.slave {
                warn!("skipping command {text_field:?} (slave mode)");
            } else {
                let reply = command::handle_command(
                    &mut self.store,
                    team,
                    &channel,
                    text_field,
                    &bot.command_prefix,
                );
                transport
                    .post_message(channel_id, &reply, &bot.name, &bot.image)
                    .await?;
            }
            return Ok(());
        }

        let matching: Vec<Rule> = self
            .store
            .rules()
            .iter()
            .filter(|r| r.matches(&team.name, &channel.name))
            .cloned()
            .collect();
        if matching.is_empty() {
            return Ok(());
        }

        let (user, text) = match self.effective_user_and_text(transport, team, event).await? {
            Some(pair) => pair,
            None => return Ok(()),
        };
        let text = self.rewrite_mentions(transport, team, text).await?;
        info!("[{}/{}] {}: {}", team.name, channel.name, user.full_name, text);

        for rule in &matching {
            debug!("processing rule: {}", rule.name);
            if let Err(e) = self
                .dispatch(transport, rule, channel_id, &user, &text)
                .await
            {
                error!("error processing rule {}: {e:#}", rule.name);
            }
        }
        Ok(())
    }

    /// Determine who the relayed message is attributed to and what its
    /// text is, per message subtype. `None` means an unhandled subtype.
    async fn effective_user_and_text(
        &mut self,
        transport: &dyn Transport,
        team: &Team,
        event: &RtmEvent,
    ) -> Result<Option<(User, String)>> {
        let pair = match event.subtype.as_deref() {
            None => {
                let user_id = event.user.as_deref().context("message without a user")?;
                let user = self.resolver.resolve_user(transport, team, user_id).await?;
                (user, event.text.clone().unwrap_or_default())
            }
            Some("message_changed") => {
                let updated = event
                    .message
                    .as_ref()
                    .context("message_changed without message")?;
                let previous = event
                    .previous_message
                    .as_ref()
                    .context("message_changed without previous_message")?;
                let user_id = updated.user.as_deref().context("edit without a user")?;
                let user = self.resolver.resolve_user(transport, team, user_id).await?;
                let text = format!(
                    "[EDITED] {} -> {}",
                    previous.text.as_deref().unwrap_or(""),
                    updated.text.as_deref().unwrap_or("")
                );
                (user, text)
            }
            Some("message_deleted") => {
                let previous = event
                    .previous_message
                    .as_ref()
                    .context("message_deleted without previous_message")?;
                let user_id = previous.user.as_deref().context("delete without a user")?;
                let user = self.resolver.resolve_user(transport, team, user_id).await?;
                let text = format!("[DELETED] {}", previous.text.as_deref().unwrap_or(""));
                (user, text)
            }
            Some("me_message") => {
                let user_id = event.user.as_deref().context("me_message without a user")?;
                let user = self.resolver.resolve_user(transport, team, user_id).await?;
                (user, format!("/me {}", event.text.as_deref().unwrap_or("")))
            }
            Some(other) => {
                warn!("unhandled message subtype {other:?}, skipping");
                return Ok(None);
            }
        };
        Ok(Some(pair))
    }

    /// Replace every `<@id>` mention token with `@name`, left to right,
    /// one replacement per occurrence.
    async fn rewrite_mentions(
        &mut self,
        transport: &dyn Transport,
        team: &Team,
        mut text: String,
    ) -> Result<String> {
        let tokens: Vec<String> = self
            .mention
            .find_iter(&text)
            .map(|m| m.as_str().to_string())
            .collect();
        for token in tokens {
            let user_id = &token[2..token.len() - 1];
            let user = self.resolver.resolve_user(transport, team, user_id).await?;
            text = text.replacen(&token, &format!("@{}", user.name), 1);
        }
        Ok(text)
    }

    async fn dispatch(
        &self,
        transport: &dyn Transport,
        rule: &Rule,
        channel_id: &str,
        user: &User,
        text: &str,
    ) -> Result<()> {
        match &rule.backend {
            Backend::Echo => {
                transport
                    .post_message(channel_id, text, &user.full_name, &user.image)
                    .await
            }
            Backend::Webhook { url } => {
                let payload = WebhookPayload {
                    text,
                    username: &user.full_name,
                    icon_url: &user.image,
                };
                let response = self
                    .http
                    .post(url)
                    .timeout(WEBHOOK_TIMEOUT)
                    .json(&payload)
                    .send()
                    .await
                    .with_context(|| format!("webhook request to {url} failed"))?;
                let status = response.status();
                if !status.is_success() {
                    anyhow::bail!("webhook returned {status}");
                }
                Ok(())
            }
        }
    }
}
