use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::entities::{Channel, Team};
use crate::rules::{Rule, RuleRecord, RuleStore};

pub const SUCCESS_REPLY: &str = "Command processed successfully";

fn syntax(prefix: &str) -> String {
    format!("Syntax: {prefix} [rule-add json] [rule-del name] [rule-del-all] [rule-list] [help]")
}

enum Reply {
    /// The command mutated the store; report the fixed success string.
    Done,
    /// The command produced text to post back verbatim.
    Text(String),
}

/// Handle an administrative command addressed to the bot. Never fails:
/// any parse or application error becomes the generic failure message
/// with the syntax reminder.
pub fn handle_command(
    store: &mut RuleStore,
    team: &Team,
    channel: &Channel,
    text: &str,
    prefix: &str,
) -> String {
    match apply(store, team, channel, text, prefix) {
        Ok(Reply::Done) => SUCCESS_REPLY.to_string(),
        Ok(Reply::Text(reply)) => reply,
        Err(e) => {
            warn!("command failed: {e:#}");
            format!("Error processing command. {}", syntax(prefix))
        }
    }
}

fn apply(
    store: &mut RuleStore,
    team: &Team,
    channel: &Channel,
    text: &str,
    prefix: &str,
) -> Result<Reply> {
    let cmd = text.strip_prefix(prefix).unwrap_or(text);

    if let Some(args) = cmd.strip_prefix(" rule-add ") {
        let mut record: RuleRecord =
            serde_json::from_str(args.trim()).context("invalid rule json")?;
        // Source fields come from the invoking context, never from input.
        record.frontend_team = team.name.clone();
        record.frontend_channel = channel.name.clone();
        let rule = Rule::from_record(record);
        debug!("rule-add: {rule:?}");
        if !store.add_rule(rule) {
            anyhow::bail!("rule rejected");
        }
        store.store()?;
        Ok(Reply::Done)
    } else if let Some(args) = cmd.strip_prefix(" rule-del ") {
        let name = args.trim();
        if !store.remove_rule(name) {
            anyhow::bail!("no rule named {name:?}");
        }
        store.store()?;
        Ok(Reply::Done)
    } else if cmd.starts_with(" rule-del-all") {
        store.remove_all();
        store.store()?;
        Ok(Reply::Done)
    } else if cmd.starts_with(" rule-list") {
        let matching: Vec<RuleRecord> = store
            .records()
            .into_iter()
            .filter(|r| r.frontend_team == team.name && r.frontend_channel == channel.name)
            .collect();
        Ok(Reply::Text(serde_json::to_string_pretty(&matching)?))
    } else if cmd.starts_with(" help") {
        Ok(Reply::Text(syntax(prefix)))
    } else {
        anyhow::bail!("unrecognized command: {cmd:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Backend;

    const PREFIX: &str = "<@BOTID>";

    fn team() -> Team {
        Team {
            id: "T1".to_string(),
            name: "T".to_string(),
        }
    }

    fn channel(name: &str) -> Channel {
        Channel {
            id: "C1".to_string(),
            name: name.to_string(),
            is_private: false,
        }
    }

    fn store() -> (tempfile::TempDir, RuleStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("rules.json"));
        (dir, store)
    }

    fn failure(prefix: &str) -> String {
        format!("Error processing command. {}", syntax(prefix))
    }

    #[test]
    fn test_rule_add_injects_invoking_context() {
        let (_dir, mut store) = store();

        let reply = handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> rule-add {\"name\":\"r1\",\"backend\":\"echo\"}",
            PREFIX,
        );
        assert_eq!(reply, SUCCESS_REPLY);

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "r1");
        assert_eq!(records[0].frontend_team, "T");
        assert_eq!(records[0].frontend_channel, "#general");
        assert_eq!(records[0].backend, "echo");
        assert_eq!(records[0].backend_url, None);
    }

    #[test]
    fn test_rule_add_ignores_user_supplied_source_fields() {
        let (_dir, mut store) = store();

        handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> rule-add {\"name\":\"r1\",\"frontend-team\":\"evil\",\"frontend-channel\":\"#elsewhere\"}",
            PREFIX,
        );
        let records = store.records();
        assert_eq!(records[0].frontend_team, "T");
        assert_eq!(records[0].frontend_channel, "#general");
    }

    #[test]
    fn test_rule_add_webhook_requires_url() {
        let (_dir, mut store) = store();

        let reply = handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> rule-add {\"name\":\"h\",\"backend\":\"slack-iwh\"}",
            PREFIX,
        );
        assert_eq!(reply, failure(PREFIX));
        assert!(store.rules().is_empty());

        let reply = handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> rule-add {\"name\":\"h\",\"backend\":\"slack-iwh\",\"backend-url\":\"<https://example.com/hook>\"}",
            PREFIX,
        );
        assert_eq!(reply, SUCCESS_REPLY);
        assert_eq!(
            store.rules()[0].backend,
            Backend::Webhook {
                url: "https://example.com/hook".to_string()
            }
        );
    }

    #[test]
    fn test_rule_add_malformed_json_is_failure() {
        let (_dir, mut store) = store();

        let reply = handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> rule-add {not json",
            PREFIX,
        );
        assert_eq!(reply, failure(PREFIX));
        assert!(store.rules().is_empty());
    }

    #[test]
    fn test_rule_del_second_call_fails() {
        let (_dir, mut store) = store();

        handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> rule-add {\"name\":\"r1\"}",
            PREFIX,
        );
        let reply = handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> rule-del r1",
            PREFIX,
        );
        assert_eq!(reply, SUCCESS_REPLY);
        let reply = handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> rule-del r1",
            PREFIX,
        );
        assert_eq!(reply, failure(PREFIX));
    }

    #[test]
    fn test_rule_del_all_always_succeeds() {
        let (_dir, mut store) = store();

        let reply = handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> rule-del-all",
            PREFIX,
        );
        assert_eq!(reply, SUCCESS_REPLY);

        handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> rule-add {\"name\":\"r1\"}",
            PREFIX,
        );
        handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> rule-del-all",
            PREFIX,
        );
        assert!(store.rules().is_empty());
    }

    #[test]
    fn test_rule_list_filters_by_invoking_context() {
        let (_dir, mut store) = store();

        handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> rule-add {\"name\":\"here\"}",
            PREFIX,
        );
        handle_command(
            &mut store,
            &team(),
            &channel("#random"),
            "<@BOTID> rule-add {\"name\":\"elsewhere\"}",
            PREFIX,
        );

        let reply = handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> rule-list",
            PREFIX,
        );
        assert!(reply.contains("here"));
        assert!(!reply.contains("elsewhere"));
    }

    #[test]
    fn test_help_returns_syntax() {
        let (_dir, mut store) = store();

        let reply = handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> help",
            PREFIX,
        );
        assert_eq!(reply, syntax(PREFIX));
    }

    #[test]
    fn test_unknown_command_is_failure() {
        let (_dir, mut store) = store();

        let reply = handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> frobnicate",
            PREFIX,
        );
        assert_eq!(reply, failure(PREFIX));
    }

    #[test]
    fn test_mutations_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let mut store = RuleStore::new(path.clone());

        handle_command(
            &mut store,
            &team(),
            &channel("#general"),
            "<@BOTID> rule-add {\"name\":\"r1\"}",
            PREFIX,
        );

        let mut fresh = RuleStore::new(path);
        fresh.load().unwrap();
        assert_eq!(fresh.rules().len(), 1);
        assert_eq!(fresh.rules()[0].name, "r1");
    }
}
