// src/coordinator/commands.rs
//! Operator commands on the inbound channel. Commands never reach the
//! ingest pipeline; every command produces a reply.

use anyhow::Result;

use crate::store::{Channel, ChannelKind, ChannelStatus, Store};

/// Outcome of a dispatch: both arms carry text for the user; only
/// internal errors bubble as `Err` to be logged (never shown raw).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Ok(String),
    UserError(String),
}

impl Dispatch {
    pub fn text(&self) -> &str {
        match self {
            Dispatch::Ok(t) | Dispatch::UserError(t) => t,
        }
    }
}

const HELP: &str = "\
Commands:\n\
/status — item, signal and channel counters\n\
/add <name> <url> — register a feed channel\n\
/ignore <id> — stop polling a channel\n\
/help — this listing";

/// Execute one command line. The first token picks the command,
/// case-insensitively.
pub fn execute(store: &Store, line: &str) -> Result<Dispatch> {
    let mut tokens = line.split_whitespace();
    let head = tokens.next().unwrap_or("").to_ascii_lowercase();
    match head.as_str() {
        "/status" => {
            let stats = store.stats()?;
            Ok(Dispatch::Ok(format!(
                "items={} signals={} channels={}",
                stats.items, stats.signals, stats.channels
            )))
        }
        "/add" => {
            let (Some(name), Some(url)) = (tokens.next(), tokens.next()) else {
                return Ok(Dispatch::UserError("usage: /add <name> <url>".into()));
            };
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Ok(Dispatch::UserError(format!("not a feed url: {url}")));
            }
            let channel = Channel {
                id: uuid::Uuid::new_v4().to_string(),
                name: name.to_string(),
                kind: ChannelKind::Feed,
                feed_url: Some(url.to_string()),
                last_polled_at: None,
                success_count: 0,
                failure_count: 0,
                status: ChannelStatus::Active,
            };
            store.upsert_channel(&channel)?;
            Ok(Dispatch::Ok(format!(
                "feed '{name}' registered (id {})",
                channel.id
            )))
        }
        "/ignore" => {
            let Some(id) = tokens.next() else {
                return Ok(Dispatch::UserError("usage: /ignore <id>".into()));
            };
            if store.set_channel_status(id, ChannelStatus::Ignored)? {
                Ok(Dispatch::Ok(format!("channel {id} ignored")))
            } else {
                Ok(Dispatch::UserError(format!("unknown channel id: {id}")))
            }
        }
        "/help" => Ok(Dispatch::Ok(HELP.to_string())),
        _ => Ok(Dispatch::UserError("unknown command".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reports_counters() {
        let store = Store::open_in_memory().unwrap();
        let out = execute(&store, "/status").unwrap();
        assert_eq!(out, Dispatch::Ok("items=0 signals=0 channels=0".into()));
    }

    #[test]
    fn add_then_ignore_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let out = execute(&store, "/add Reuters https://r.example/rss").unwrap();
        let Dispatch::Ok(reply) = out else {
            panic!("add failed: {out:?}")
        };
        let id = reply.rsplit_once("(id ").unwrap().1.trim_end_matches(')');
        let out = execute(&store, &format!("/ignore {id}")).unwrap();
        assert!(matches!(out, Dispatch::Ok(_)));

        let channels = store.list_channels(Some(ChannelKind::Feed)).unwrap();
        assert_eq!(channels[0].status, ChannelStatus::Ignored);
    }

    #[test]
    fn bad_args_are_user_errors() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            execute(&store, "/add onlyname").unwrap(),
            Dispatch::UserError(_)
        ));
        assert!(matches!(
            execute(&store, "/ignore nope-id").unwrap(),
            Dispatch::UserError(_)
        ));
        assert!(matches!(
            execute(&store, "/frobnicate").unwrap(),
            Dispatch::UserError(_)
        ));
    }

    #[test]
    fn command_match_is_case_insensitive() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            execute(&store, "/STATUS").unwrap(),
            Dispatch::Ok(_)
        ));
    }
}
