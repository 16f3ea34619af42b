//! ChannelGate CLI
//!
//! Offline tools for the pure parts of the core: URL marker reflection, identity resolution
//! over dumped host data objects, and list-membership checks against a settings file.

use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand, ValueEnum};
use log::debug;
use serde_json::{json, Value};

use cg_core::lists::Oracle;
use cg_core::resolver::{self, IdentityPaths};
use cg_core::url::{self, PageKind};
use cg_core::{Channel, Settings};

#[derive(Parser)]
#[command(name = "cg-cli")]
#[command(about = "ChannelGate developer tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add or remove the allow-ads marker on a URL
    Reflect {
        url: String,

        /// Add the marker (default removes it)
        #[arg(short, long)]
        allow: bool,
    },

    /// Resolve a channel identity from a JSON dump of a host data object
    Resolve {
        /// JSON file holding the element's `data` object
        input: String,

        /// Which element the dump came from
        #[arg(short, long, value_enum, default_value_t = Kind::Video)]
        kind: Kind,
    },

    /// Show a channel's list membership under a settings snapshot
    Check {
        /// Settings JSON file
        settings: String,

        /// Channel id (`UC...`), `@handle`, username or channel URL
        channel: String,

        /// Treat the user as subscribed
        #[arg(short, long)]
        subscribed: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kind {
    Video,
    Channel,
    Search,
    Related,
}

impl Kind {
    fn paths(self) -> &'static IdentityPaths {
        match self {
            Kind::Video => &resolver::VIDEO_OWNER,
            Kind::Channel => &resolver::CHANNEL_HEADER,
            Kind::Search => &resolver::SEARCH_ITEM,
            Kind::Related => &resolver::RELATED_ITEM,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Reflect { url, allow } => cmd_reflect(&url, allow),
        Commands::Resolve { input, kind } => cmd_resolve(&input, kind),
        Commands::Check {
            settings,
            channel,
            subscribed,
        } => cmd_check(&settings, &channel, subscribed),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn read_json(path: &str) -> Result<Value, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    serde_json::from_str(&text).map_err(|e| format!("Invalid JSON in '{}': {}", path, e))
}

fn cmd_reflect(input: &str, allow: bool) -> Result<(), String> {
    let reflected = url::reflect(input, allow);
    println!("{reflected}");
    if let Some(kind) = PageKind::from_url(&reflected) {
        debug!("page kind: {}", kind.as_str());
    }
    Ok(())
}

/// Profiles address the element, so a bare `data` dump is wrapped to match.
fn as_element(dump: Value) -> Value {
    match dump.get("data") {
        Some(_) => dump,
        None => json!({ "data": dump }),
    }
}

fn cmd_resolve(input: &str, kind: Kind) -> Result<(), String> {
    let element = as_element(read_json(input)?);
    let identity = resolver::from_data(&element, kind.paths());
    if !identity.channel.is_valid() {
        return Err(format!("No channel identity in '{}' for {:?}", input, kind));
    }
    let out = json!({
        "channel": identity.channel,
        "subscribed": identity.subscribed,
    });
    println!("{}", serde_json::to_string_pretty(&out).map_err(|e| e.to_string())?);
    Ok(())
}

/// `UC...` ids, channel URLs, `@handle`s and bare usernames.
fn parse_channel(arg: &str) -> Channel {
    if arg.contains('/') {
        if let Some(channel) = url::parse_channel_href(arg) {
            return channel;
        }
    }
    if arg.starts_with("UC") && arg.len() > 20 {
        Channel::from_id(arg)
    } else {
        Channel::from_username(arg)
    }
}

fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

fn cmd_check(settings_path: &str, channel: &str, subscribed: bool) -> Result<(), String> {
    let settings: Settings = serde_json::from_value(read_json(settings_path)?)
        .map_err(|e| format!("Invalid settings in '{}': {}", settings_path, e))?;
    let channel = parse_channel(channel);
    if !channel.is_valid() {
        return Err("Channel must have an id or username".to_string());
    }

    let oracle = Oracle::new(&settings);
    let membership = oracle.membership(&channel, subscribed);

    println!("Channel: {}", channel.key());
    let names: Vec<&str> = membership.iter_names().map(|(name, _)| name).collect();
    let lists = if names.is_empty() { "-".to_string() } else { names.join(", ") };
    println!("  Lists:       {lists}");
    println!("  Ads allowed: {}", oracle.allows_ads(&channel, subscribed, now_ms()));
    println!("  Muted ads:   {}", oracle.should_mute(Some(&channel)));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channel_forms() {
        assert_eq!(parse_channel("UCabcdefghijklmnopqrstuv").id, "UCabcdefghijklmnopqrstuv");
        assert_eq!(parse_channel("someone").username, "someone");
        assert_eq!(
            parse_channel("https://www.youtube.com/channel/UCabcdefghijklmnopqrstuv").id,
            "UCabcdefghijklmnopqrstuv"
        );
    }

    #[test]
    fn test_bare_dump_is_wrapped() {
        let wrapped = as_element(json!({"title": "x"}));
        assert_eq!(wrapped, json!({"data": {"title": "x"}}));

        let element = json!({"data": {"title": "x"}});
        assert_eq!(as_element(element.clone()), element);
    }

    #[test]
    fn test_kind_selects_profile() {
        let dump = as_element(json!({
            "navigationEndpoint": {"browseEndpoint": {"browseId": "UC1"}},
            "title": {"runs": [{"text": "Creator"}]}
        }));
        let identity = resolver::from_data(&dump, Kind::Video.paths());
        assert_eq!(identity.channel.id, "UC1");
    }
}
