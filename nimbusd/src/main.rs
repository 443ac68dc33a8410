use std::sync::Arc;

use anyhow::{Context, bail};
use nimbus_core::NimbusClient;
use nimbusd::config::{NimbusConfig, normalize_remote_path};
use nimbusd::sync::engine::{ContainerScope, SyncEngine};
use nimbusd::sync::enumerator::Enumerator;
use nimbusd::sync::index::IndexStore;
use nimbusd::sync::items::ItemIdentifier;
use nimbusd::sync::paging::{InitialSort, PageToken};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    List { path: String, page: Option<usize> },
    WorkingSet,
    Changes { anchor: Option<String> },
    Anchor,
    Help,
}

impl CliMode {
    fn needs_network(&self) -> bool {
        matches!(self, CliMode::List { page: None, .. })
    }
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(command) = args.next() else {
        return Ok(CliMode::Help);
    };
    let mode = match command.as_str() {
        "--help" | "-h" | "help" => CliMode::Help,
        "list" => {
            let mut path = None;
            let mut page = None;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--page" => {
                        let value = args.next().context("--page needs a value")?;
                        page = Some(
                            value
                                .parse::<usize>()
                                .with_context(|| format!("invalid page: {value}"))?,
                        );
                    }
                    other if other.starts_with('-') => bail!("unknown argument: {other}"),
                    other if path.is_none() => path = Some(normalize_remote_path(other)),
                    other => bail!("unexpected argument: {other}"),
                }
            }
            CliMode::List {
                path: path.context("list needs a remote path")?,
                page,
            }
        }
        "working-set" => CliMode::WorkingSet,
        "changes" => {
            let mut anchor = None;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--anchor" => anchor = Some(args.next().context("--anchor needs a value")?),
                    other => bail!("unknown argument: {other}"),
                }
            }
            CliMode::Changes { anchor }
        }
        "anchor" => CliMode::Anchor,
        other => bail!("unknown command: {other}"),
    };
    if let Some(extra) = args.next() {
        bail!("unexpected argument: {extra}");
    }
    Ok(mode)
}

fn print_usage() {
    println!("Usage: nimbusd <command>");
    println!("  list <path> [--page N]   List a directory; the first page refreshes from remote");
    println!("  working-set              List favorited and tagged items");
    println!("  changes [--anchor N]     Report pending deletions and updates");
    println!("  anchor                   Print the current sync anchor");
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

async fn bootstrap(config: &NimbusConfig, needs_network: bool) -> anyhow::Result<Arc<SyncEngine>> {
    let token = match (&config.token, needs_network) {
        (Some(token), _) => token.clone(),
        (None, false) => String::new(),
        (None, true) => bail!("NIMBUS_TOKEN is not set"),
    };
    let client = NimbusClient::with_base_url(&config.base_url, config.account.clone(), token)
        .context("invalid NIMBUS_BASE_URL")?;
    let index = match &config.db_path {
        Some(path) => IndexStore::open(path).await?,
        None => IndexStore::new_default().await?,
    };
    Ok(Arc::new(SyncEngine::new(client, index, config.engine.clone())))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        print_usage();
        return Ok(());
    }
    let config = NimbusConfig::from_env()?;
    let engine = bootstrap(&config, mode.needs_network()).await?;

    match mode {
        CliMode::List { path, page } => {
            let token = page
                .map(PageToken::Page)
                .unwrap_or(PageToken::Initial(InitialSort::Name));
            let listing = engine
                .list_container(
                    &ContainerScope::Directory(path),
                    token,
                    &CancellationToken::new(),
                )
                .await?;
            for item in &listing.items {
                print_json(item)?;
            }
            if let Some(next) = listing.next_page {
                let next = String::from_utf8_lossy(&next.encode()).into_owned();
                print_json(&json!({ "next_page": next }))?;
            }
        }
        CliMode::WorkingSet => {
            let enumerator = Enumerator::open(Arc::clone(&engine), ItemIdentifier::WorkingSet).await?;
            let listing = enumerator
                .enumerate_items(&PageToken::Initial(InitialSort::Name).encode())
                .await?;
            for item in &listing.items {
                print_json(item)?;
            }
        }
        CliMode::Changes { anchor } => {
            engine.refresh_favorites().await?;
            let since = anchor.unwrap_or_else(|| engine.current_anchor().to_string());
            for container in [ItemIdentifier::RootContainer, ItemIdentifier::WorkingSet] {
                let enumerator = Enumerator::open(Arc::clone(&engine), container.clone()).await?;
                let report = enumerator.enumerate_changes(since.as_bytes())?;
                for deleted in &report.deleted {
                    print_json(&json!({ "container": container, "deleted": deleted }))?;
                }
                for updated in &report.updated {
                    print_json(&json!({ "container": container, "updated": updated }))?;
                }
            }
            print_json(&json!({ "anchor": engine.current_anchor().value() }))?;
        }
        CliMode::Anchor => {
            print_json(&json!({ "anchor": engine.current_anchor().value() }))?;
        }
        CliMode::Help => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        std::iter::once("nimbusd")
            .chain(values.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parse_cli_mode_defaults_to_help() {
        assert_eq!(parse_cli_mode(args(&[])).unwrap(), CliMode::Help);
        assert_eq!(parse_cli_mode(args(&["--help"])).unwrap(), CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_supports_list_with_page() {
        let mode = parse_cli_mode(args(&["list", "Photos/", "--page", "2"])).unwrap();
        assert_eq!(
            mode,
            CliMode::List {
                path: "/Photos".into(),
                page: Some(2)
            }
        );
        assert!(!mode.needs_network());
        assert!(parse_cli_mode(args(&["list", "/"])).unwrap().needs_network());
    }

    #[test]
    fn parse_cli_mode_rejects_bad_arguments() {
        assert!(parse_cli_mode(args(&["list"])).is_err());
        assert!(parse_cli_mode(args(&["list", "/", "--page", "two"])).is_err());
        assert!(parse_cli_mode(args(&["working-set", "extra"])).is_err());
        assert!(parse_cli_mode(args(&["sync"])).is_err());
    }

    #[test]
    fn parse_cli_mode_supports_changes_and_anchor() {
        assert_eq!(
            parse_cli_mode(args(&["changes", "--anchor", "7"])).unwrap(),
            CliMode::Changes {
                anchor: Some("7".into())
            }
        );
        assert_eq!(
            parse_cli_mode(args(&["changes"])).unwrap(),
            CliMode::Changes { anchor: None }
        );
        assert_eq!(parse_cli_mode(args(&["anchor"])).unwrap(), CliMode::Anchor);
    }
}
