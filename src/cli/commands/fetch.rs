use std::{
    io::{self, IsTerminal},
    sync::Arc,
};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    app::{
        cache::ActivityCache,
        collect::collect_online,
        context::FetchContext,
        offline::load_cached,
        report::{render_json, render_text, ReportOptions},
        retry::{RetryObserver, RetryPolicy, WaitReason},
    },
    cli::{args::FetchArgs, SystemClock},
    config::{
        load_config, parse_allowed_repos, parse_time_range, resolve_cache_db_path,
        validate_config, validate_online, Config, Environment,
    },
    domain::{
        activity::ActivityCollections, identity::AllowedProjects, involvement::Viewer,
        platform::Platform,
    },
    infra::{
        blob_sqlite::SqliteBlobStore, github_client::GitHubClient, gitlab_client::GitLabClient,
    },
    ports::{ClockPort, PlatformPort},
};

pub(crate) async fn run(args: FetchArgs) -> Result<()> {
    let loaded = load_config(args.config.as_deref())?;
    let env = Environment::from_process();
    let mut cfg = loaded.config;
    env.apply(&mut cfg);
    apply_flags(&mut cfg, &args);
    validate_config(&cfg)?;
    debug!(
        config = %loaded.resolved_path.display(),
        from_file = loaded.from_file,
        platform = %cfg.platform,
        "config loaded"
    );

    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock);
    let cutoff = clock.now() - parse_time_range(&cfg.time_range)?;
    let allowed = AllowedProjects::new(cfg.allowed_repos.iter().map(String::as_str));
    let cache_path = resolve_cache_db_path(&cfg)?;

    let collections = if args.local_mode() {
        let store = SqliteBlobStore::new(&cache_path)?;
        let cache = ActivityCache::new(store, cfg.platform);
        if !cache.has_data()? {
            eprintln!(
                "cache is empty: {} (run once without --local to populate it)",
                cache_path.display()
            );
        }
        load_cached(&cache, &allowed, cutoff)?
    } else {
        let token = env.token_for(cfg.platform);
        validate_online(&cfg, token)?;
        let platform = build_platform(&cfg, token.unwrap_or_default())?;

        let cache = match SqliteBlobStore::new(&cache_path) {
            Ok(store) => Some(ActivityCache::new(store, cfg.platform)),
            Err(err) => {
                warn!(error = %err, path = %cache_path.display(), "continuing without cache");
                None
            }
        };

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });

        let retry = RetryPolicy::new(cfg.retry.settings(), clock, cancel).with_observer(
            Arc::new(StderrRetryObserver),
            io::stderr().is_terminal(),
        );
        let viewer = resolve_viewer(&cfg, &*platform, &retry).await?;
        let ctx = FetchContext::new(viewer, allowed, cutoff, retry)?;
        collect_online(&ctx, &*platform, cache.as_ref()).await?
    };

    print_collections(&collections, cfg.platform, &args)
}

fn apply_flags(cfg: &mut Config, args: &FetchArgs) {
    if let Some(platform) = args.platform {
        cfg.platform = platform.into();
    }
    if let Some(time) = &args.time {
        cfg.time_range = time.clone();
    }
    if let Some(repos) = &args.allowed_repos {
        cfg.allowed_repos = parse_allowed_repos(repos);
    }
}

fn build_platform(cfg: &Config, token: &str) -> Result<Box<dyn PlatformPort>> {
    let platform: Box<dyn PlatformPort> = match cfg.platform {
        Platform::GitLab => Box::new(GitLabClient::new(
            cfg.gitlab.base_url.as_deref().unwrap_or_default(),
            token,
        )?),
        Platform::GitHub => Box::new(GitHubClient::new(
            cfg.github.api_base.as_deref().unwrap_or_default(),
            token,
        )?),
    };
    Ok(platform)
}

async fn resolve_viewer(
    cfg: &Config,
    platform: &dyn PlatformPort,
    retry: &RetryPolicy,
) -> Result<Viewer> {
    if let Some(username) = cfg.username.as_deref().filter(|name| !name.trim().is_empty()) {
        return Ok(Viewer::new(username.trim(), None));
    }
    retry
        .execute("current user", || platform.current_user())
        .await
        .with_context(|| format!("failed to fetch {} current user", platform.platform().display_name()))
}

fn print_collections(
    collections: &ActivityCollections,
    platform: Platform,
    args: &FetchArgs,
) -> Result<()> {
    if args.json {
        println!("{}", render_json(collections)?);
    } else {
        let options = ReportOptions {
            show_links: args.show_links(),
        };
        print!("{}", render_text(collections, platform, options));
    }
    Ok(())
}

struct StderrRetryObserver;

impl RetryObserver for StderrRetryObserver {
    fn waiting(&self, operation: &str, reason: WaitReason, remaining_secs: u64) {
        let line = format!("{} on {operation}; retrying in {remaining_secs}s", reason.as_str());
        if remaining_secs <= 1 {
            eprintln!("\r{line:<72}");
        } else {
            eprint!("\r{line:<72}");
        }
    }
}
