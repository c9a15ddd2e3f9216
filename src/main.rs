use clap::Parser;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::{StoreBackend, TollgateConfig};
use tollgate::error::{InvokeError, LimitKind};
use tollgate::interceptor::InterceptorPolicy;
use tollgate::pipeline::{MockChain, MockChainError};
use tollgate::ratelimit::{CounterStore, LimitRule, MemoryStore, TimeWindow};

/// Run a demo chain under request and token quotas.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Identifier the quotas are charged to
    #[arg(long, default_value = "u1")]
    identifier: String,

    /// Number of invocations to run
    #[arg(long, default_value_t = 11)]
    invocations: usize,

    /// Invocations run at the same time
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Input passed to the chain
    #[arg(long, default_value = "hello")]
    prompt: String,

    /// Prompt tokens the chain reports per call
    #[arg(long, default_value_t = 10)]
    prompt_tokens: u64,

    /// Completion tokens the chain reports per call
    #[arg(long, default_value_t = 20)]
    completion_tokens: u64,

    /// Use an in-process store regardless of configuration
    #[arg(long)]
    memory: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

/// How often the in-process store drops expired counters.
const MEMORY_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Tally {
    completed: usize,
    request_denied: usize,
    token_denied: usize,
    failed: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TollgateConfig::load(args.config.as_deref())?;
    if config.limits.request.is_none() && config.limits.token.is_none() {
        // No quotas configured: 10 requests per minute
        config.limits.request = Some(LimitRule {
            requests_per_unit: 10,
            unit: TimeWindow::Minute,
            units: 1,
            name: None,
        });
    }
    info!(backend = ?config.store.backend, "Configuration loaded");

    let store: Arc<dyn CounterStore> =
        if args.memory || config.store.backend == StoreBackend::Memory {
            let memory = Arc::new(MemoryStore::new());
            memory.spawn_cleanup(MEMORY_CLEANUP_INTERVAL);
            memory
        } else {
            config.store.build_store()?
        };
    let policy = InterceptorPolicy::from_config(&config, store)?;
    let chain = MockChain::new(args.prompt_tokens, args.completion_tokens);

    tokio::select! {
        tally = run(&policy, &chain, &args) => {
            info!(
                completed = tally.completed,
                request_denied = tally.request_denied,
                token_denied = tally.token_denied,
                failed = tally.failed,
                "All invocations finished"
            );
        }
        _ = shutdown_signal() => {}
    }

    info!("Tollgate stopped");
    Ok(())
}

async fn run(policy: &InterceptorPolicy, chain: &MockChain, args: &Args) -> Tally {
    let mut tally = Tally::default();
    let batch_size = args.concurrency.max(1);
    let mut started = 0;

    while started < args.invocations {
        let batch = batch_size.min(args.invocations - started);
        let calls = (0..batch).map(|offset| {
            let call = started + offset + 1;
            async move {
                let result = policy
                    .invoke(&args.identifier, || chain.invoke(&args.prompt))
                    .await;
                (call, result)
            }
        });

        for (call, result) in join_all(calls).await {
            record(&mut tally, call, result.map(|_| ()));
        }
        started += batch;
    }

    tally
}

fn record(tally: &mut Tally, call: usize, result: Result<(), InvokeError<MockChainError>>) {
    match result {
        Ok(()) => {
            info!(call = call, "Invocation completed");
            tally.completed += 1;
        }
        Err(err) => match err.quota_exceeded() {
            Some(quota) => {
                warn!(
                    call = call,
                    kind = %quota.kind,
                    reset_at = %quota.reset_at,
                    "Quota exceeded"
                );
                match quota.kind {
                    LimitKind::Request => tally.request_denied += 1,
                    LimitKind::Token => tally.token_denied += 1,
                }
            }
            None => {
                error!(call = call, error = %err, "Invocation failed");
                tally.failed += 1;
            }
        },
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
