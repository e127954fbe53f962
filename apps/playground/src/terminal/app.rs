use std::sync::Arc;
use std::time::Duration;

use playground_proto::{RepositoryDetails, SessionConfiguration, WorkspaceConfiguration};
use playground_sdk::{cancellable, resolve_base_url, Environment, PlaygroundClient, SdkError};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use transport_bus::BusTransport;

use crate::config::AppConfig;
use crate::connect::{Discoverer, FnListener, Instance};
use crate::lifecycle::{LifecycleContext, LifecycleEvent, LifecycleRunner, LifecycleState};
use crate::recovery::{
    DeployOutcome, Endpoint, HttpProbe, Probe, RecoveryLoop, SessionTarget, Tracked,
    WorkspaceTarget, DEFAULT_PROBE_TIMEOUT,
};
use crate::relay::RelayHub;
use crate::terminal::cli::{
    Cli, Command, DeployArgs, DiscoverArgs, RelayArgs, TargetArgs, WorkspaceCommand,
    WorkspaceDeployArgs,
};
use crate::terminal::error::CliError;

pub async fn run(cli: Cli, config: AppConfig) -> Result<(), CliError> {
    let env = match cli.env.as_deref() {
        Some(env) => env.parse()?,
        None => config.environment()?,
    };
    let base_url = resolve_base_url(
        env,
        cli.base_url.as_deref().or(config.base_url.as_deref()),
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target = "playground.cli", "interrupted");
            interrupt.cancel();
        }
    });

    let ctx = Context {
        env,
        base_url,
        config,
        cancel,
    };
    match cli.command {
        Command::Deploy(args) => deploy_session(&ctx, args).await,
        Command::Watch(args) => watch_session(&ctx, args).await,
        Command::Stop(args) => stop_session(&ctx, args).await,
        Command::Workspace(WorkspaceCommand::Deploy(args)) => deploy_workspace(&ctx, args).await,
        Command::Discover(args) => discover(&ctx, args).await,
        Command::Relay(args) => relay(&ctx, args).await,
    }
}

struct Context {
    env: Environment,
    base_url: String,
    config: AppConfig,
    cancel: CancellationToken,
}

impl Context {
    fn client(&self) -> Result<Arc<PlaygroundClient>, CliError> {
        debug!(target = "playground.cli", env = %self.env, base_url = %self.base_url, "backend client");
        let client = PlaygroundClient::new(self.base_url.clone(), self.config.request_timeout())?;
        Ok(Arc::new(client))
    }

    fn probe(&self) -> Result<HttpProbe, CliError> {
        HttpProbe::new(DEFAULT_PROBE_TIMEOUT).map_err(|err| CliError::Backend(SdkError::from(err)))
    }

    /// Host deployments are served under, when the backend tells us.
    async fn host(&self, client: &PlaygroundClient) -> Option<String> {
        match cancellable(&self.cancel, client.get_details()).await {
            Ok(details) => Some(details.env.host),
            Err(err) => {
                debug!(target = "playground.cli", error = %err, "details unavailable");
                None
            }
        }
    }

    async fn recovery<T: Tracked>(
        &self,
        client: &PlaygroundClient,
        target: T,
    ) -> Result<RecoveryLoop<T, HttpProbe>, CliError> {
        let recovery = RecoveryLoop::new(target, self.probe()?, self.cancel.clone());
        Ok(match self.host(client).await {
            Some(host) => recovery.with_host(host),
            None => recovery,
        })
    }
}

async fn deploy_session(ctx: &Context, args: DeployArgs) -> Result<(), CliError> {
    let client = ctx.client()?;
    let target = SessionTarget::new(client.clone(), args.session.clone());
    let recovery = ctx.recovery(&client, target).await?;
    let conf = SessionConfiguration {
        duration: args.duration,
        ..SessionConfiguration::for_template(args.template)
    };
    let outcome = recovery.deploy(conf).await?;
    let endpoint = settle(outcome, args.replace).await?;
    report(&endpoint);
    Ok(())
}

async fn watch_session(ctx: &Context, args: TargetArgs) -> Result<(), CliError> {
    let client = ctx.client()?;
    let target = SessionTarget::new(client.clone(), args.session);
    let endpoint = ctx.recovery(&client, target).await?.watch().await?;
    report(&endpoint);
    Ok(())
}

async fn deploy_workspace(ctx: &Context, args: WorkspaceDeployArgs) -> Result<(), CliError> {
    let client = ctx.client()?;
    let target = WorkspaceTarget::new(client.clone(), args.workspace.clone());
    let recovery = ctx.recovery(&client, target).await?;
    let conf = WorkspaceConfiguration {
        repository_details: RepositoryDetails {
            id: args.repository,
            reference: args.reference,
        },
        duration: None,
    };
    let outcome = recovery.deploy(conf).await?;
    let endpoint = settle(outcome, args.replace).await?;
    report(&endpoint);
    Ok(())
}

async fn settle<T: Tracked, P: Probe>(
    outcome: DeployOutcome<T, P>,
    replace: bool,
) -> Result<Endpoint, CliError> {
    match outcome {
        DeployOutcome::Started(endpoint) => Ok(endpoint),
        DeployOutcome::Conflict(conflict) if replace => Ok(conflict.replace().await?),
        DeployOutcome::Conflict(conflict) => Err(CliError::Conflict {
            kind: conflict.target().kind(),
            id: conflict.target().id().to_string(),
            phase: conflict.existing().phase(),
        }),
    }
}

fn report(endpoint: &Endpoint) {
    println!("{} ({})", endpoint.url, endpoint.state.phase());
}

async fn stop_session(ctx: &Context, args: TargetArgs) -> Result<(), CliError> {
    let client = ctx.client()?;
    let mut runner = LifecycleRunner::new(
        client,
        LifecycleContext::new(args.session.clone(), None),
        ctx.cancel.clone(),
    );

    let state = runner.start().await?;
    if state == LifecycleState::Failed {
        return Err(stop_failure(&runner, &args.session));
    }
    if runner.context().instance.is_none() {
        println!("no session {}", args.session);
        return Ok(());
    }

    match runner.dispatch(LifecycleEvent::Stop).await? {
        LifecycleState::Failed => Err(stop_failure(&runner, &args.session)),
        _ => {
            println!("session {} stopped", args.session);
            Ok(())
        }
    }
}

fn stop_failure<B: playground_sdk::Backend + ?Sized>(
    runner: &LifecycleRunner<B>,
    id: &str,
) -> CliError {
    CliError::Stop {
        id: id.to_string(),
        reason: runner
            .context()
            .error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string()),
    }
}

async fn discover(ctx: &Context, args: DiscoverArgs) -> Result<(), CliError> {
    let url = args
        .relay
        .or_else(|| ctx.config.relay_url.clone())
        .ok_or_else(|| {
            CliError::InvalidArgument("pass --relay or set PLAYGROUND__RELAY_URL".into())
        })?;
    let bus = Arc::new(BusTransport::relay(&url).await?);
    let listener = FnListener::new(
        |instance: &Arc<Instance<BusTransport>>| {
            info!(target = "playground.cli", instance = %instance.uuid(), "instance appeared");
        },
        |uuid: &str| {
            info!(target = "playground.cli", instance = %uuid, "instance left");
        },
    );
    let discoverer = Discoverer::with_timeout(bus, listener, ctx.config.channel_timeout())?;

    tokio::select! {
        _ = ctx.cancel.cancelled() => {}
        _ = tokio::time::sleep(Duration::from_millis(args.wait_ms)) => {}
    }
    discoverer.close();

    let mut instances = discoverer.instances();
    instances.sort_by(|a, b| a.uuid().cmp(b.uuid()));
    if instances.is_empty() {
        println!("no instances found");
    }
    for instance in instances {
        println!("{}\t{}", instance.uuid(), instance.url().unwrap_or("-"));
        if args.actions {
            match instance.list_actions(None).await {
                Ok(actions) => println!("  actions: {actions}"),
                Err(err) => println!("  actions unavailable ({}): {err}", err.kind()),
            }
        }
    }
    Ok(())
}

async fn relay(ctx: &Context, args: RelayArgs) -> Result<(), CliError> {
    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    let addr = listener.local_addr()?;
    println!("relay listening on ws://{addr}/ws");
    info!(target = "playground.relay", %addr, "relay hub started");

    let cancel = ctx.cancel.clone();
    RelayHub::new()
        .serve(listener, async move { cancel.cancelled().await })
        .await?;
    info!(target = "playground.relay", "relay hub stopped");
    Ok(())
}
