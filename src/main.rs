use anyhow::{bail, Context, Result};
use hostwatch::bot::ControlBot;
use hostwatch::bus::{durable_name, BusClient, Publisher, RetryPolicy, Subscription, SubscriptionConfig};
use hostwatch::config::AppConfig;
use hostwatch::host::{CommandSessionController, CommandStateReader};
use hostwatch::notify::telegram::DEFAULT_API_URL;
use hostwatch::notify::{LogNotifier, Notifier, TelegramApi, TelegramNotifier};
use hostwatch::pipeline::{ControlIssuer, ControlReceiver, PresenceAgent, PresenceRelay};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

const USAGE: &str = "usage: hostwatch <agent|notifier|locker|bot|issue ACTION [TARGET] [ACTOR]>";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hostwatch=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let role = match args.first() {
        Some(role) => role.as_str(),
        None => bail!(USAGE),
    };

    let config = AppConfig::from_env().context("Failed to load configuration")?;

    info!(role = %role, bus = %config.bus.url, "hostwatch starting...");

    match role {
        "agent" => run_agent(config).await,
        "notifier" => run_notifier(config).await,
        "locker" => run_locker(config).await,
        "bot" => run_bot(config).await,
        "issue" => run_issue(config, &args[1..]).await,
        other => bail!("unknown role '{}'\n{}", other, USAGE),
    }
}

/// Stop signal flipped on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
        let _ = stop_tx.send(true);
    });
    stop_rx
}

fn subscription_config(config: &AppConfig) -> SubscriptionConfig {
    SubscriptionConfig {
        poll_timeout: Duration::from_millis(config.consumer.poll_timeout_ms),
    }
}

fn build_notifier(config: &AppConfig) -> Result<Box<dyn Notifier>> {
    match TelegramNotifier::from_config(&config.telegram)? {
        Some(notifier) => Ok(Box::new(notifier)),
        None => {
            warn!("Telegram is not configured, notifications go to the log only");
            Ok(Box::new(LogNotifier))
        }
    }
}

async fn run_agent(config: AppConfig) -> Result<()> {
    let identity = config.host_identity()?;
    let reader = config
        .host
        .state_reader_command
        .as_deref()
        .and_then(CommandStateReader::from_command_line)
        .context("A state reader command is required (set STATE_READER_CMD or host.state_reader_command)")?;

    let client = BusClient::connect(config.bus.clone()).await?;
    client.ensure_stream(&config.topics.presence).await?;

    let retry = RetryPolicy {
        max_attempts: config.agent.publish_attempts.max(1),
        ..RetryPolicy::default()
    };
    let publisher = Publisher::new(client.transport()).with_retry(retry);

    let agent = PresenceAgent::new(reader, publisher, config.topics.presence.as_str(), identity)
        .with_interval(Duration::from_secs(config.agent.poll_interval_seconds))
        .with_flush_timeout(Duration::from_secs(config.agent.flush_timeout_seconds));

    agent.run(shutdown_signal()).await;
    client.close().await;
    Ok(())
}

async fn run_notifier(config: AppConfig) -> Result<()> {
    let client = BusClient::connect(config.bus.clone()).await?;
    client.ensure_stream(&config.topics.presence).await?;

    let messages = client
        .subscribe(&config.topics.presence, &config.consumer.notifier_group)
        .await?;
    let subscription = Subscription::new(
        config.topics.presence.as_str(),
        Box::pin(messages),
        shutdown_signal(),
        subscription_config(&config),
    );

    PresenceRelay::new(build_notifier(&config)?).run(subscription).await;
    client.close().await;
    Ok(())
}

async fn run_locker(config: AppConfig) -> Result<()> {
    let identity = config.host_identity()?;

    let client = BusClient::connect(config.bus.clone()).await?;
    client.ensure_stream(&config.topics.control).await?;

    // One durable per host so every host sees every command
    let durable = durable_name(&config.consumer.control_group, identity.as_str());
    let messages = client.subscribe(&config.topics.control, &durable).await?;
    let subscription = Subscription::new(
        config.topics.control.as_str(),
        Box::pin(messages),
        shutdown_signal(),
        subscription_config(&config),
    );

    let controller = CommandSessionController::new(&config.host.lock_command, &config.host.wake_command);
    let receiver = ControlReceiver::new(identity, controller, build_notifier(&config)?);
    receiver.run(subscription).await;

    client.close().await;
    Ok(())
}

async fn run_bot(config: AppConfig) -> Result<()> {
    let token = config
        .telegram
        .token()
        .context("A bot token is required (set TELEGRAM_BOT_TOKEN or telegram.bot_token)")?;
    let api = TelegramApi::new(DEFAULT_API_URL, token)?;

    let client = BusClient::connect(config.bus.clone()).await?;
    client.ensure_stream(&config.topics.control).await?;

    let issuer = ControlIssuer::new(
        Publisher::new(client.transport()),
        config.topics.control.as_str(),
        config.control.allowed_actors.clone(),
    );
    let bot = ControlBot::new(
        api,
        issuer,
        config.telegram.bot_title.as_str(),
        config.control.default_target.as_str(),
    )
    .with_long_poll(Duration::from_secs(config.telegram.long_poll_seconds))
    .with_flush_timeout(Duration::from_secs(config.agent.flush_timeout_seconds));

    bot.run(shutdown_signal()).await;
    client.close().await;
    Ok(())
}

async fn run_issue(config: AppConfig, args: &[String]) -> Result<()> {
    let action = match args.first() {
        Some(action) => action.as_str(),
        None => bail!(USAGE),
    };
    let target = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| config.control.default_target.clone());
    let actor = args.get(2).cloned().unwrap_or_else(|| {
        format!("cli:{}", std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()))
    });

    let client = BusClient::connect(config.bus.clone()).await?;
    client.ensure_stream(&config.topics.control).await?;

    let issuer = ControlIssuer::new(
        Publisher::new(client.transport()),
        config.topics.control.as_str(),
        config.control.allowed_actors.clone(),
    );
    let command = issuer.issue(action, &target, &actor).await?;

    if !issuer
        .flush(Duration::from_secs(config.agent.flush_timeout_seconds))
        .await
    {
        warn!("Flush timed out before the bus confirmed delivery");
    }
    client.close().await;

    println!("sent {} to {}", command.action, target.trim());
    Ok(())
}
