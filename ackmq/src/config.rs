use std::{path::PathBuf, time::Duration};

use ackmq_broker::{
    AcknowledgeMode, BrokerOptions, ConcurrencyRange, Credentials, ListenerContainerConfig,
};
use ackmq_models::{
    core::Destination,
    errors::{RuntimeError, SendableError},
};
use ackmq_policy::{MaximumDelay, RedeliveryPolicy};
use clap::{ArgAction, Parser, ValueEnum};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AckMode {
    Auto,
    Individual,
}

impl From<AckMode> for AcknowledgeMode {
    fn from(mode: AckMode) -> Self {
        match mode {
            AckMode::Auto => AcknowledgeMode::Auto,
            AckMode::Individual => AcknowledgeMode::Individual,
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Port the producer endpoints listen on
    #[arg(long, env = "ACKMQ_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Broker to connect to; only vm:// and memory:// brokers run in process
    #[arg(long, env = "ACKMQ_BROKER_URL", default_value = "vm://localhost")]
    pub broker_url: String,

    #[arg(long, env = "ACKMQ_USER")]
    pub user: Option<String>,

    #[arg(long, env = "ACKMQ_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    #[arg(long, default_value = "ackmq.queue")]
    pub queue_name: String,

    #[arg(long, default_value = "ackmq.topic")]
    pub topic_name: String,

    /// Producer connections kept in the pool
    #[arg(long, default_value_t = 100)]
    pub max_pool_connections: usize,

    #[arg(long, default_value_t = 10)]
    pub max_redeliveries: u32,

    #[arg(long, default_value_t = 1)]
    pub initial_redelivery_delay_ms: u64,

    #[arg(long, default_value_t = 2.0)]
    pub backoff_multiplier: f64,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub use_exponential_backoff: bool,

    /// Upper bound for redelivery delays, -1 for none
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub maximum_redelivery_delay_ms: i64,

    /// Listener workers per subscription, as `min-max`
    #[arg(long, default_value = "1-10")]
    pub concurrency: ConcurrencyRange,

    #[arg(long, value_enum, default_value_t = AckMode::Individual)]
    pub acknowledge_mode: AckMode,

    /// Redelivery delay used when a listener crashes
    #[arg(long, default_value_t = 1000)]
    pub recovery_interval_ms: u64,

    /// Attempts the queue listener rejects before acknowledging a message
    #[arg(long, default_value_t = 3)]
    pub fail_first: u32,

    /// File the log is mirrored to; pass an empty value to log to stdout only
    #[arg(long, default_value = "output.log")]
    pub log_file: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub broker: BrokerOptions,
    pub queue: Destination,
    pub topic: Destination,
    pub policy: RedeliveryPolicy,
    pub container: ListenerContainerConfig,
    pub fail_first: u32,
    pub log_file: Option<PathBuf>,
}

impl TryFrom<CliArgs> for Config {
    type Error = SendableError;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let policy = RedeliveryPolicy::new(
            args.max_redeliveries,
            Duration::from_millis(args.initial_redelivery_delay_ms),
            args.backoff_multiplier,
            args.use_exponential_backoff,
            MaximumDelay::from_millis(args.maximum_redelivery_delay_ms),
        )
        .map_err(|err| RuntimeError::boxed("ackmq.config.policy", err))?;

        let credentials = args
            .user
            .filter(|user| !user.trim().is_empty())
            .map(|user| Credentials {
                user,
                password: args.password,
            });

        Ok(Config {
            port: args.port,
            broker: BrokerOptions {
                url: args.broker_url,
                credentials,
                max_connections: args.max_pool_connections,
            },
            queue: Destination::queue(args.queue_name),
            topic: Destination::topic(args.topic_name),
            policy,
            container: ListenerContainerConfig {
                concurrency: args.concurrency,
                acknowledge_mode: args.acknowledge_mode.into(),
                recovery_interval: Duration::from_millis(args.recovery_interval_ms),
                max_redeliveries: args.max_redeliveries,
            },
            fail_first: args.fail_first,
            log_file: Some(args.log_file)
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
        })
    }
}

pub fn parse_config() -> Result<Config, SendableError> {
    Config::try_from(CliArgs::parse())
}
