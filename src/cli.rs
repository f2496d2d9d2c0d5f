use crate::config::Config;
use crate::error::GuardResult;
use crate::keys::RateAction;
use crate::service::AccessGuard;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "slotguard", version, about = "Operate locks, OTP challenges, rate windows and cached counters")]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ping the store
    Health,
    #[command(subcommand)]
    Lock(LockCommand),
    #[command(subcommand)]
    Otp(OtpCommand),
    #[command(subcommand)]
    Counter(CounterCommand),
    #[command(subcommand)]
    Limit(LimitCommand),
}

#[derive(Debug, Subcommand)]
pub enum LockCommand {
    Acquire {
        resource: String,
        #[arg(long)]
        ttl: Option<u64>,
        #[arg(long)]
        token: Option<String>,
    },
    Release {
        resource: String,
        #[arg(long)]
        token: Option<String>,
    },
    AcquireMany {
        #[arg(required = true)]
        resources: Vec<String>,
        #[arg(long)]
        ttl: Option<u64>,
    },
    ReleaseMany {
        #[arg(required = true)]
        resources: Vec<String>,
        #[arg(long)]
        token: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum OtpCommand {
    Issue {
        phone: String,
        #[arg(long, default_value = "en")]
        locale: String,
    },
    Verify { phone: String, code: String },
    Invalidate { phone: String },
}

#[derive(Debug, Subcommand)]
pub enum CounterCommand {
    Set {
        resource: String,
        quantity: i64,
        /// Seconds; defaults to the cache policy
        #[arg(long)]
        ttl: Option<u64>,
    },
    Get { resource: String },
    Delta {
        resource: String,
        #[arg(allow_negative_numbers = true)]
        delta: i64,
    },
}

#[derive(Debug, Subcommand)]
pub enum LimitCommand {
    Check {
        subject: String,
        action: String,
        #[arg(long)]
        limit: u32,
        /// Window length in seconds
        #[arg(long)]
        window: u64,
    },
    Reset { subject: String, action: String },
}

/// Runs one command and returns its JSON result.
pub async fn execute(guard: &AccessGuard, command: Command) -> GuardResult<Value> {
    match command {
        Command::Health => Ok(serde_json::to_value(guard.health_check().await)?),
        Command::Lock(cmd) => lock(guard, cmd).await,
        Command::Otp(cmd) => otp(guard, cmd).await,
        Command::Counter(cmd) => counter(guard, cmd).await,
        Command::Limit(cmd) => limit(guard, cmd).await,
    }
}

async fn lock(guard: &AccessGuard, command: LockCommand) -> GuardResult<Value> {
    let default_ttl = guard.policies().lock.ttl.as_secs();
    let locks = guard.locks();
    match command {
        LockCommand::Acquire { resource, ttl, token } => {
            let ttl = ttl.unwrap_or(default_ttl);
            let record = match token {
                Some(token) => locks
                    .acquire(&resource, ttl, Some(token.clone()))
                    .await?
                    .then_some(json!({ "key": resource, "token": token, "ttl_seconds": ttl })),
                None => locks
                    .acquire_owned(&resource, ttl)
                    .await?
                    .map(serde_json::to_value)
                    .transpose()?,
            };
            Ok(json!({ "acquired": record.is_some(), "lock": record }))
        }
        LockCommand::Release { resource, token } => {
            let released = locks.release(&resource, token.as_deref()).await?;
            Ok(json!({ "released": released }))
        }
        LockCommand::AcquireMany { resources, ttl } => {
            let outcome = locks
                .acquire_multiple(&resources, ttl.unwrap_or(default_ttl))
                .await?;
            Ok(serde_json::to_value(outcome)?)
        }
        LockCommand::ReleaseMany { resources, token } => {
            let released = locks.release_multiple(&resources, &token).await?;
            Ok(json!({ "released": released }))
        }
    }
}

async fn otp(guard: &AccessGuard, command: OtpCommand) -> GuardResult<Value> {
    let challenges = guard.challenges();
    match command {
        OtpCommand::Issue { phone, locale } => {
            challenges.issue(&phone, &locale).await?;
            Ok(json!({ "issued": true }))
        }
        OtpCommand::Verify { phone, code } => {
            let verification = challenges.verify(&phone, &code).await?;
            Ok(json!({ "ok": true, "subject": verification.subject }))
        }
        OtpCommand::Invalidate { phone } => {
            let removed = challenges.invalidate(&phone).await?;
            Ok(json!({ "invalidated": removed }))
        }
    }
}

async fn counter(guard: &AccessGuard, command: CounterCommand) -> GuardResult<Value> {
    let counter = guard.counter();
    match command {
        CounterCommand::Set { resource, quantity, ttl } => {
            counter
                .set(&resource, quantity, ttl.map(Duration::from_secs))
                .await?;
            Ok(json!({ "resource": resource, "quantity": quantity }))
        }
        CounterCommand::Get { resource } => {
            let quantity = counter.require(&resource).await?;
            Ok(json!({ "resource": resource, "quantity": quantity }))
        }
        CounterCommand::Delta { resource, delta } => {
            let quantity = counter.apply_delta(&resource, delta).await?;
            Ok(json!({ "resource": resource, "quantity": quantity, "cache_hit": quantity.is_some() }))
        }
    }
}

async fn limit(guard: &AccessGuard, command: LimitCommand) -> GuardResult<Value> {
    let limiter = guard.limiter();
    match command {
        LimitCommand::Check { subject, action, limit, window } => {
            let decision = limiter
                .check(&subject, &RateAction::from(action.as_str()), limit, Duration::from_secs(window))
                .await?;
            Ok(serde_json::to_value(decision)?)
        }
        LimitCommand::Reset { subject, action } => {
            let cleared = limiter.reset(&subject, &RateAction::from(action.as_str())).await?;
            Ok(json!({ "cleared": cleared }))
        }
    }
}
