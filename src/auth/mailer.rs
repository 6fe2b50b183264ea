//! Asynchronous email dispatch.
//!
//! Request handlers hand messages to [`Mailer::dispatch`], which never
//! blocks: messages go onto a bounded queue drained by one background worker.
//! The worker hands each message to an [`EmailSender`] on the blocking pool
//! and retries failures with exponential backoff and jitter until
//! `max_attempts` is reached. Outcomes are counted in [`MailerStats`]; a full
//! queue drops the message and counts it.
//!
//! [`LogEmailSender`] only logs and is the default for local development.
//! [`SmtpEmailSender`] delivers through an SMTP relay.

use anyhow::{Context, Result};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{error, info, warn};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Email delivery abstraction used by the dispatch worker.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to have it retried.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the message instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.html_body,
            "email send stub"
        );
        Ok(())
    }
}

pub struct SmtpEmailSender {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpEmailSender {
    /// # Errors
    ///
    /// Returns an error if the sender address or relay host is invalid.
    pub fn new(
        host: &str,
        port: u16,
        username: Option<String>,
        password: Option<SecretString>,
        from: &str,
    ) -> Result<Self> {
        let from: Mailbox = from.parse().context("invalid sender address")?;
        let mut builder = SmtpTransport::relay(host)
            .with_context(|| format!("invalid SMTP relay {host}"))?
            .port(port);
        if let (Some(username), Some(password)) = (username, password) {
            builder = builder.credentials(Credentials::new(
                username,
                password.expose_secret().to_string(),
            ));
        }
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

impl EmailSender for SmtpEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        let email = lettre::Message::builder()
            .from(self.from.clone())
            .to(message
                .to
                .parse::<Mailbox>()
                .context("invalid recipient address")?)
            .subject(&message.subject)
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone())
            .context("failed to build email")?;
        self.transport.send(&email).context("SMTP delivery failed")?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MailerConfig {
    queue_capacity: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl MailerConfig {
    /// Default: 1024 queued messages, 5 attempts, 1s->60s exponential backoff
    /// with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue_capacity: 1024,
            max_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let backoff_max = self.backoff_max.max(self.backoff_base);
        Self {
            queue_capacity: self.queue_capacity.max(1),
            max_attempts: self.max_attempts.max(1),
            backoff_base: self.backoff_base,
            backoff_max,
        }
    }
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct MailerStats {
    queued: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct MailerStatsSnapshot {
    pub queued: u64,
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl MailerStats {
    #[must_use]
    pub fn snapshot(&self) -> MailerStatsSnapshot {
        MailerStatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Mailer {
    tx: mpsc::Sender<EmailMessage>,
    stats: Arc<MailerStats>,
}

impl Mailer {
    /// Spawn the dispatch worker. It runs until every `Mailer` clone is dropped.
    #[must_use]
    pub fn spawn(sender: Arc<dyn EmailSender>, config: MailerConfig) -> (Self, JoinHandle<()>) {
        let config = config.normalize();
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let stats = Arc::new(MailerStats::default());
        let worker = tokio::spawn(run_worker(rx, sender, config, stats.clone()));
        (Self { tx, stats }, worker)
    }

    /// Queue a message without waiting for delivery. Returns `false` when the
    /// message was dropped.
    pub fn dispatch(&self, message: EmailMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(message)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(to = %message.to, "email queue full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                error!(to = %message.to, "email worker stopped, message dropped");
                false
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> MailerStatsSnapshot {
        self.stats.snapshot()
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<EmailMessage>,
    sender: Arc<dyn EmailSender>,
    config: MailerConfig,
    stats: Arc<MailerStats>,
) {
    while let Some(message) = rx.recv().await {
        deliver(&sender, &message, &config, &stats).await;
    }
}

async fn deliver(
    sender: &Arc<dyn EmailSender>,
    message: &EmailMessage,
    config: &MailerConfig,
    stats: &MailerStats,
) {
    for attempt in 1..=config.max_attempts {
        let task_sender = sender.clone();
        let task_message = message.clone();
        let result = tokio::task::spawn_blocking(move || task_sender.send(&task_message))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|result| result);

        match result {
            Ok(()) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(err) if attempt < config.max_attempts => {
                let delay = backoff_delay(attempt, config.backoff_base, config.backoff_max);
                warn!(to = %message.to, attempt, ?delay, "email delivery failed, retrying: {err}");
                sleep(delay).await;
            }
            Err(err) => {
                error!(to = %message.to, attempt, "email delivery failed permanently: {err}");
            }
        }
    }
    stats.failed.fetch_add(1, Ordering::Relaxed);
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    jitter_delay(delay.min(max))
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}
