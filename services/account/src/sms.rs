//! SMS delivery pipeline
//!
//! Cross-cutting concerns around sending a message are explicit stages run
//! in the order they were added: rate limiting, tracing, observation, and
//! finally delivery through a driver.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{Instrument, error, info, info_span, warn};

use crate::limiter::{Limiter, LimiterError};

/// SMS errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SmsError {
    /// The outbound rate limit was reached
    #[error("SMS sending is rate limited")]
    Limited,

    /// The limiter could not give a verdict
    #[error("SMS rate limiter failed: {0}")]
    Limiter(#[from] LimiterError),

    /// The provider did not answer in time
    #[error("SMS provider timed out")]
    Timeout,

    /// The provider rejected the message
    #[error("SMS provider error: {0}")]
    Provider(String),

    /// Every provider of a failover group failed
    #[error("all SMS providers failed")]
    AllProvidersFailed,

    /// The pipeline was assembled without a delivery stage
    #[error("SMS pipeline has no delivery stage")]
    NoDelivery,
}

/// A templated message to one or more numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsMessage {
    pub template_id: String,
    pub args: Vec<String>,
    pub numbers: Vec<String>,
}

/// SMS delivery driver
#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Deliver a message
    async fn send(&self, message: &SmsMessage) -> Result<(), SmsError>;
}

/// Driver used in development: writes the message to the log
#[derive(Debug, Clone, Default)]
pub struct LogSender;

#[async_trait]
impl SmsSender for LogSender {
    async fn send(&self, message: &SmsMessage) -> Result<(), SmsError> {
        info!(
            "SMS template {} to {:?} with args {:?}",
            message.template_id, message.numbers, message.args
        );
        Ok(())
    }
}

/// Round-robin failover across providers
///
/// Each send starts from the next provider in turn and moves on when one
/// fails. A timeout stops the rotation, since the message may still arrive.
pub struct FailoverSender {
    providers: Vec<Arc<dyn SmsSender>>,
    idx: AtomicUsize,
}

impl FailoverSender {
    pub fn new(providers: Vec<Arc<dyn SmsSender>>) -> Self {
        Self {
            providers,
            idx: AtomicUsize::new(0),
        }
    }

    /// Build a failover group from configured driver names, in order
    pub fn from_names(names: &[String]) -> Result<Self, SmsError> {
        if names.is_empty() {
            return Err(SmsError::Provider("no SMS providers configured".to_string()));
        }
        let providers = names
            .iter()
            .map(|name| match name.as_str() {
                "log" => Ok(Arc::new(LogSender) as Arc<dyn SmsSender>),
                other => Err(SmsError::Provider(format!("unknown SMS provider: {}", other))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(providers))
    }
}

#[async_trait]
impl SmsSender for FailoverSender {
    async fn send(&self, message: &SmsMessage) -> Result<(), SmsError> {
        let start = self.idx.fetch_add(1, Ordering::Relaxed);
        let len = self.providers.len();
        for offset in 0..len {
            let provider = &self.providers[(start + offset) % len];
            match provider.send(message).await {
                Ok(()) => return Ok(()),
                Err(SmsError::Timeout) => return Err(SmsError::Timeout),
                Err(e) => warn!("SMS provider failed, trying next: {}", e),
            }
        }
        Err(SmsError::AllProvidersFailed)
    }
}

/// One step of the pipeline
#[derive(Clone)]
pub enum Stage {
    /// Reject the message when the limiter says so
    Limit {
        limiter: Arc<dyn Limiter>,
        key: String,
    },
    /// Run the remaining stages inside a tracing span
    Trace,
    /// Log the duration and outcome of the remaining stages
    Observe,
    /// Hand the message to a driver; always the last stage
    Deliver(Arc<dyn SmsSender>),
}

/// Send duration per template, in seconds
pub const SMS_SEND_DURATION_SECONDS: &str = "sms_send_duration_seconds";
/// Sends per template and result
pub const SMS_SEND_TOTAL: &str = "sms_send_total";

fn record_send(template_id: &str, elapsed: Duration, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    histogram!(SMS_SEND_DURATION_SECONDS, "tpl_id" => template_id.to_string())
        .record(elapsed.as_secs_f64());
    counter!(SMS_SEND_TOTAL, "tpl_id" => template_id.to_string(), "result" => result)
        .increment(1);
}

type StageFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SmsError>> + Send + 'a>>;

/// Ordered SMS pipeline
#[derive(Clone)]
pub struct SmsPipeline {
    stages: Vec<Stage>,
}

impl SmsPipeline {
    /// Start an empty pipeline
    pub fn builder() -> SmsPipelineBuilder {
        SmsPipelineBuilder { stages: Vec::new() }
    }

    /// Send a message through every stage
    pub async fn send(&self, message: &SmsMessage) -> Result<(), SmsError> {
        self.run(0, message).await
    }

    fn run<'a>(&'a self, idx: usize, message: &'a SmsMessage) -> StageFuture<'a> {
        Box::pin(async move {
            match self.stages.get(idx) {
                Some(Stage::Limit { limiter, key }) => {
                    if limiter.limit(key).await? {
                        warn!("SMS limiter {} rejected a message", key);
                        return Err(SmsError::Limited);
                    }
                    self.run(idx + 1, message).await
                }
                Some(Stage::Trace) => {
                    let span = info_span!("sms.send", template = %message.template_id);
                    self.run(idx + 1, message).instrument(span).await
                }
                Some(Stage::Observe) => {
                    let started = Instant::now();
                    let result = self.run(idx + 1, message).await;
                    let elapsed = started.elapsed();
                    record_send(&message.template_id, elapsed, result.is_ok());

                    let elapsed_ms = elapsed.as_millis() as u64;
                    match &result {
                        Ok(()) => info!(elapsed_ms, "SMS sent"),
                        Err(e) => error!(elapsed_ms, "SMS failed: {}", e),
                    }
                    result
                }
                Some(Stage::Deliver(sender)) => sender.send(message).await,
                None => Err(SmsError::NoDelivery),
            }
        })
    }
}

/// Builder that keeps stages in insertion order
pub struct SmsPipelineBuilder {
    stages: Vec<Stage>,
}

impl SmsPipelineBuilder {
    pub fn limit(mut self, limiter: Arc<dyn Limiter>, key: impl Into<String>) -> Self {
        self.stages.push(Stage::Limit {
            limiter,
            key: key.into(),
        });
        self
    }

    pub fn trace(mut self) -> Self {
        self.stages.push(Stage::Trace);
        self
    }

    pub fn observe(mut self) -> Self {
        self.stages.push(Stage::Observe);
        self
    }

    /// Finish the pipeline with its delivery driver
    pub fn deliver(mut self, sender: Arc<dyn SmsSender>) -> SmsPipeline {
        self.stages.push(Stage::Deliver(sender));
        SmsPipeline {
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::MockLimiter;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<SmsMessage>>,
        fail_with: Option<SmsError>,
    }

    #[async_trait]
    impl SmsSender for RecordingSender {
        async fn send(&self, message: &SmsMessage) -> Result<(), SmsError> {
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn message() -> SmsMessage {
        SmsMessage {
            template_id: "1877556".to_string(),
            args: vec!["123456".to_string()],
            numbers: vec!["13800138000".to_string()],
        }
    }

    #[tokio::test]
    async fn test_limited_message_never_reaches_driver() {
        let mut limiter = MockLimiter::new();
        limiter.expect_limit().returning(|_| Ok(true));
        let sender = Arc::new(RecordingSender::default());

        let pipeline = SmsPipeline::builder()
            .limit(Arc::new(limiter), "sms-limiter")
            .trace()
            .observe()
            .deliver(sender.clone());

        assert_eq!(pipeline.send(&message()).await, Err(SmsError::Limited));
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_admitted_message_is_delivered() {
        let mut limiter = MockLimiter::new();
        limiter
            .expect_limit()
            .withf(|key| key == "sms-limiter")
            .times(1)
            .returning(|_| Ok(false));
        let sender = Arc::new(RecordingSender::default());

        let pipeline = SmsPipeline::builder()
            .limit(Arc::new(limiter), "sms-limiter")
            .deliver(sender.clone());

        pipeline.send(&message()).await.unwrap();
        assert_eq!(sender.sent.lock().unwrap().as_slice(), &[message()]);
    }

    #[tokio::test]
    async fn test_limiter_error_is_not_reported_as_limited() {
        let mut limiter = MockLimiter::new();
        limiter
            .expect_limit()
            .returning(|_| Err(LimiterError::UnexpectedReply(7)));
        let pipeline = SmsPipeline::builder()
            .limit(Arc::new(limiter), "sms-limiter")
            .deliver(Arc::new(LogSender));

        assert_eq!(
            pipeline.send(&message()).await,
            Err(SmsError::Limiter(LimiterError::UnexpectedReply(7)))
        );
    }

    #[tokio::test]
    async fn test_failover_moves_past_broken_provider() {
        let broken = Arc::new(RecordingSender {
            fail_with: Some(SmsError::Provider("quota".to_string())),
            ..Default::default()
        });
        let healthy = Arc::new(RecordingSender::default());
        let failover = FailoverSender::new(vec![broken, healthy.clone()]);

        failover.send(&message()).await.unwrap();
        failover.send(&message()).await.unwrap();
        assert_eq!(healthy.sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failover_from_names() {
        let failover = FailoverSender::from_names(&["log".to_string(), "log".to_string()]).unwrap();
        assert_eq!(failover.providers.len(), 2);

        assert!(matches!(
            FailoverSender::from_names(&["carrier-pigeon".to_string()]),
            Err(SmsError::Provider(_))
        ));
        assert!(FailoverSender::from_names(&[]).is_err());
    }

    #[test]
    fn test_observe_records_duration_and_result() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let failing = Arc::new(RecordingSender {
            fail_with: Some(SmsError::Provider("down".to_string())),
            ..Default::default()
        });

        metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let ok = SmsPipeline::builder()
                    .observe()
                    .deliver(Arc::new(RecordingSender::default()));
                ok.send(&message()).await.unwrap();

                let broken = SmsPipeline::builder().observe().deliver(failing);
                assert!(broken.send(&message()).await.is_err());
            });
        });

        let mut durations = 0;
        let mut results = Vec::new();
        for (key, _, _, value) in snapshotter.snapshot().into_vec() {
            let key = key.key();
            let label = |name: &str| {
                key.labels()
                    .find(|l| l.key() == name)
                    .map(|l| l.value().to_string())
            };
            assert_eq!(label("tpl_id").as_deref(), Some("1877556"));
            match (key.name(), value) {
                (SMS_SEND_DURATION_SECONDS, DebugValue::Histogram(samples)) => {
                    durations += samples.len();
                }
                (SMS_SEND_TOTAL, DebugValue::Counter(count)) => {
                    results.push((label("result").unwrap_or_default(), count));
                }
                (name, _) => panic!("unexpected metric {}", name),
            }
        }
        results.sort();
        assert_eq!(durations, 2);
        assert_eq!(
            results,
            vec![("error".to_string(), 1), ("ok".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_failover_stops_on_timeout() {
        let slow = Arc::new(RecordingSender {
            fail_with: Some(SmsError::Timeout),
            ..Default::default()
        });
        let healthy = Arc::new(RecordingSender::default());
        let failover = FailoverSender::new(vec![slow, healthy.clone()]);

        assert_eq!(failover.send(&message()).await, Err(SmsError::Timeout));
        assert!(healthy.sent.lock().unwrap().is_empty());
    }
}
