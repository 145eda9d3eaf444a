//! One-time verification codes
//!
//! [`CodeStore`] keeps at most one unverified code per (business, phone)
//! pair and enforces both the resend interval and the verification attempt
//! quota inside atomic store scripts. [`CodeService`] generates the codes and
//! hands them to the SMS pipeline.

use std::sync::Arc;
use std::time::Duration;

use common::{KvStore, Script, StoreError};
use rand::Rng;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::sms::{SmsError, SmsMessage, SmsPipeline};

/// SMS template used for login codes
pub const CODE_TEMPLATE_ID: &str = "1877556";

/// Verification code configuration
#[derive(Debug, Clone)]
pub struct CodeConfig {
    /// Lifetime of an issued code
    pub ttl: Duration,
    /// Minimum delay between two sends for the same key
    pub resend_interval: Duration,
    /// Verification attempts allowed per issued code
    pub max_verify_attempts: u32,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            resend_interval: Duration::from_secs(60),
            max_verify_attempts: 3,
        }
    }
}

/// Verification code errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodeError {
    /// A code was sent too recently for this key
    #[error("verification code sent too frequently")]
    SendTooMany,

    /// The attempt quota of the current code is exhausted
    #[error("too many verification attempts")]
    VerifyTooMany,

    /// No code exists, it was never sent, already used, or expired
    #[error("verification code expired")]
    Expired,

    /// A code key exists without an expiry
    #[error("verification code exists without an expiry")]
    Inconsistent,

    /// The script answered with a value outside its contract
    #[error("unexpected verification code reply: {0}")]
    UnexpectedReply(i64),

    #[error("verification code store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to deliver verification code: {0}")]
    Delivery(#[from] SmsError),
}

/// Store for verification code operations
#[derive(Clone)]
pub struct CodeStore {
    store: Arc<dyn KvStore>,
    config: CodeConfig,
}

impl CodeStore {
    pub fn new(store: Arc<dyn KvStore>, config: CodeConfig) -> Self {
        Self { store, config }
    }

    fn key(biz: &str, phone: &str) -> String {
        format!("{}_code:{}:{}", biz, biz, phone)
    }

    /// Store `code` for the pair unless one was sent within the resend interval
    pub async fn send(&self, biz: &str, phone: &str, code: &str) -> Result<(), CodeError> {
        let args = [
            code.to_string(),
            self.config.ttl.as_secs().to_string(),
            self.config.resend_interval.as_secs().to_string(),
        ];
        let reply = self
            .store
            .eval(Script::SetCode, &[Self::key(biz, phone)], &args)
            .await?;

        match reply {
            0 => Ok(()),
            -1 => Err(CodeError::SendTooMany),
            -2 => {
                error!("Verification code for {} in {} has no expiry", phone, biz);
                Err(CodeError::Inconsistent)
            }
            other => Err(CodeError::UnexpectedReply(other)),
        }
    }

    /// Check `input` against the stored code, consuming it on success
    ///
    /// A mismatch is `Ok(false)`; a missing code is [`CodeError::Expired`].
    pub async fn verify(&self, biz: &str, phone: &str, input: &str) -> Result<bool, CodeError> {
        let args = [
            input.to_string(),
            self.config.max_verify_attempts.to_string(),
        ];
        let reply = self
            .store
            .eval(Script::VerifyCode, &[Self::key(biz, phone)], &args)
            .await?;

        match reply {
            0 => Ok(true),
            -1 => Err(CodeError::VerifyTooMany),
            -2 => Ok(false),
            -3 => Err(CodeError::Expired),
            other => Err(CodeError::UnexpectedReply(other)),
        }
    }
}

/// Issues codes and delivers them by SMS
#[derive(Clone)]
pub struct CodeService {
    codes: CodeStore,
    sms: SmsPipeline,
}

impl CodeService {
    pub fn new(codes: CodeStore, sms: SmsPipeline) -> Self {
        Self { codes, sms }
    }

    fn generate() -> String {
        format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
    }

    /// Generate, store and deliver a fresh code
    pub async fn send(&self, biz: &str, phone: &str) -> Result<(), CodeError> {
        let code = Self::generate();
        self.codes.send(biz, phone, &code).await?;

        let message = SmsMessage {
            template_id: CODE_TEMPLATE_ID.to_string(),
            args: vec![code],
            numbers: vec![phone.to_string()],
        };
        self.sms.send(&message).await?;
        info!("Verification code sent for {}", biz);
        Ok(())
    }

    /// Verify a code previously sent to `phone`
    pub async fn verify(&self, biz: &str, phone: &str, input: &str) -> Result<bool, CodeError> {
        let result = self.codes.verify(biz, phone, input).await;
        if let Err(CodeError::VerifyTooMany) = &result {
            warn!("Verification attempts exhausted for {} in {}", phone, biz);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sms::{SmsSender, LogSender};
    use async_trait::async_trait;
    use common::memory::MemoryStore;
    use std::sync::Mutex;

    fn store() -> (Arc<MemoryStore>, CodeStore) {
        let memory = Arc::new(MemoryStore::new());
        let codes = CodeStore::new(memory.clone(), CodeConfig::default());
        (memory, codes)
    }

    #[test]
    fn test_key_is_business_scoped() {
        assert_eq!(
            CodeStore::key("login", "13800138000"),
            "login_code:login:13800138000"
        );
    }

    #[test]
    fn test_generated_codes_have_six_digits() {
        for _ in 0..100 {
            let code = CodeService::generate();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_send_then_resend_too_soon() {
        let (memory, codes) = store();
        codes.send("login", "1", "123456").await.unwrap();
        assert_eq!(
            codes.send("login", "1", "654321").await,
            Err(CodeError::SendTooMany)
        );
        // the first code is still the one that verifies
        assert_eq!(codes.verify("login", "1", "123456").await, Ok(true));
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_send_on_key_without_expiry_is_inconsistent() {
        let (memory, codes) = store();
        memory.set("login_code:login:1", "123456", None).await.unwrap();
        assert_eq!(
            codes.send("login", "1", "654321").await,
            Err(CodeError::Inconsistent)
        );
    }

    #[tokio::test]
    async fn test_verify_is_one_shot() {
        let (_, codes) = store();
        codes.send("login", "1", "123456").await.unwrap();
        assert_eq!(codes.verify("login", "1", "123456").await, Ok(true));
        assert_eq!(
            codes.verify("login", "1", "123456").await,
            Err(CodeError::Expired)
        );
    }

    #[tokio::test]
    async fn test_wrong_code_is_not_an_error() {
        let (_, codes) = store();
        codes.send("login", "1", "123456").await.unwrap();
        assert_eq!(codes.verify("login", "1", "000000").await, Ok(false));
    }

    #[tokio::test]
    async fn test_verify_locks_out_after_max_attempts() {
        let (_, codes) = store();
        codes.send("login", "1", "123456").await.unwrap();
        for _ in 0..3 {
            assert_eq!(codes.verify("login", "1", "000000").await, Ok(false));
        }
        assert_eq!(
            codes.verify("login", "1", "123456").await,
            Err(CodeError::VerifyTooMany)
        );
    }

    #[tokio::test]
    async fn test_never_sent_is_expired() {
        let (_, codes) = store();
        assert_eq!(
            codes.verify("login", "1", "123456").await,
            Err(CodeError::Expired)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resend_after_interval_resets_attempts() {
        let (_, codes) = store();
        codes.send("login", "1", "123456").await.unwrap();
        for _ in 0..4 {
            let _ = codes.verify("login", "1", "000000").await;
        }
        assert_eq!(
            codes.verify("login", "1", "123456").await,
            Err(CodeError::VerifyTooMany)
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        codes.send("login", "1", "777777").await.unwrap();
        assert_eq!(codes.verify("login", "1", "777777").await, Ok(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_expires_after_ttl() {
        let (_, codes) = store();
        codes.send("login", "1", "123456").await.unwrap();
        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(
            codes.verify("login", "1", "123456").await,
            Err(CodeError::Expired)
        );
    }

    #[derive(Default)]
    struct CapturingSender {
        sent: Mutex<Vec<SmsMessage>>,
    }

    #[async_trait]
    impl SmsSender for CapturingSender {
        async fn send(&self, message: &SmsMessage) -> Result<(), SmsError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_service_delivers_the_stored_code() {
        let (_, codes) = store();
        let sender = Arc::new(CapturingSender::default());
        let service = CodeService::new(codes, SmsPipeline::builder().deliver(sender.clone()));

        service.send("login", "13800138000").await.unwrap();
        let message = sender.sent.lock().unwrap()[0].clone();
        assert_eq!(message.template_id, CODE_TEMPLATE_ID);
        assert_eq!(message.numbers, vec!["13800138000".to_string()]);

        let code = &message.args[0];
        assert_eq!(service.verify("login", "13800138000", code).await, Ok(true));
    }

    #[tokio::test]
    async fn test_service_does_not_deliver_when_send_rejected() {
        let (_, codes) = store();
        let service = CodeService::new(
            codes,
            SmsPipeline::builder().trace().deliver(Arc::new(LogSender)),
        );
        service.send("login", "1").await.unwrap();
        assert_eq!(
            service.send("login", "1").await,
            Err(CodeError::SendTooMany)
        );
    }
}
