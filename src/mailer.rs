use std::{future::Future, time::Duration};

use async_trait::async_trait;
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use serde_json::Value;
use tracing::warn;

use crate::config::SmtpConfig;

const SEND_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Outbound notification sink. Delivery is best-effort: callers fire this from
/// a background task and only ever log a terminal failure.
#[async_trait]
pub trait MailSink: Send + Sync {
    async fn send(&self, recipient: &str, template: &str, data: &Value) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .timeout(Some(Duration::from_secs(5)));
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            sender: config.sender.parse()?,
        })
    }
}

#[async_trait]
impl MailSink for SmtpMailer {
    async fn send(&self, recipient: &str, template: &str, data: &Value) -> anyhow::Result<()> {
        let (subject, body) = render(template, data)?;
        let message = Message::builder()
            .from(self.sender.clone())
            .to(recipient.parse()?)
            .subject(subject)
            .body(body)?;

        with_retries(SEND_ATTEMPTS, RETRY_DELAY, |attempt| {
            let message = message.clone();
            async move {
                self.transport.send(message).await.map_err(|err| {
                    warn!(error = %err, attempt, recipient, "mail delivery attempt failed");
                    err
                })
            }
        })
        .await?;

        Ok(())
    }
}

/// Runs `op` up to `attempts` times, sleeping `delay` between attempts but not
/// after the last one.
async fn with_retries<T, E, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_err = None;
    for attempt in 1..=attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_err = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(last_err.expect("at least one attempt was made"))
}

fn render(template: &str, data: &Value) -> anyhow::Result<(String, String)> {
    let token = data["activation_token"].as_str().unwrap_or_default();

    match template {
        "user_welcome" => {
            let user_id = data["user_id"].as_i64().unwrap_or_default();
            let subject = "Welcome to Cinelist!".to_string();
            let body = format!(
                "Hi,\n\n\
                 Thanks for signing up for a Cinelist account. We're excited to have you \
                 on board!\n\n\
                 For future reference, your user ID number is {user_id}.\n\n\
                 Please send a request to the `PUT /v1/users/activated` endpoint with the \
                 following JSON body to activate your account:\n\n\
                 {{\"token\": \"{token}\"}}\n\n\
                 Please note that this is a one-time use token and it will expire in 3 days.\n\n\
                 Thanks,\n\
                 The Cinelist Team"
            );
            Ok((subject, body))
        }
        "token_activation" => {
            let subject = "Activate your Cinelist account".to_string();
            let body = format!(
                "Hi,\n\n\
                 Please send a request to the `PUT /v1/users/activated` endpoint with the \
                 following JSON body to activate your account:\n\n\
                 {{\"token\": \"{token}\"}}\n\n\
                 Please note that this is a one-time use token and it will expire in \
                 45 minutes.\n\n\
                 Thanks,\n\
                 The Cinelist Team"
            );
            Ok((subject, body))
        }
        other => anyhow::bail!("unknown mail template: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn welcome_template_includes_token_and_user_id() {
        let data = json!({"activation_token": "ABC123", "user_id": 7});
        let (subject, body) = render("user_welcome", &data).unwrap();
        assert!(subject.contains("Welcome"));
        assert!(body.contains("ABC123"));
        assert!(body.contains("your user ID number is 7"));
    }

    #[test]
    fn activation_template_includes_token() {
        let data = json!({"activation_token": "XYZ789"});
        let (_, body) = render("token_activation", &data).unwrap();
        assert!(body.contains("XYZ789"));
        assert!(body.contains("45 minutes"));
    }

    #[test]
    fn unknown_template_is_an_error() {
        assert!(render("password_reset", &json!({})).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_do_not_sleep_after_the_final_attempt() {
        let attempts = std::cell::Cell::new(0u32);
        let start = tokio::time::Instant::now();

        let result: Result<(), &str> = with_retries(SEND_ATTEMPTS, RETRY_DELAY, |_| {
            attempts.set(attempts.get() + 1);
            async { Err("smtp down") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.get(), SEND_ATTEMPTS);
        // Two sleeps between three attempts, none trailing the last failure.
        assert_eq!(start.elapsed(), RETRY_DELAY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn a_later_attempt_can_succeed() {
        let attempts = std::cell::Cell::new(0u32);

        let result: Result<u32, &str> = with_retries(SEND_ATTEMPTS, RETRY_DELAY, |attempt| {
            attempts.set(attempts.get() + 1);
            async move {
                if attempt < 3 {
                    Err("smtp down")
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(attempts.get(), 3);
    }
}
