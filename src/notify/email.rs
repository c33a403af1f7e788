use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{format_plain, MentionEvent, Notifier};
use crate::config::EmailConfig;

pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
    utc_offset_hours: i32,
}

impl EmailNotifier {
    pub fn new(cfg: &EmailConfig, utc_offset_hours: i32) -> Result<Self> {
        let creds = Credentials::new(cfg.username.clone(), cfg.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)
            .with_context(|| format!("invalid smtp_host {}", cfg.smtp_host))?
            .port(cfg.smtp_port)
            .credentials(creds)
            .build();

        let from = cfg
            .from
            .parse()
            .with_context(|| format!("invalid from address {}", cfg.from))?;
        let to = cfg
            .to
            .iter()
            .map(|a| a.parse().with_context(|| format!("invalid recipient {a}")))
            .collect::<Result<Vec<Mailbox>>>()?;

        Ok(Self {
            mailer,
            from,
            to,
            utc_offset_hours,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, ev: &MentionEvent) -> Result<()> {
        let subject = format!("New {} mention: {}", ev.platform, ev.permalink);
        let body = format_plain(ev, self.utc_offset_hours);

        let mut builder = Message::builder().from(self.from.clone());
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        let msg = builder
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }
}
