//! Digest rendering and SMTP delivery
//!
//! The HTML body is rendered once; each recipient then gets a fresh MIME
//! structure (`related { alternative { html }, inline png }`) addressed to
//! them alone — no shared To line, no BCC. A recipient failing all its
//! attempts never blocks the others; the send succeeds when at least one
//! recipient got the message.

use crate::config::EmailConfig;
use crate::error::{Error, Result};
use crate::models::{Digest, DigestItem};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

/// SMTP attempts per recipient
const SMTP_ATTEMPTS: u32 = 3;

/// Backoff cap between attempts
const MAX_BACKOFF_SECS: u64 = 30;

/// Per-recipient SMTP timeout
const SMTP_TIMEOUT_SECS: u64 = 30;

pub struct Notifier {
    config: EmailConfig,
}

impl Notifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Render and deliver the digest. `chart_png` is attached inline under
    /// `Content-ID: trend_chart` when present; the HTML only references the
    /// image when the part is actually attached. Returns `true` when at
    /// least one recipient received the message.
    pub async fn send_digest(&self, digest: &Digest, chart_png: Option<Vec<u8>>) -> Result<bool> {
        if self.config.to_addrs.is_empty() {
            tracing::warn!("No recipients configured");
            return Ok(false);
        }

        let html = render_digest(digest, chart_png.is_some());
        let subject = format!("AI Digest - {}", digest.date.format("%Y-%m-%d"));
        let transport = self.build_transport()?;

        let mut delivered = 0usize;
        for recipient in &self.config.to_addrs {
            match self
                .send_to_recipient(&transport, recipient, &subject, &html, chart_png.as_deref())
                .await
            {
                Ok(()) => {
                    delivered += 1;
                    tracing::info!(recipient = %recipient, "Digest delivered");
                }
                Err(e) => {
                    tracing::error!(
                        recipient = %recipient,
                        attempts = SMTP_ATTEMPTS,
                        error = %e,
                        "Digest delivery failed"
                    );
                }
            }
        }

        tracing::info!(
            delivered,
            total = self.config.to_addrs.len(),
            top_picks = digest.top_picks.len(),
            "Digest send complete"
        );
        Ok(delivered > 0)
    }

    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if self.config.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
        }
        .map_err(|e| Error::Notifier(format!("SMTP transport: {}", e)))?;

        Ok(builder
            .port(self.config.smtp_port)
            .credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ))
            .timeout(Some(Duration::from_secs(SMTP_TIMEOUT_SECS)))
            .build())
    }

    /// Build a fresh message for one recipient and send with retries.
    async fn send_to_recipient(
        &self,
        transport: &AsyncSmtpTransport<Tokio1Executor>,
        recipient: &str,
        subject: &str,
        html: &str,
        chart_png: Option<&[u8]>,
    ) -> Result<()> {
        let message = self.build_message(recipient, subject, html, chart_png)?;

        let mut last_error = None;
        for attempt in 0..SMTP_ATTEMPTS {
            match transport.send(message.clone()).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        recipient = %recipient,
                        attempt = attempt + 1,
                        error = %e,
                        "SMTP attempt failed"
                    );
                    last_error = Some(e);
                    if attempt + 1 < SMTP_ATTEMPTS {
                        let wait = 2u64.saturating_pow(attempt).min(MAX_BACKOFF_SECS);
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                    }
                }
            }
        }
        Err(Error::Notifier(format!(
            "all {} attempts failed: {}",
            SMTP_ATTEMPTS,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn build_message(
        &self,
        recipient: &str,
        subject: &str,
        html: &str,
        chart_png: Option<&[u8]>,
    ) -> Result<Message> {
        let from = format!("{} <{}>", self.config.from_name, self.config.from_addr)
            .parse()
            .map_err(|e| Error::Notifier(format!("invalid from address: {}", e)))?;
        let to = recipient
            .parse()
            .map_err(|e| Error::Notifier(format!("invalid recipient {}: {}", recipient, e)))?;

        let alternative = MultiPart::alternative().singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(html.to_string()),
        );

        let body = match chart_png {
            Some(png) => MultiPart::related().multipart(alternative).singlepart(
                Attachment::new_inline("trend_chart".to_string()).body(
                    png.to_vec(),
                    "image/png".parse().expect("static content type"),
                ),
            ),
            None => MultiPart::related().multipart(alternative),
        };

        Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(body)
            .map_err(|e| Error::Notifier(format!("message build: {}", e)))
    }
}

/// Escape text for HTML interpolation.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render the digest HTML. All dynamic text passes through
/// [`escape_html`] before interpolation. The `cid:trend_chart` image is
/// referenced only when `has_chart` says the inline part will be attached.
pub fn render_digest(digest: &Digest, has_chart: bool) -> String {
    let date = digest.date.format("%Y-%m-%d");

    let mut top_html = String::new();
    for (i, item) in digest.top_picks.iter().enumerate() {
        top_html.push_str(&render_top_pick(i + 1, item));
    }

    let mut quick_html = String::new();
    for item in &digest.quick_reads {
        quick_html.push_str(&render_quick_read(item));
    }
    let quick_section = if quick_html.is_empty() {
        String::new()
    } else {
        format!(
            r#"<div style="background:#ffffff;padding:20px;border-radius:12px;">
  <h2 style="font-size:18px;color:#1f2937;margin:0 0 15px 0;">Quick reads</h2>
  <table style="width:100%;border-collapse:collapse;">{}</table>
</div>"#,
            quick_html
        )
    };

    let chart_section = if has_chart {
        r#"<div style="text-align:center;margin-bottom:24px;"><img src="cid:trend_chart" alt="Hot entity trends" style="max-width:100%;"/></div>"#.to_string()
    } else {
        String::new()
    };
    let trends_section = render_trends(&digest.trends);

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"><meta name="viewport" content="width=device-width, initial-scale=1.0"></head>
<body style="font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,sans-serif;max-width:700px;margin:0 auto;padding:20px;background:#f9fafb;">
  <div style="text-align:center;margin-bottom:24px;">
    <h1 style="margin:0;font-size:28px;color:#1f2937;">AI Digest</h1>
    <p style="color:#6b7280;margin:8px 0 0 0;">{date}</p>
    <p style="color:#374151;margin:12px 0 0 0;">{summary}</p>
  </div>
  <div style="display:flex;justify-content:center;gap:15px;margin-bottom:24px;">
    <div style="background:#ffffff;padding:12px 22px;border-radius:10px;text-align:center;">
      <div style="font-size:22px;font-weight:bold;color:#3b82f6;">{fetched}</div>
      <div style="font-size:12px;color:#6b7280;">fetched</div>
    </div>
    <div style="background:#ffffff;padding:12px 22px;border-radius:10px;text-align:center;">
      <div style="font-size:22px;font-weight:bold;color:#10b981;">{analyzed}</div>
      <div style="font-size:12px;color:#6b7280;">analyzed</div>
    </div>
    <div style="background:#ffffff;padding:12px 22px;border-radius:10px;text-align:center;">
      <div style="font-size:22px;font-weight:bold;color:#8b5cf6;">{picked}</div>
      <div style="font-size:12px;color:#6b7280;">featured</div>
    </div>
  </div>
  {chart}
  {trends}
  <div style="margin-bottom:32px;">
    <h2 style="font-size:20px;color:#1f2937;margin-bottom:16px;">Top picks</h2>
    {top}
  </div>
  {quick}
  <div style="text-align:center;margin-top:32px;color:#9ca3af;font-size:13px;">
    <p>Generated automatically by Briefwire</p>
  </div>
</body>
</html>"#,
        date = date,
        summary = escape_html(&digest.daily_summary),
        fetched = digest.totals.fetched,
        analyzed = digest.totals.analyzed,
        picked = digest.top_picks.len(),
        chart = chart_section,
        trends = trends_section,
        top = top_html,
        quick = quick_section,
    )
}

/// The hot-entity trend strip: one pill per entity with its mention count
/// and direction over the window.
fn render_trends(trends: &[crate::models::DigestTrend]) -> String {
    if trends.is_empty() {
        return String::new();
    }
    let pills = trends
        .iter()
        .map(|t| {
            let (marker, color) = match t.trend.as_str() {
                "up" => ("&#9650;", "#10b981"),
                "down" => ("&#9660;", "#ef4444"),
                "new" => ("&#9733;", "#8b5cf6"),
                _ => ("&#9644;", "#6b7280"),
            };
            let delta = if t.trend == "new" {
                "new".to_string()
            } else {
                format!("{:+.0}%", t.change_pct)
            };
            format!(
                r#"<span style="display:inline-block;background:#ffffff;border-radius:16px;padding:6px 12px;margin:3px;font-size:13px;color:#1f2937;">{name} <span style="color:{color};">{marker} {count} ({delta})</span></span>"#,
                name = escape_html(&t.entity_name),
                color = color,
                marker = marker,
                count = t.recent_count,
                delta = delta,
            )
        })
        .collect::<Vec<_>>()
        .join("");
    format!(
        r#"<div style="text-align:center;margin-bottom:24px;">
  <h2 style="font-size:16px;color:#1f2937;margin:0 0 10px 0;">Trending entities</h2>
  {}
</div>"#,
        pills
    )
}

fn render_top_pick(rank: usize, item: &DigestItem) -> String {
    let tags = if item.tags.is_empty() {
        String::new()
    } else {
        format!(
            r#"<span style="background:rgba(255,255,255,0.15);padding:2px 8px;border-radius:4px;font-size:11px;">{}</span>"#,
            escape_html(&item.tags.join(", "))
        )
    };
    let reasoning = if item.reasoning.is_empty() {
        String::new()
    } else {
        format!(
            r#"<div style="margin-top:10px;padding:10px;background:rgba(255,255,255,0.1);border-radius:8px;font-size:13px;">{}</div>"#,
            escape_html(&item.reasoning)
        )
    };
    let analysis = if item.analysis.is_empty() {
        String::new()
    } else {
        format!(
            r#"<p style="margin:8px 0 0 0;font-size:13px;opacity:0.85;">{}</p>"#,
            escape_html(&item.analysis)
        )
    };

    format!(
        r#"<div style="margin-bottom:20px;padding:20px;background:linear-gradient(135deg,#667eea 0%,#764ba2 100%);border-radius:12px;color:#ffffff;">
  <div style="margin-bottom:10px;">
    <span style="background:rgba(255,255,255,0.2);padding:4px 12px;border-radius:20px;font-size:12px;">#{rank}</span>
    <span style="background:rgba(255,255,255,0.2);padding:4px 12px;border-radius:20px;font-size:12px;">{score:.1}</span>
    {tags}
  </div>
  <h3 style="margin:0 0 8px 0;font-size:18px;"><a href="{url}" style="color:#ffffff;text-decoration:none;">{title}</a></h3>
  <p style="margin:0;font-size:14px;opacity:0.9;">{summary}</p>
  {analysis}
  <div style="font-size:12px;opacity:0.8;margin-top:8px;">{source}{event_time}</div>
  {reasoning}
</div>"#,
        rank = rank,
        score = item.score,
        tags = tags,
        url = escape_html(&item.url),
        title = escape_html(&item.title),
        summary = escape_html(&item.summary),
        analysis = analysis,
        source = escape_html(&item.source_name),
        event_time = if item.event_time.is_empty() {
            String::new()
        } else {
            format!(" &middot; {}", escape_html(&item.event_time))
        },
        reasoning = reasoning,
    )
}

fn render_quick_read(item: &DigestItem) -> String {
    format!(
        r#"<tr style="border-bottom:1px solid #e5e7eb;">
  <td style="padding:10px 0;">
    <a href="{url}" style="color:#1f2937;text-decoration:none;font-weight:500;">{title}</a>
    <div style="color:#6b7280;font-size:13px;margin-top:4px;">{summary}</div>
  </td>
  <td style="padding:10px 0;text-align:center;width:70px;"><span style="color:#3b82f6;font-weight:bold;">{score:.1}</span></td>
  <td style="padding:10px 0;color:#6b7280;font-size:13px;width:110px;">{source}</td>
</tr>"#,
        url = escape_html(&item.url),
        title = escape_html(&item.title),
        summary = escape_html(&item.summary),
        score = item.score,
        source = escape_html(&item.source_name),
    )
}
