use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use rocket::tokio::task;

use crate::error::MarketError;
use crate::settings::Settings;
use crate::validation::validate_email;

#[derive(Debug, Clone)]
struct SmtpConfig {
    host: String,
    port: u16,
    user: Option<String>,
    pass: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurchasedLink {
    pub title: String,
    pub url: String,
}

/// Sends order confirmations over SMTP. Without `SMTP_HOST` every send is
/// skipped with a log line.
#[derive(Debug, Clone)]
pub struct Mailer {
    smtp: Option<SmtpConfig>,
    from: String,
    link_validity_hours: i64,
}

impl Mailer {
    pub fn from_settings(settings: &Settings) -> Mailer {
        let smtp = settings
            .smtp_host
            .as_ref()
            .filter(|host| !host.trim().is_empty())
            .map(|host| SmtpConfig {
                host: host.clone(),
                port: settings.smtp_port,
                user: settings.smtp_user.clone(),
                pass: settings.smtp_pass.clone(),
            });

        Mailer {
            smtp,
            from: settings.smtp_from_email.clone(),
            link_validity_hours: settings.download_token_ttl_hours,
        }
    }

    pub fn order_confirmation(&self, order_id: i32, links: &[PurchasedLink]) -> (String, String) {
        let subject = format!("Your order #{} at Digital Marketplace", order_id);

        let mut body = format!(
            "Dear customer,\n\n\
             Thank you for your order #{} at Digital Marketplace!\n\n\
             Your order has been processed. Download links for your purchases:\n\n",
            order_id
        );
        if links.is_empty() {
            body.push_str("We could not find the products of this order.\n");
        }
        for (i, link) in links.iter().enumerate() {
            body.push_str(&format!(
                "{}. {}: {} (link valid for {} hours)\n",
                i + 1,
                link.title,
                link.url,
                self.link_validity_hours
            ));
        }
        body.push_str("\nBest regards,\nThe Digital Marketplace team");

        (subject, body)
    }

    pub fn send(&self, to: &str, subject: &str, body: String) -> Result<(), MarketError> {
        let smtp = match &self.smtp {
            Some(smtp) => smtp,
            None => {
                tracing::info!(%to, "SMTP_HOST is not set, skipping email");
                return Ok(());
            }
        };

        let from: Mailbox = self
            .from
            .parse()
            .map_err(|err| MarketError::Mail(format!("invalid sender address: {}", err)))?;
        let to_box: Mailbox = to
            .parse()
            .map_err(|err| MarketError::Mail(format!("invalid recipient address: {}", err)))?;

        let message = Message::builder()
            .from(from)
            .to(to_box)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|err| MarketError::Mail(err.to_string()))?;

        // Local catchers such as mailhog speak plain SMTP.
        let builder = if smtp.host == "mailhog" || smtp.host == "localhost" {
            SmtpTransport::builder_dangerous(&smtp.host)
        } else {
            SmtpTransport::starttls_relay(&smtp.host)
                .map_err(|err| MarketError::Mail(err.to_string()))?
        };
        let builder = builder.port(smtp.port);
        let builder = match (&smtp.user, &smtp.pass) {
            (Some(user), Some(pass)) => {
                builder.credentials(Credentials::new(user.clone(), pass.clone()))
            }
            _ => builder,
        };

        builder
            .build()
            .send(&message)
            .map(|_| ())
            .map_err(|err| MarketError::Mail(err.to_string()))
    }

    /// Fire-and-forget: the confirmation is sent on a blocking worker and a
    /// failure only shows up in the log.
    pub fn dispatch_order_confirmation(&self, to: String, order_id: i32, links: Vec<PurchasedLink>) {
        if let Err(err) = validate_email(&to) {
            tracing::warn!(%to, error = %err, "not sending order confirmation to invalid address");
            return;
        }

        let mailer = self.clone();
        task::spawn_blocking(move || {
            let (subject, body) = mailer.order_confirmation(order_id, &links);
            match mailer.send(&to, &subject, body) {
                Ok(()) => tracing::info!(order_id, %to, "order confirmation sent"),
                Err(err) => {
                    tracing::error!(order_id, %to, error = %err, "order confirmation failed")
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::tests::settings_from;

    #[test]
    fn unconfigured_mailer_skips_sending() {
        let mailer = Mailer::from_settings(&settings_from(&[]));

        assert!(mailer.smtp.is_none());
        assert!(mailer
            .send("buyer@example.com", "subject", "body".to_string())
            .is_ok());
    }

    #[test]
    fn blank_smtp_host_counts_as_unset() {
        let mailer = Mailer::from_settings(&settings_from(&[("SMTP_HOST", " ")]));
        assert!(mailer.smtp.is_none());
    }

    #[test]
    fn confirmation_lists_numbered_links() {
        let mailer = Mailer::from_settings(&settings_from(&[("SMTP_HOST", "mailhog")]));
        let links = vec![
            PurchasedLink {
                title: "Synth presets".to_string(),
                url: "http://localhost:8000/download/aa".to_string(),
            },
            PurchasedLink {
                title: "Font pack".to_string(),
                url: "http://localhost:8000/download/bb".to_string(),
            },
        ];

        let (subject, body) = mailer.order_confirmation(17, &links);

        assert_eq!(subject, "Your order #17 at Digital Marketplace");
        assert!(body.contains("order #17"));
        assert!(body.contains(
            "1. Synth presets: http://localhost:8000/download/aa (link valid for 24 hours)"
        ));
        assert!(body.contains("2. Font pack: http://localhost:8000/download/bb"));
        assert!(body.ends_with("The Digital Marketplace team"));
    }

    #[test]
    fn confirmation_without_products_says_so() {
        let mailer = Mailer::from_settings(&settings_from(&[]));
        let (_, body) = mailer.order_confirmation(3, &[]);
        assert!(body.contains("could not find the products"));
    }
}
