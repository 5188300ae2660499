//! Alert sink that mails each event to a fixed operator address.

use crate::config::SmtpConf;
use crate::error::{ConnectorError, ConnectorResult};
use crate::resource::ResourceName;
use crate::sinks::AlertSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;

const PLACEHOLDER: &str = "None";
const IMPLICIT_TLS_PORT: u16 = 465;

/// Fields rendered into one alert mail.
#[derive(Debug, Clone)]
pub struct AlertMessage<'a> {
    pub location_id: &'a str,
    pub resource: ResourceName,
    pub timestamp: DateTime<Utc>,
    pub data_path: Option<&'a str>,
    pub content: Option<&'a str>,
}

impl AlertMessage<'_> {
    pub fn subject(&self) -> String {
        format!(
            "Gateway Message from {} - {}",
            self.location_id,
            self.resource.resource_type().as_str()
        )
    }

    pub fn body(&self) -> String {
        let message = match self.content.filter(|c| !c.is_empty()) {
            Some(content) => format!("follows. \n\n{}", content),
            None => PLACEHOLDER.to_string(),
        };
        format!(
            "Gateway Message content:\n\n\
             \tDevice:    {}\n\
             \tResource:  {}\n\
             \tTimeStamp: {}\n\
             \tData Path: {}\n\
             \tMessage:   {}",
            self.location_id,
            self.resource,
            self.timestamp.to_rfc3339(),
            self.data_path.unwrap_or(PLACEHOLDER),
            message,
        )
    }
}

pub struct SmtpClientConnector {
    conf: SmtpConf,
    location_id: String,
}

impl SmtpClientConnector {
    pub fn new(conf: SmtpConf, location_id: impl Into<String>) -> Self {
        Self {
            conf,
            location_id: location_id.into(),
        }
    }

    pub fn build_message(&self, alert: &AlertMessage<'_>) -> ConnectorResult<Message> {
        let from: Mailbox = self
            .conf
            .from
            .parse()
            .map_err(|e| ConnectorError::Mail(format!("Invalid from address: {}", e)))?;
        let to: Mailbox = self
            .conf
            .to
            .parse()
            .map_err(|e| ConnectorError::Mail(format!("Invalid to address: {}", e)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(alert.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(alert.body())
            .map_err(|e| ConnectorError::Mail(format!("Failed to build email: {}", e)))
    }

    fn transport(conf: &SmtpConf, timeout: Duration) -> ConnectorResult<SmtpTransport> {
        let builder = if conf.port == IMPLICIT_TLS_PORT {
            SmtpTransport::relay(&conf.host)
        } else {
            SmtpTransport::starttls_relay(&conf.host)
        }
        .map_err(|e| ConnectorError::Mail(format!("Invalid SMTP server: {}", e)))?;

        let mut builder = builder.port(conf.port).timeout(Some(timeout));
        if let (Some(user), Some(pass)) = (&conf.username, &conf.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl AlertSink for SmtpClientConnector {
    async fn send(
        &self,
        resource: ResourceName,
        payload: &str,
        timeout_secs: u64,
    ) -> ConnectorResult<()> {
        let data_path = resource.path();
        let alert = AlertMessage {
            location_id: &self.location_id,
            resource,
            timestamp: Utc::now(),
            data_path: Some(&data_path),
            content: Some(payload),
        };
        let email = self.build_message(&alert)?;
        let conf = self.conf.clone();
        let timeout = Duration::from_secs(timeout_secs.max(1));

        let task = tokio::task::spawn_blocking(move || {
            let mailer = Self::transport(&conf, timeout)?;
            mailer
                .send(&email)
                .map_err(|e| ConnectorError::Mail(format!("Failed to send email: {}", e)))?;
            Ok::<(), ConnectorError>(())
        });

        // the transport timeout covers each socket op; this bounds the whole exchange
        match tokio::time::timeout(timeout * 2, task).await {
            Ok(joined) => {
                joined.map_err(|e| ConnectorError::Mail(format!("Task join error: {}", e)))??;
                tracing::info!("Alert mail sent for {}", resource);
                Ok(())
            }
            Err(_) => Err(ConnectorError::Timeout(timeout_secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn alert<'a>(path: Option<&'a str>, content: Option<&'a str>) -> AlertMessage<'a> {
        AlertMessage {
            location_id: "gatewaydevice",
            resource: ResourceName::CdaSensorMsg,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            data_path: path,
            content,
        }
    }

    #[test]
    fn test_subject() {
        assert_eq!(
            alert(None, None).subject(),
            "Gateway Message from gatewaydevice - SensorMsg"
        );
    }

    #[test]
    fn test_body_with_placeholders() {
        let body = alert(None, Some("")).body();
        assert!(body.starts_with("Gateway Message content:\n\n"));
        assert!(body.contains("\tDevice:    gatewaydevice\n"));
        assert!(body.contains("\tResource:  PIOT/ConstrainedDevice/SensorMsg\n"));
        assert!(body.contains("\tTimeStamp: 2024-03-01T12:00:00+00:00\n"));
        assert!(body.contains("\tData Path: None\n"));
        assert!(body.ends_with("\tMessage:   None"));
        assert!(!body.contains("follows"));
    }

    #[test]
    fn test_body_with_content() {
        let body = alert(Some("/piot/cdasensormsg"), Some("{\"value\":1.0}")).body();
        assert!(body.contains("\tData Path: /piot/cdasensormsg\n"));
        assert!(body.ends_with("\tMessage:   follows. \n\n{\"value\":1.0}"));
    }

    #[test]
    fn test_message_addresses() {
        let conf = SmtpConf {
            from: "gateway@example.com".into(),
            to: "ops@example.com".into(),
            ..SmtpConf::default()
        };
        let connector = SmtpClientConnector::new(conf.clone(), "gatewaydevice");
        assert!(connector.build_message(&alert(None, None)).is_ok());

        let bad = SmtpConf {
            to: "not an address".into(),
            ..conf
        };
        let connector = SmtpClientConnector::new(bad, "gatewaydevice");
        assert!(matches!(
            connector.build_message(&alert(None, None)),
            Err(ConnectorError::Mail(_))
        ));
    }
}
