use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use healthsync_core::mailbox::{EmailAttachment, MailboxError, MailboxSource};

use crate::auth::GmailCredentials;

const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Gmail REST client. Async internally; exposed to the synchronous sync
/// driver through [`MailboxSource`] by blocking on the runtime handle.
pub struct GmailClient {
    client: reqwest::Client,
    creds: tokio::sync::Mutex<GmailCredentials>,
    rt: tokio::runtime::Handle,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    labels: Option<Vec<Label>>,
}

#[derive(Debug, Deserialize)]
struct Label {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    messages: Option<Vec<MessageRef>>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Message {
    /// Milliseconds since epoch, as a string.
    internal_date: Option<String>,
    payload: Option<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    filename: Option<String>,
    body: Option<PartBody>,
    parts: Option<Vec<MessagePart>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    attachment_id: Option<String>,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    data: Option<String>,
}

impl GmailClient {
    pub fn new(creds: GmailCredentials) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "healthsync-cli/{} (health data sync)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            creds: tokio::sync::Mutex::new(creds),
            rt: tokio::runtime::Handle::current(),
        }
    }

    async fn bearer(&self) -> Result<String, MailboxError> {
        let mut creds = self.creds.lock().await;
        creds
            .access_token(&self.client)
            .await
            .map_err(|e| MailboxError::Auth(format!("{e:#}")))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, MailboxError> {
        let token = self.bearer().await?;
        let resp = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| MailboxError::Fetch(format!("failed to reach Gmail: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(MailboxError::Auth(format!(
                "Gmail rejected the token ({status})"
            )));
        }
        if !status.is_success() {
            return Err(MailboxError::Fetch(format!(
                "Gmail returned status {status}"
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| MailboxError::Fetch(format!("malformed Gmail response: {e}")))
    }

    async fn label_id(&self, label: &str) -> Result<Option<String>, MailboxError> {
        let list: LabelList = self.get_json(&format!("{API_BASE}/labels"), &[]).await?;
        Ok(list
            .labels
            .unwrap_or_default()
            .into_iter()
            .find(|l| l.name == label)
            .map(|l| l.id))
    }

    pub async fn fetch_attachments_async(
        &self,
        label: &str,
        since: NaiveDate,
    ) -> Result<Vec<EmailAttachment>, MailboxError> {
        let Some(label_id) = self.label_id(label).await? else {
            eprintln!("Note: Gmail label '{label}' not found; nothing to fetch");
            return Ok(Vec::new());
        };

        let query = format!("after:{}", since.format("%Y/%m/%d"));
        let list: MessageList = self
            .get_json(
                &format!("{API_BASE}/messages"),
                &[("labelIds", label_id.as_str()), ("q", query.as_str())],
            )
            .await?;

        let mut attachments = Vec::new();
        for msg_ref in list.messages.unwrap_or_default() {
            let msg: Message = self
                .get_json(
                    &format!("{API_BASE}/messages/{}", msg_ref.id),
                    &[("format", "full")],
                )
                .await?;

            let message_date = msg
                .internal_date
                .as_deref()
                .and_then(|ms| ms.parse::<i64>().ok())
                .and_then(DateTime::<Utc>::from_timestamp_millis);

            let Some(payload) = msg.payload else { continue };
            let mut csv_parts = Vec::new();
            collect_csv_parts(&payload, &mut csv_parts);

            for (filename, body) in csv_parts {
                let raw = match (&body.data, &body.attachment_id) {
                    (Some(data), _) => data.clone(),
                    (None, Some(att_id)) => {
                        let att: AttachmentBody = self
                            .get_json(
                                &format!("{API_BASE}/messages/{}/attachments/{att_id}", msg_ref.id),
                                &[],
                            )
                            .await?;
                        match att.data {
                            Some(data) => data,
                            None => continue,
                        }
                    }
                    (None, None) => continue,
                };

                let data = decode_attachment(&raw).map_err(|e| {
                    MailboxError::Fetch(format!("undecodable attachment '{filename}': {e}"))
                })?;
                attachments.push(EmailAttachment {
                    filename,
                    message_date,
                    data,
                });
            }
        }

        Ok(attachments)
    }
}

impl MailboxSource for GmailClient {
    fn fetch_attachments(
        &self,
        label: &str,
        since: NaiveDate,
    ) -> Result<Vec<EmailAttachment>, MailboxError> {
        self.rt.block_on(self.fetch_attachments_async(label, since))
    }
}

/// Walk a (possibly nested) MIME tree collecting `.csv` attachment parts.
fn collect_csv_parts<'a>(part: &'a MessagePart, out: &mut Vec<(String, &'a PartBody)>) {
    if let (Some(filename), Some(body)) = (&part.filename, &part.body) {
        if filename.to_lowercase().ends_with(".csv") {
            out.push((filename.clone(), body));
        }
    }
    for child in part.parts.iter().flatten() {
        collect_csv_parts(child, out);
    }
}

/// Gmail serves attachments as url-safe base64, sometimes unpadded.
fn decode_attachment(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE
        .decode(raw)
        .or_else(|_| URL_SAFE_NO_PAD.decode(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_attachment_padded_and_not() {
        let padded = URL_SAFE.encode(b"Date,Calories\n");
        assert_eq!(decode_attachment(&padded).unwrap(), b"Date,Calories\n");

        let unpadded = URL_SAFE_NO_PAD.encode(b"Date,Calories\n");
        assert_eq!(decode_attachment(&unpadded).unwrap(), b"Date,Calories\n");

        assert!(decode_attachment("not base64!!").is_err());
    }

    #[test]
    fn test_collect_csv_parts_nested() {
        let tree = MessagePart {
            filename: Some(String::new()),
            body: None,
            parts: Some(vec![
                MessagePart {
                    filename: Some("WeeklySummary.csv".to_string()),
                    body: Some(PartBody {
                        attachment_id: Some("att-1".to_string()),
                        data: None,
                    }),
                    parts: None,
                },
                MessagePart {
                    filename: Some("logo.png".to_string()),
                    body: Some(PartBody {
                        attachment_id: Some("att-2".to_string()),
                        data: None,
                    }),
                    parts: None,
                },
                MessagePart {
                    filename: None,
                    body: None,
                    parts: Some(vec![MessagePart {
                        filename: Some("Extra.CSV".to_string()),
                        body: Some(PartBody {
                            attachment_id: None,
                            data: Some("ZGF0YQ==".to_string()),
                        }),
                        parts: None,
                    }]),
                },
            ]),
        };

        let mut parts = Vec::new();
        collect_csv_parts(&tree, &mut parts);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0, "WeeklySummary.csv");
        assert_eq!(parts[1].0, "Extra.CSV");
    }

    #[test]
    fn test_message_deserialization() {
        let raw = r#"{
            "internalDate": "1705276800000",
            "payload": {
                "filename": "",
                "parts": [{
                    "filename": "WeeklySummary.csv",
                    "body": {"attachmentId": "abc123"}
                }]
            }
        }"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.internal_date.as_deref(), Some("1705276800000"));
        let payload = msg.payload.unwrap();
        let parts = payload.parts.unwrap();
        assert_eq!(parts[0].filename.as_deref(), Some("WeeklySummary.csv"));
        assert_eq!(
            parts[0].body.as_ref().unwrap().attachment_id.as_deref(),
            Some("abc123")
        );
    }
}
