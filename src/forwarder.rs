use crate::config::ApiConfig;
use crate::error::RemoteError;
use crate::mapping::PurchaseInvoice;
use crate::remote::check_status;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::info;

/// Downstream ERP endpoint that accepts purchase invoices.
#[async_trait]
pub trait InvoiceForwarder: Send + Sync {
    /// Post one invoice; the returned value is the service's acknowledgement body.
    async fn forward(&self, invoice: &PurchaseInvoice) -> Result<Value, RemoteError>;
}

pub struct HttpForwarder {
    client: Client,
    url: String,
}

impl HttpForwarder {
    pub fn new(client: Client, api: &ApiConfig) -> Self {
        Self {
            client,
            url: api.url(&api.forward_path),
        }
    }
}

#[async_trait]
impl InvoiceForwarder for HttpForwarder {
    async fn forward(&self, invoice: &PurchaseInvoice) -> Result<Value, RemoteError> {
        info!(
            card_code = %invoice.card_code,
            lines = invoice.document_lines.len(),
            url = %self.url,
            "Posting purchase invoice"
        );

        let response = self.client.post(&self.url).json(invoice).send().await?;
        let response = check_status(response).await?;
        let status = response.status();
        let body = response.text().await?;

        // empty or non-JSON body acks as null
        let ack = serde_json::from_str(&body).unwrap_or(Value::Null);
        info!(status = %status, "Purchase invoice accepted");
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::DocumentLine;
    use crate::remote::tests::serve_once;
    use reqwest::StatusCode;
    use serde_json::json;

    fn forwarder_at(base_url: &str) -> HttpForwarder {
        let api = ApiConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            ..ApiConfig::default()
        };
        HttpForwarder::new(crate::remote::build_client(&api).unwrap(), &api)
    }

    fn invoice() -> PurchaseInvoice {
        PurchaseInvoice {
            card_code: json!("C1"),
            document_lines: vec![DocumentLine {
                item_code: json!("I1"),
                uom_entry: json!(5),
                tax_code: json!("T1"),
            }],
        }
    }

    #[tokio::test]
    async fn empty_created_body_acks_as_null() {
        let (base_url, server) = serve_once("201 Created", "").await;

        let ack = forwarder_at(&base_url).forward(&invoice()).await.unwrap();
        assert_eq!(ack, Value::Null);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /sap/PurchaseInvoices "), "{request}");
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(request.ends_with(
            r#"{"CardCode":"C1","DocumentLines":[{"ItemCode":"I1","UoMEntry":5,"TaxCode":"T1"}]}"#
        ));
    }

    #[tokio::test]
    async fn json_ack_is_returned() {
        let (base_url, server) = serve_once("200 OK", r#"{"DocEntry":7}"#).await;
        let ack = forwarder_at(&base_url).forward(&invoice()).await.unwrap();
        server.await.unwrap();
        assert_eq!(ack, json!({"DocEntry": 7}));
    }

    #[tokio::test]
    async fn rejected_invoice_is_a_status_error() {
        let (base_url, server) = serve_once("400 Bad Request", r#"{"error":"bad card"}"#).await;
        let err = forwarder_at(&base_url).forward(&invoice()).await.unwrap_err();
        server.await.unwrap();
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
        assert!(err.to_string().contains("bad card"));
    }
}
