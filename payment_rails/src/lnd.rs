use std::sync::Arc;

use bazaar_payment_engine::traits::{LightningError, LightningNode};
use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
    StatusCode,
};
use serde::Deserialize;

use crate::{config::LndConfig, error::RailsError};

/// Invoice lookups against an LND node's REST proxy.
#[derive(Clone)]
pub struct LndClient {
    config: LndConfig,
    client: Arc<Client>,
}

impl LndClient {
    pub fn new(config: LndConfig) -> Result<Self, RailsError> {
        let mut headers = HeaderMap::with_capacity(1);
        let val = HeaderValue::from_str(config.macaroon.reveal().as_str())
            .map_err(|e| RailsError::Initialization(e.to_string()))?;
        headers.insert("Grpc-Metadata-macaroon", val);
        let client =
            Client::builder().default_headers(headers).build().map_err(|e| RailsError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }
}

impl LightningNode for LndClient {
    async fn invoice_settled(&self, payment_hash: &str) -> Result<bool, LightningError> {
        let url = self.url(&format!("/v1/invoice/{payment_hash}"));
        trace!("Looking up invoice: {url}");
        let response = self.client.get(url).send().await.map_err(|e| LightningError::NodeUnavailable(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(LightningError::InvoiceNotFound(payment_hash.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| LightningError::NodeUnavailable(e.to_string()))?;
            return Err(LightningError::NodeUnavailable(format!("lnd returned {status}: {message}")));
        }
        let invoice = response.json::<LndInvoice>().await.map_err(|e| LightningError::NodeUnavailable(e.to_string()))?;
        debug!("Invoice {payment_hash} settled: {}", invoice.is_settled());
        Ok(invoice.is_settled())
    }
}

/// The slice of LND's `lnrpc.Invoice` the engine cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct LndInvoice {
    #[serde(default)]
    pub settled: bool,
    #[serde(default)]
    pub state: String,
}

impl LndInvoice {
    /// Older LND versions only populate the deprecated `settled` flag, newer ones the `state` enum.
    pub fn is_settled(&self) -> bool {
        self.state == "SETTLED" || self.settled
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn a_settled_invoice_reports_settled() {
        let body = r#"{
            "memo": "auction 14 entry",
            "r_preimage": "hzLrXiSIS1mLJ3l5BW0mVg==",
            "r_hash": "nZLB5ZBLUN0XCJczQakjXCYmQUdDVwQA1a3Hqy3IFAI=",
            "value": "10000",
            "value_msat": "10000000",
            "settled": true,
            "creation_date": "1716400000",
            "settle_date": "1716400100",
            "expiry": "3600",
            "state": "SETTLED",
            "amt_paid_sat": "10000"
        }"#;
        let invoice: LndInvoice = serde_json::from_str(body).unwrap();
        assert!(invoice.is_settled());
    }

    #[test]
    fn open_accepted_and_canceled_invoices_are_unpaid() {
        for state in ["OPEN", "ACCEPTED", "CANCELED"] {
            let body = format!(r#"{{"settled": false, "state": "{state}"}}"#);
            let invoice: LndInvoice = serde_json::from_str(&body).unwrap();
            assert!(!invoice.is_settled(), "{state} must not count as settled");
        }
    }

    #[test]
    fn legacy_responses_fall_back_to_the_settled_flag() {
        let invoice: LndInvoice = serde_json::from_str(r#"{"settled": true}"#).unwrap();
        assert!(invoice.is_settled());
        let invoice: LndInvoice = serde_json::from_str("{}").unwrap();
        assert!(!invoice.is_settled());
    }
}
