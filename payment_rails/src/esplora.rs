use std::{sync::Arc, time::Duration};

use bazaar_payment_engine::{
    db_types::PaymentAddress,
    traits::{FundingTx, PaymentSource, PaymentSourceError},
};
use bzr_common::Sats;
use chrono::DateTime;
use log::*;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};

use crate::{config::EsploraConfig, error::RailsError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only chain access through the Esplora HTTP API (blockstream.info, mempool.space, or a self-hosted
/// instance).
#[derive(Clone)]
pub struct EsploraClient {
    config: EsploraConfig,
    client: Arc<Client>,
}

impl EsploraClient {
    pub fn new(config: EsploraConfig) -> Result<Self, RailsError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RailsError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PaymentSourceError> {
        let url = self.url(path);
        trace!("Sending esplora query: {url}");
        let response =
            self.client.get(url).send().await.map_err(|e| PaymentSourceError::SourceUnavailable(e.to_string()))?;
        if response.status().is_success() {
            response.json::<T>().await.map_err(|e| PaymentSourceError::SourceUnavailable(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| PaymentSourceError::SourceUnavailable(e.to_string()))?;
            Err(PaymentSourceError::SourceUnavailable(format!("esplora returned {status}: {message}")))
        }
    }
}

impl PaymentSource for EsploraClient {
    async fn funding_txs(&self, address: &PaymentAddress) -> Result<Vec<FundingTx>, PaymentSourceError> {
        if address.is_placeholder() {
            trace!("{address} is a placeholder, skipping the chain query");
            return Ok(Vec::new());
        }
        let path = format!("/address/{address}/txs");
        let txs = self.get_json::<Vec<EsploraTx>>(&path).await?;
        debug!("Esplora returned {} transactions for {address}", txs.len());
        let funding =
            txs.into_iter().map(|tx| tx.into_funding_tx(address)).filter(|tx| !tx.value.is_zero()).collect();
        Ok(funding)
    }
}

/// A transaction as returned by `GET /address/{address}/txs`. Only the fields the settlement loop reads.
#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTx {
    pub txid: String,
    pub status: EsploraTxStatus,
    pub vout: Vec<EsploraVout>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTxStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_time: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraVout {
    /// Absent for outputs with no address form, such as op_return.
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    pub value: i64,
}

impl EsploraTx {
    /// Collapses the transaction to the value it pays `address`, summed over its outputs. A transaction that
    /// only spends from the address sums to zero; the caller drops those.
    fn into_funding_tx(self, address: &PaymentAddress) -> FundingTx {
        let value = self
            .vout
            .iter()
            .filter(|v| v.scriptpubkey_address.as_deref() == Some(address.as_str()))
            .map(|v| v.value)
            .sum::<i64>();
        FundingTx {
            txid: self.txid,
            value: Sats::from(value),
            confirmed: self.status.confirmed,
            block_time: self.status.block_time.and_then(|t| DateTime::from_timestamp(t, 0)),
        }
    }
}

#[cfg(test)]
mod test {
    use bazaar_payment_engine::helpers::placeholder_address;
    use tokio::runtime::Runtime;

    use super::*;

    // Two payments into bc1qpaid and one spend out of it, with the extra fields a real
    // Esplora instance includes.
    const HISTORY: &str = r#"[
        {
            "txid": "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16",
            "version": 2,
            "locktime": 0,
            "vin": [{"txid": "aa", "vout": 0, "is_coinbase": false, "sequence": 4294967293}],
            "vout": [
                {"scriptpubkey": "0014aaaa", "scriptpubkey_type": "v0_p2wpkh", "scriptpubkey_address": "bc1qpaid", "value": 60000},
                {"scriptpubkey": "0014bbbb", "scriptpubkey_type": "v0_p2wpkh", "scriptpubkey_address": "bc1qpaid", "value": 10000},
                {"scriptpubkey": "0014cccc", "scriptpubkey_type": "v0_p2wpkh", "scriptpubkey_address": "bc1qchange", "value": 5000}
            ],
            "size": 222,
            "weight": 561,
            "fee": 141,
            "status": {
                "confirmed": true,
                "block_height": 840000,
                "block_hash": "00000000000000000001",
                "block_time": 1716400000
            }
        },
        {
            "txid": "6f7cf9580f1c2dfb3c4d5d043cdbb128c640e3f20161245aa7372e9666168516",
            "version": 2,
            "locktime": 0,
            "vin": [{"txid": "bb", "vout": 1, "is_coinbase": false, "sequence": 4294967293}],
            "vout": [
                {"scriptpubkey": "0014dddd", "scriptpubkey_type": "v0_p2wpkh", "scriptpubkey_address": "bc1qpaid", "value": 25000},
                {"scriptpubkey": "6a24deadbeef", "scriptpubkey_type": "op_return", "value": 0}
            ],
            "size": 200,
            "weight": 520,
            "fee": 120,
            "status": {"confirmed": false}
        },
        {
            "txid": "2d05f0c9c3e1c226e63b5fac240137687544cf631cd616fd34fd188fc9020866",
            "version": 2,
            "locktime": 0,
            "vin": [{"txid": "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16", "vout": 0, "is_coinbase": false, "sequence": 4294967293}],
            "vout": [
                {"scriptpubkey": "0014eeee", "scriptpubkey_type": "v0_p2wpkh", "scriptpubkey_address": "bc1qelsewhere", "value": 59000}
            ],
            "size": 191,
            "weight": 437,
            "fee": 1000,
            "status": {
                "confirmed": true,
                "block_height": 840001,
                "block_hash": "00000000000000000002",
                "block_time": 1716400600
            }
        }
    ]"#;

    #[test]
    fn history_collapses_to_per_tx_funding_values() {
        let txs: Vec<EsploraTx> = serde_json::from_str(HISTORY).unwrap();
        assert_eq!(txs.len(), 3);
        let address = PaymentAddress::from("bc1qpaid");

        let first = txs[0].clone().into_funding_tx(&address);
        assert_eq!(first.value, Sats::from(70_000));
        assert!(first.confirmed);
        assert_eq!(first.block_time.unwrap().timestamp(), 1716400000);

        let second = txs[1].clone().into_funding_tx(&address);
        assert_eq!(second.value, Sats::from(25_000));
        assert!(!second.confirmed);
        assert!(second.block_time.is_none());

        // The outgoing spend pays the address nothing.
        let third = txs[2].clone().into_funding_tx(&address);
        assert!(third.value.is_zero());
    }

    #[test]
    fn placeholder_addresses_never_touch_the_network() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async move {
            // Nothing listens here, so any network call would error out.
            let config = EsploraConfig { base_url: "http://127.0.0.1:1".to_string() };
            let source = EsploraClient::new(config).unwrap();
            let address = placeholder_address("sale-99");
            let txs = source.funding_txs(&address).await.unwrap();
            assert!(txs.is_empty());
        });
    }

    #[test]
    fn trailing_slashes_do_not_double_up() {
        let config = EsploraConfig { base_url: "https://esplora.local/api/".to_string() };
        let client = EsploraClient::new(config).unwrap();
        assert_eq!(client.url("/address/bc1qpaid/txs"), "https://esplora.local/api/address/bc1qpaid/txs");
    }
}
