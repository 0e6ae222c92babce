use crate::errors::SnapshotError;

use serde::Deserialize;

/// A complete price reading for one product at one point in time.
///
/// Besides the two decoded prices, the snapshot keeps the exact response body
/// it was decoded from: that body is what gets forwarded to the client.
#[derive(Clone, Debug)]
pub struct PriceSnapshot {
    /// Purchase price reported by the backend.
    pub purchase_price: f64,

    /// Sale price reported by the backend.
    pub sale_price: f64,

    /// Serialized backend response body, forwarded verbatim.
    pub raw: Vec<u8>,
}

/// A price field as the backend may encode it.
///
/// PostgreSQL `NUMERIC` columns come out of the JSON layer as strings, so
/// both `300` and `"300.00"` are accepted.
#[derive(Deserialize)]
#[serde(untagged)]
enum PriceValue {
    Number(f64),
    Text(String),
}

impl PriceValue {
    fn into_f64(self) -> Result<f64, SnapshotError> {
        match self {
            PriceValue::Number(n) => Ok(n),
            PriceValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or(SnapshotError::NotNumeric(s)),
        }
    }
}

#[derive(Deserialize)]
struct PriceFields {
    #[serde(alias = "purchasePrice")]
    purchaseprice: PriceValue,
    #[serde(alias = "salePrice")]
    saleprice: PriceValue,
}

impl PriceSnapshot {
    /// Builds a snapshot directly from prices, serializing a minimal body.
    pub fn new(purchase_price: f64, sale_price: f64) -> Self {
        let raw = serde_json::json!({
            "purchaseprice": purchase_price,
            "saleprice": sale_price,
        })
        .to_string()
        .into_bytes();
        Self {
            purchase_price,
            sale_price,
            raw,
        }
    }

    /// Decodes a successful backend response body.
    ///
    /// Fails unless both `purchaseprice` and `saleprice` are present and
    /// numeric. Other fields are ignored but remain part of [`raw`](Self::raw).
    ///
    /// # Example
    ///
    /// ```
    /// use price_relay::price_snapshot::PriceSnapshot;
    /// let body = br#"{"id":5,"purchaseprice":"300.00","saleprice":304}"#;
    /// let snap = PriceSnapshot::from_body(body).unwrap();
    /// assert_eq!(snap.purchase_price, 300.0);
    /// assert_eq!(snap.sale_price, 304.0);
    /// ```
    pub fn from_body(body: &[u8]) -> Result<Self, SnapshotError> {
        let fields: PriceFields = serde_json::from_slice(body)?;
        Ok(Self {
            purchase_price: fields.purchaseprice.into_f64()?,
            sale_price: fields.saleprice.into_f64()?,
            raw: body.to_vec(),
        })
    }

    /// Returns `true` when both prices are numerically equal to `other`'s.
    ///
    /// The raw payloads are not compared.
    pub fn same_prices(&self, other: &PriceSnapshot) -> bool {
        self.purchase_price == other.purchase_price && self.sale_price == other.sale_price
    }
}
