//! Price-list responses for batches of item ids

use crate::crawler::fetcher::FetchedPage;
use crate::crawler::pipeline::{Extraction, ExtractionError, ExtractionPipeline};
use crate::crawler::request::{Record, Request, RequestKind};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct PriceListResponse {
    #[serde(rename = "StoitemPriceList")]
    items: Vec<PriceListItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PriceListItem {
    sti_id: Value,
    sti_price: f64,
    sip_price0: f64,
    #[serde(default)]
    price_ref: f64,
    #[serde(default)]
    price_ref2: f64,
    tax_rate: f64,
}

impl PriceListItem {
    fn item_id(&self) -> Option<String> {
        match &self.sti_id {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn with_tax(&self, base: f64) -> u64 {
        let gross = (base + self.price_ref + self.price_ref2) * (1.0 + self.tax_rate / 100.0);
        gross.round().max(0.0) as u64
    }

    /// Current price, and the original price when the item is discounted
    fn prices(&self) -> (u64, Option<u64>) {
        let current = self.with_tax(self.sti_price);
        if self.sti_price == self.sip_price0 {
            (current, None)
        } else {
            (current, Some(self.with_tax(self.sip_price0)))
        }
    }
}

pub struct PriceListPipeline;

impl ExtractionPipeline for PriceListPipeline {
    fn extract(&self, request: &Request, page: &FetchedPage) -> Result<Extraction, ExtractionError> {
        let RequestKind::PriceBatch { ids } = &request.kind else {
            return Err(ExtractionError::Unsupported(request.kind.label()));
        };

        let response: PriceListResponse = serde_json::from_str(&page.body)?;

        let mut records = Vec::with_capacity(response.items.len());
        for item in &response.items {
            let Some(item_id) = item.item_id() else {
                tracing::warn!("Price entry without StiId in batch at {}", request.url);
                continue;
            };
            let (current, original) = item.prices();
            records.push(Record::new(item_id, request.url.clone()).with_prices(Some(current), original));
        }

        if records.len() < ids.len() {
            tracing::debug!(
                "Price batch answered {} of {} ids",
                records.len(),
                ids.len()
            );
        }

        Ok(Extraction {
            records,
            ..Extraction::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_request() -> Request {
        Request::new(
            "https://shop.cz/Product/GetPrices",
            RequestKind::PriceBatch {
                ids: vec!["1".to_string(), "2".to_string()],
            },
        )
        .unwrap()
        .with_dedup_key("price-batch:0")
    }

    fn page(body: &str) -> FetchedPage {
        FetchedPage {
            url: "https://shop.cz/Product/GetPrices".to_string(),
            status: 200,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_discounted_price_derivation() {
        let body = r#"{"StoitemPriceList":[
            {"StiId":1,"StiPrice":1000,"SipPrice0":1200,"PriceRef":0,"PriceRef2":0,"TaxRate":21}
        ]}"#;
        let extraction = PriceListPipeline.extract(&batch_request(), &page(body)).unwrap();

        let record = &extraction.records[0];
        assert_eq!(record.item_id, "1");
        assert_eq!(record.current_price, Some(1210));
        assert_eq!(record.original_price, Some(1452));
        assert!(record.discounted);
    }

    #[test]
    fn test_undiscounted_price() {
        let body = r#"{"StoitemPriceList":[
            {"StiId":"2","StiPrice":826.45,"SipPrice0":826.45,"PriceRef":10,"TaxRate":21}
        ]}"#;
        let extraction = PriceListPipeline.extract(&batch_request(), &page(body)).unwrap();

        let record = &extraction.records[0];
        assert_eq!(record.item_id, "2");
        assert_eq!(record.current_price, Some(1012));
        assert_eq!(record.original_price, None);
        assert!(!record.discounted);
    }

    #[test]
    fn test_entries_without_id_skipped() {
        let body = r#"{"StoitemPriceList":[
            {"StiId":null,"StiPrice":1,"SipPrice0":1,"TaxRate":0},
            {"StiId":5,"StiPrice":1,"SipPrice0":1,"TaxRate":0}
        ]}"#;
        let extraction = PriceListPipeline.extract(&batch_request(), &page(body)).unwrap();
        assert_eq!(extraction.records.len(), 1);
        assert_eq!(extraction.records[0].item_id, "5");
    }

    #[test]
    fn test_malformed_json() {
        let result = PriceListPipeline.extract(&batch_request(), &page("<html>oops</html>"));
        assert!(matches!(result, Err(ExtractionError::Json(_))));
    }

    #[test]
    fn test_rejects_catalog_requests() {
        let request = Request::new("https://shop.cz/", RequestKind::Start).unwrap();
        assert!(matches!(
            PriceListPipeline.extract(&request, &page("{}")),
            Err(ExtractionError::Unsupported("START"))
        ));
    }
}
