use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::accounting::TransactionType;
use crate::error::LedgerError;
use crate::ledger::{NewAccountFee, SortField, SortOrder, TransactionFilter};
use crate::service::{end_of_day, parse_date, NewTransaction, TransactionQuery};

const MAX_TICKER_LEN: usize = 16;

/// Body of `POST /transactions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub ticker: String,
    #[serde(rename = "type")]
    pub transaction_type: String,
    pub quantity: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
    pub transaction_date: String,
    pub stock_account_id: Option<String>,
    pub notes: Option<String>,
}

impl CreateTransactionRequest {
    pub fn validate(self) -> Result<NewTransaction, LedgerError> {
        let ticker = self.ticker.trim();
        if ticker.is_empty() {
            return Err(LedgerError::validation("ticker is required"));
        }
        if ticker.len() > MAX_TICKER_LEN
            || !ticker.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(LedgerError::validation(format!("invalid ticker \"{}\"", ticker)));
        }
        let transaction_type: TransactionType =
            self.transaction_type.parse().map_err(LedgerError::Validation)?;
        if self.quantity <= Decimal::ZERO {
            return Err(LedgerError::validation("quantity must be greater than zero"));
        }
        if self.price < Decimal::ZERO {
            return Err(LedgerError::validation("price must not be negative"));
        }
        if self.fee < Decimal::ZERO {
            return Err(LedgerError::validation("fee must not be negative"));
        }
        if self.tax_rate < Decimal::ZERO || self.tax_rate > Decimal::ONE_HUNDRED {
            return Err(LedgerError::validation("tax rate must be between 0 and 100"));
        }

        Ok(NewTransaction {
            ticker: ticker.to_string(),
            transaction_type,
            quantity: self.quantity,
            price: self.price,
            fee: self.fee,
            tax_rate: self.tax_rate,
            transaction_date: parse_date(&self.transaction_date)?,
            stock_account_id: self.stock_account_id,
            notes: self.notes,
        })
    }
}

/// Query string of `GET /transactions`.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTransactionsQuery {
    pub ticker: Option<String>,
    #[serde(rename = "type")]
    pub transaction_type: Option<String>,
    pub stock_account_id: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

impl ListTransactionsQuery {
    /// Stable text form used as the cache key.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn into_query(self) -> Result<TransactionQuery, LedgerError> {
        let transaction_type = match self.transaction_type.as_deref() {
            Some(kind) if !kind.is_empty() => Some(kind.parse().map_err(LedgerError::Validation)?),
            _ => None,
        };
        let filter = TransactionFilter {
            ticker: self.ticker.filter(|t| !t.trim().is_empty()),
            transaction_type,
            stock_account_id: self.stock_account_id.filter(|a| !a.is_empty()),
            date_from: self.date_from.as_deref().map(parse_date).transpose()?,
            date_to: self.date_to.as_deref().map(end_of_day).transpose()?,
            min_price: self.min_amount,
            max_price: self.max_amount,
        };

        // unknown sort fields fall back to the default ordering
        let sort = self
            .sort_by
            .as_deref()
            .and_then(|field| field.parse::<SortField>().ok())
            .unwrap_or(SortField::TransactionDate);
        let order = match self.sort_order.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        };

        Ok(TransactionQuery {
            filter,
            sort,
            order,
            page: self.page.unwrap_or(1),
            page_size: self.page_size.unwrap_or(10),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountQuery {
    pub stock_account_id: Option<String>,
    pub ticker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub name: String,
    pub broker_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountFeeRequest {
    pub stock_account_id: String,
    pub amount: Decimal,
    pub fee_date: String,
    pub description: Option<String>,
}

impl CreateAccountFeeRequest {
    pub fn validate(self) -> Result<NewAccountFee, LedgerError> {
        if self.amount < Decimal::ZERO {
            return Err(LedgerError::validation("account fee must not be negative"));
        }
        Ok(NewAccountFee {
            stock_account_id: self.stock_account_id,
            amount: self.amount,
            fee_date: parse_date(&self.fee_date)?,
            description: self.description,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(body: &str) -> CreateTransactionRequest {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn numbers_and_defaults_decode() {
        let input = request(
            r#"{"ticker":" vnm ","type":"BUY","quantity":100,"price":10.5,"transactionDate":"2024-01-02"}"#,
        )
        .validate()
        .unwrap();

        assert_eq!(input.ticker, "vnm");
        assert_eq!(input.quantity, dec!(100));
        assert_eq!(input.price, dec!(10.5));
        assert_eq!(input.fee, Decimal::ZERO);
        assert_eq!(input.tax_rate, Decimal::ZERO);
        assert!(input.stock_account_id.is_none());
    }

    #[test]
    fn rejects_bad_fields_before_the_engine() {
        let zero = request(
            r#"{"ticker":"VNM","type":"BUY","quantity":0,"price":10,"transactionDate":"2024-01-02"}"#,
        );
        assert!(matches!(zero.validate(), Err(LedgerError::Validation(_))));

        let kind = request(
            r#"{"ticker":"VNM","type":"HOLD","quantity":1,"price":10,"transactionDate":"2024-01-02"}"#,
        );
        assert!(matches!(kind.validate(), Err(LedgerError::Validation(_))));

        let date = request(
            r#"{"ticker":"VNM","type":"SELL","quantity":1,"price":10,"transactionDate":"yesterday"}"#,
        );
        assert!(matches!(date.validate(), Err(LedgerError::Validation(_))));

        let tax = request(
            r#"{"ticker":"VNM","type":"BUY","quantity":1,"price":10,"taxRate":500,"transactionDate":"2024-01-02"}"#,
        );
        assert!(matches!(tax.validate(), Err(LedgerError::Validation(_))));

        let ticker = request(
            r#"{"ticker":"DROP TABLE","type":"BUY","quantity":1,"price":10,"transactionDate":"2024-01-02"}"#,
        );
        assert!(matches!(ticker.validate(), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn listing_query_defaults_and_fallbacks() {
        let query = ListTransactionsQuery {
            sort_by: Some("notes".to_string()),
            sort_order: Some("ASC".to_string()),
            date_to: Some("2024-01-31".to_string()),
            ..Default::default()
        }
        .into_query()
        .unwrap();

        assert_eq!(query.sort, SortField::TransactionDate);
        assert_eq!(query.order, SortOrder::Asc);
        assert_eq!((query.page, query.page_size), (1, 10));
        assert_eq!(
            query.filter.date_to.map(|d| d.to_rfc3339()),
            Some("2024-02-01T00:00:00+00:00".to_string())
        );
    }
}
