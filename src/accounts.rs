use tracing::info;

use crate::error::{LedgerError, Result};
use crate::ledger::{LedgerTx, StockAccount};

/// Decides which stock account a transaction is booked against.
pub trait AccountLookup: Send + Sync {
    fn resolve(&self, tx: &LedgerTx<'_>, user_id: &str, requested: Option<&str>) -> Result<String>;
}

/// Explicit accounts must belong to the user; otherwise the account named
/// like the default, else the oldest one, else a freshly created default.
#[derive(Clone, Debug)]
pub struct DefaultAccountLookup {
    default_name: String,
}

impl DefaultAccountLookup {
    pub fn new(default_name: &str) -> DefaultAccountLookup {
        DefaultAccountLookup {
            default_name: default_name.to_string(),
        }
    }
}

impl AccountLookup for DefaultAccountLookup {
    fn resolve(&self, tx: &LedgerTx<'_>, user_id: &str, requested: Option<&str>) -> Result<String> {
        if let Some(account_id) = requested.map(str::trim).filter(|id| !id.is_empty()) {
            return match tx.account(account_id)? {
                Some(account) if account.user_id == user_id => Ok(account.id),
                _ => Err(LedgerError::validation(
                    "invalid stock account or account does not belong to user",
                )),
            };
        }

        let accounts = tx.accounts_for_user(user_id)?;
        if let Some(account) = accounts
            .iter()
            .find(|account| account.name == self.default_name)
            .or_else(|| accounts.first())
        {
            return Ok(account.id.clone());
        }

        let base = format!("default-{}", user_id);
        let id = match tx.account(&base)? {
            None => base,
            Some(_) => unused_id(tx, &base, 2)?,
        };
        info!(user_id, account_id = %id, "creating default stock account");
        tx.insert_account(user_id, &id, &self.default_name, None)?;
        Ok(id)
    }
}

/// Opens a new stock account for `user_id` with a generated id.
pub fn create_account(
    tx: &LedgerTx<'_>,
    user_id: &str,
    name: &str,
    broker_name: Option<&str>,
) -> Result<StockAccount> {
    if name.trim().is_empty() {
        return Err(LedgerError::validation("account name is required"));
    }
    let first = tx.accounts_for_user(user_id)?.len() + 1;
    let id = unused_id(tx, user_id, first)?;
    tx.insert_account(user_id, &id, name.trim(), broker_name)
}

/// First `{base}-{n}` from `n` upwards that no account of any user holds.
fn unused_id(tx: &LedgerTx<'_>, base: &str, mut n: usize) -> Result<String> {
    let mut id = format!("{}-{}", base, n);
    while tx.account(&id)?.is_some() {
        n += 1;
        id = format!("{}-{}", base, n);
    }
    Ok(id)
}
