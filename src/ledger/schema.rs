pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stock_accounts (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    name        TEXT NOT NULL,
    broker_name TEXT,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_stock_accounts_user
    ON stock_accounts (user_id, created_at);

CREATE TABLE IF NOT EXISTS transactions (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id          TEXT NOT NULL,
    stock_account_id TEXT NOT NULL,
    ticker           TEXT NOT NULL,
    type             TEXT NOT NULL CHECK (type IN ('BUY', 'SELL')),
    quantity         TEXT NOT NULL,
    price            TEXT NOT NULL,
    fee              TEXT NOT NULL,
    tax_rate         TEXT NOT NULL,
    transaction_date TEXT NOT NULL,
    calculated_pl    TEXT,
    notes            TEXT,
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transactions_user_date
    ON transactions (user_id, transaction_date, id);

CREATE TABLE IF NOT EXISTS purchase_lots (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id            TEXT NOT NULL,
    stock_account_id   TEXT NOT NULL,
    ticker             TEXT NOT NULL,
    quantity_original  TEXT NOT NULL,
    quantity_remaining TEXT NOT NULL,
    unit_cost          TEXT NOT NULL,
    fee                TEXT NOT NULL,
    fee_remaining      TEXT NOT NULL,
    exhausted          INTEGER NOT NULL DEFAULT 0,
    acquired_at        TEXT NOT NULL,
    transaction_id     INTEGER REFERENCES transactions (id)
);
CREATE INDEX IF NOT EXISTS idx_purchase_lots_owner
    ON purchase_lots (user_id, stock_account_id, ticker, exhausted, acquired_at, id);

CREATE TABLE IF NOT EXISTS sales (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id          TEXT NOT NULL,
    stock_account_id TEXT NOT NULL,
    ticker           TEXT NOT NULL,
    quantity         TEXT NOT NULL,
    price            TEXT NOT NULL,
    fee              TEXT NOT NULL,
    tax_rate         TEXT NOT NULL,
    tax_rule         TEXT NOT NULL,
    tax_amount       TEXT NOT NULL,
    gross_proceeds   TEXT NOT NULL,
    cost_basis       TEXT NOT NULL,
    profit_or_loss   TEXT NOT NULL,
    rounding_scale   INTEGER NOT NULL,
    sold_at          TEXT NOT NULL,
    transaction_id   INTEGER REFERENCES transactions (id)
);
CREATE INDEX IF NOT EXISTS idx_sales_transaction ON sales (transaction_id);

CREATE TABLE IF NOT EXISTS sale_consumptions (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    sale_id            INTEGER NOT NULL REFERENCES sales (id),
    lot_id             INTEGER NOT NULL REFERENCES purchase_lots (id),
    quantity_consumed  TEXT NOT NULL,
    unit_cost          TEXT NOT NULL,
    fee_portion        TEXT NOT NULL,
    cost_basis_portion TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sale_consumptions_sale ON sale_consumptions (sale_id, id);

CREATE TABLE IF NOT EXISTS account_fees (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id          TEXT NOT NULL,
    stock_account_id TEXT NOT NULL,
    amount           TEXT NOT NULL,
    fee_date         TEXT NOT NULL,
    description      TEXT,
    is_active        INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_account_fees_user ON account_fees (user_id, fee_date);
";
