//! Ledger schema.
//!
//! Creates the entry chain, credit pools and balances, plus the triggers that
//! keep entries append-only and pool remainders non-increasing.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // ============================================================
        // PART 1: ENUMS
        // ============================================================
        db.execute_unprepared(ENUMS_SQL).await?;

        // ============================================================
        // PART 2: TABLES
        // ============================================================
        db.execute_unprepared(LEDGER_ENTRIES_SQL).await?;
        db.execute_unprepared(CREDIT_POOLS_SQL).await?;
        db.execute_unprepared(BALANCES_SQL).await?;

        // ============================================================
        // PART 3: INTEGRITY TRIGGERS
        // ============================================================
        db.execute_unprepared(APPEND_ONLY_SQL).await?;
        db.execute_unprepared(POOL_GUARD_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_SQL).await?;
        Ok(())
    }
}

const ENUMS_SQL: &str = r"
CREATE TYPE ledger_entry_type AS ENUM ('CREDIT', 'DEBIT');
";

const LEDGER_ENTRIES_SQL: &str = r"
CREATE TABLE ledger_entries (
    id UUID PRIMARY KEY,
    organization_id VARCHAR(255) NOT NULL,
    user_id VARCHAR(255) NOT NULL,
    type ledger_entry_type NOT NULL,
    amount BIGINT NOT NULL,
    transaction_id VARCHAR(32) NOT NULL,
    reference_id VARCHAR(255) NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    previous_hash VARCHAR(64) NOT NULL,
    hash VARCHAR(64) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT ledger_entries_organization_id_reference_id_key UNIQUE (organization_id, reference_id),
    CONSTRAINT chk_ledger_entries_amount_positive CHECK (amount > 0),
    CONSTRAINT chk_ledger_entries_description_length CHECK (char_length(description) <= 1024)
);

-- Chain order per pair; also serves the tail lookup
CREATE INDEX idx_ledger_entries_chain
    ON ledger_entries(organization_id, user_id, created_at, id);
";

const CREDIT_POOLS_SQL: &str = r"
CREATE TABLE credit_pools (
    id UUID PRIMARY KEY,
    organization_id VARCHAR(255) NOT NULL,
    user_id VARCHAR(255) NOT NULL,
    ledger_entry_id UUID NOT NULL REFERENCES ledger_entries(id),
    remaining BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    consumed_at TIMESTAMPTZ,
    CONSTRAINT credit_pools_ledger_entry_id_key UNIQUE (ledger_entry_id),
    CONSTRAINT chk_credit_pools_remaining CHECK (remaining >= 0)
);

-- FIFO walk over open pools
CREATE INDEX idx_credit_pools_open
    ON credit_pools(organization_id, user_id, created_at, id)
    WHERE remaining > 0;
";

const BALANCES_SQL: &str = r"
CREATE TABLE balances (
    id UUID PRIMARY KEY,
    organization_id VARCHAR(255) NOT NULL,
    user_id VARCHAR(255) NOT NULL,
    balance BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT balances_organization_id_user_id_key UNIQUE (organization_id, user_id)
);
";

const APPEND_ONLY_SQL: &str = r"
CREATE OR REPLACE FUNCTION prevent_ledger_entry_mutation()
RETURNS TRIGGER AS $$
BEGIN
    RAISE EXCEPTION 'ledger_entries is append-only: % rejected', TG_OP;
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_ledger_entries_append_only
BEFORE UPDATE OR DELETE ON ledger_entries
FOR EACH ROW
EXECUTE FUNCTION prevent_ledger_entry_mutation();
";

const POOL_GUARD_SQL: &str = r"
CREATE OR REPLACE FUNCTION guard_credit_pool_update()
RETURNS TRIGGER AS $$
BEGIN
    IF TG_OP = 'DELETE' THEN
        RAISE EXCEPTION 'credit pools cannot be deleted';
    END IF;

    IF NEW.ledger_entry_id <> OLD.ledger_entry_id
        OR NEW.organization_id <> OLD.organization_id
        OR NEW.user_id <> OLD.user_id
        OR NEW.created_at <> OLD.created_at THEN
        RAISE EXCEPTION 'credit pool % identity is immutable', OLD.id;
    END IF;

    IF NEW.remaining > OLD.remaining THEN
        RAISE EXCEPTION 'credit pool % remaining may only decrease (% -> %)',
            OLD.id, OLD.remaining, NEW.remaining;
    END IF;

    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_credit_pools_guard
BEFORE UPDATE OR DELETE ON credit_pools
FOR EACH ROW
EXECUTE FUNCTION guard_credit_pool_update();
";

const DROP_SQL: &str = r"
DROP TABLE IF EXISTS balances CASCADE;
DROP TABLE IF EXISTS credit_pools CASCADE;
DROP TABLE IF EXISTS ledger_entries CASCADE;
DROP FUNCTION IF EXISTS guard_credit_pool_update();
DROP FUNCTION IF EXISTS prevent_ledger_entry_mutation();
DROP TYPE IF EXISTS ledger_entry_type;
";
