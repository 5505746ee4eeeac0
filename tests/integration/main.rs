//! End-to-end tests: the engine, scheduler and oracles running against both
//! ledger stores.

mod common;
mod mock_oracle;
mod ledger_flow;
mod scheduler_flow;
