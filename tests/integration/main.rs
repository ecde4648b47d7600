//! Integration tests: the price store, offer tracker, ledger and
//! opportunity engine wired together over a deterministic provider.

mod mock_provider;
mod session;
