//! Shared types for the BANKROLL ledger.
//!
//! Accounts, wagers and ledger entries form the data model used by the
//! storage backends and the engine. Money is always `Decimal` at a scale
//! of two places; statuses and entry kinds are closed enums normalised at
//! the string boundary.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Decimal places carried by every balance, stake and payout.
pub const MONEY_SCALE: u32 = 2;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map($name)
                    .map_err(|_| LedgerError::Validation(format!("invalid {}: {s}", stringify!($name))))
            }
        }
    };
}

id_type!(
    /// Opaque account identifier, supplied by the identity layer.
    AccountId
);
id_type!(
    /// Wager identifier.
    WagerId
);
id_type!(
    /// Ledger entry identifier.
    EntryId
);

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// Round an amount to the ledger's money scale.
pub fn to_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Whether an amount is already representable at the money scale.
pub fn is_money(amount: Decimal) -> bool {
    amount.normalize().scale() <= MONEY_SCALE
}

/// `stake × odds` at the money scale, or `None` when it cannot be represented.
pub fn checked_payout(stake: Decimal, odds: Decimal) -> Option<Decimal> {
    stake.checked_mul(odds).map(to_money)
}

/// `balance + amount`; overflow is an error, never a panic.
pub fn credit(balance: Decimal, amount: Decimal) -> Result<Decimal, LedgerError> {
    balance.checked_add(amount).ok_or_else(|| {
        LedgerError::Validation(format!("crediting {amount} would overflow balance {balance}"))
    })
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A user's bankroll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Decimal,
    /// Balance the account was provisioned with. The ledger is reconciled
    /// against this figure.
    pub opening_balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn open(opening_balance: Decimal) -> Self {
        let opening_balance = to_money(opening_balance);
        Self {
            id: AccountId::new(),
            balance: opening_balance,
            opening_balance,
            created_at: Utc::now(),
        }
    }

    /// Whether the account can cover a stake of `amount`.
    pub fn can_cover(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account {} balance={:.2}", self.id, self.balance)
    }
}

// ---------------------------------------------------------------------------
// Wager status & outcome
// ---------------------------------------------------------------------------

/// Lifecycle status of a wager. Moves exactly once, from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
}

impl WagerStatus {
    pub const ALL: &'static [WagerStatus] = &[WagerStatus::Pending, WagerStatus::Won, WagerStatus::Lost];

    pub fn as_str(&self) -> &'static str {
        match self {
            WagerStatus::Pending => "PENDING",
            WagerStatus::Won => "WON",
            WagerStatus::Lost => "LOST",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WagerStatus::Pending)
    }
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a status in any casing ("pending", "WON", "Lost").
impl FromStr for WagerStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(WagerStatus::Pending),
            "WON" => Ok(WagerStatus::Won),
            "LOST" => Ok(WagerStatus::Lost),
            _ => Err(LedgerError::Validation(format!("unknown wager status: {s}"))),
        }
    }
}

/// Terminal result applied by resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Won,
    Lost,
}

impl From<Outcome> for WagerStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Won => WagerStatus::Won,
            Outcome::Lost => WagerStatus::Lost,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(WagerStatus::from(*self).as_str())
    }
}

impl FromStr for Outcome {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<WagerStatus>()? {
            WagerStatus::Won => Ok(Outcome::Won),
            WagerStatus::Lost => Ok(Outcome::Lost),
            WagerStatus::Pending => Err(LedgerError::Validation(
                "outcome must be WON or LOST".to_string(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Decoded view of a wager's selection payload: which external event the
/// wager is on and which side was picked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(alias = "match_id")]
    pub event_id: String,
    #[serde(alias = "selection")]
    pub side: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
}

impl Selection {
    pub fn new(event_id: impl Into<String>, side: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            side: side.into(),
            team_name: None,
        }
    }

    /// Decode a stored payload. Returns `None` for payloads that do not
    /// name both an event and a side.
    pub fn decode(payload: &serde_json::Value) -> Option<Self> {
        let selection: Selection = serde_json::from_value(payload.clone()).ok()?;
        if selection.event_id.trim().is_empty() || selection.side.trim().is_empty() {
            return None;
        }
        Some(selection)
    }

    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn references(&self, event_id: &str) -> bool {
        self.event_id.trim() == event_id.trim()
    }

    /// The single settlement rule: a wager wins iff its side is the
    /// winning side (case-insensitive).
    pub fn outcome_for(&self, winning_side: &str) -> Outcome {
        if normalize_side(&self.side) == normalize_side(winning_side) {
            Outcome::Won
        } else {
            Outcome::Lost
        }
    }
}

pub fn normalize_side(side: &str) -> String {
    side.trim().to_ascii_uppercase()
}

// ---------------------------------------------------------------------------
// Wager
// ---------------------------------------------------------------------------

/// A placed bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wager {
    pub id: WagerId,
    pub account_id: AccountId,
    pub title: String,
    /// e.g. "nba", "cs2"
    pub sport_key: String,
    pub stake: Decimal,
    pub odds: Decimal,
    pub status: WagerStatus,
    /// Opaque payload, stored verbatim.
    pub selection: serde_json::Value,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Wager {
    pub fn pending(account_id: AccountId, ticket: &WagerTicket) -> Self {
        Self {
            id: WagerId::new(),
            account_id,
            title: ticket.title.clone(),
            sport_key: ticket.sport_key.clone(),
            stake: ticket.stake,
            odds: ticket.odds,
            status: WagerStatus::Pending,
            selection: ticket.selection.clone(),
            notes: ticket.notes.clone(),
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// `stake × odds` at the money scale.
    pub fn payout(&self) -> Result<Decimal, LedgerError> {
        checked_payout(self.stake, self.odds).ok_or_else(|| {
            LedgerError::Validation(format!("payout of wager {} overflows", self.id))
        })
    }

    pub fn decoded_selection(&self) -> Option<Selection> {
        Selection::decode(&self.selection)
    }

    pub fn is_pending(&self) -> bool {
        self.status == WagerStatus::Pending
    }
}

impl fmt::Display for Wager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} stake={:.2} @ {} ({})",
            self.status, self.title, self.stake, self.odds, self.id,
        )
    }
}

/// Placement request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerTicket {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sport_key: String,
    pub stake: Decimal,
    pub odds: Decimal,
    pub selection: serde_json::Value,
    #[serde(default)]
    pub notes: Option<String>,
}

impl WagerTicket {
    pub fn new(stake: Decimal, odds: Decimal, selection: Selection) -> Self {
        Self {
            title: format!("{} @ {}", selection.side, selection.event_id),
            sport_key: String::new(),
            stake,
            odds,
            selection: selection.to_payload(),
            notes: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_sport(mut self, sport_key: impl Into<String>) -> Self {
        self.sport_key = sport_key.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Reject tickets that must never reach the ledger.
    pub fn validate(&self) -> Result<Selection, LedgerError> {
        if self.stake <= Decimal::ZERO {
            return Err(LedgerError::Validation("stake must be greater than zero".into()));
        }
        if !is_money(self.stake) {
            return Err(LedgerError::Validation(format!(
                "stake {} has more than {MONEY_SCALE} decimal places",
                self.stake
            )));
        }
        if self.odds <= Decimal::ZERO {
            return Err(LedgerError::Validation("odds must be greater than zero".into()));
        }
        if checked_payout(self.stake, self.odds).is_none() {
            return Err(LedgerError::Validation(format!(
                "payout of {} at odds {} cannot be represented",
                self.stake, self.odds
            )));
        }
        Selection::decode(&self.selection).ok_or_else(|| {
            LedgerError::Validation("selection must name an event and a side".into())
        })
    }
}

// ---------------------------------------------------------------------------
// Ledger entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    BetPlaced,
    BetPayout,
    Deposit,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::BetPlaced => "BET_PLACED",
            EntryKind::BetPayout => "BET_PAYOUT",
            EntryKind::Deposit => "DEPOSIT",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BET_PLACED" => Ok(EntryKind::BetPlaced),
            "BET_PAYOUT" => Ok(EntryKind::BetPayout),
            "DEPOSIT" => Ok(EntryKind::Deposit),
            _ => Err(LedgerError::Validation(format!("unknown entry kind: {s}"))),
        }
    }
}

/// Append-only audit record of a balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub account_id: AccountId,
    /// Negative for stakes, positive for payouts and deposits.
    pub amount: Decimal,
    pub kind: EntryKind,
    pub description: String,
    pub reference_id: Option<WagerId>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn stake(wager: &Wager) -> Self {
        Self {
            id: EntryId::new(),
            account_id: wager.account_id,
            amount: -wager.stake,
            kind: EntryKind::BetPlaced,
            description: format!("Wager placed: {}", wager.title),
            reference_id: Some(wager.id),
            created_at: Utc::now(),
        }
    }

    pub fn payout(wager: &Wager, payout: Decimal) -> Self {
        Self {
            id: EntryId::new(),
            account_id: wager.account_id,
            amount: payout,
            kind: EntryKind::BetPayout,
            description: format!("Wager won: {}", wager.title),
            reference_id: Some(wager.id),
            created_at: Utc::now(),
        }
    }

    pub fn deposit(account_id: AccountId, amount: Decimal) -> Self {
        Self {
            id: EntryId::new(),
            account_id,
            amount,
            kind: EntryKind::Deposit,
            description: "Deposit".to_string(),
            reference_id: None,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Optional filters for wager history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WagerFilter {
    pub status: Option<WagerStatus>,
    pub sport_key: Option<String>,
}

impl WagerFilter {
    pub fn status(status: WagerStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, wager: &Wager) -> bool {
        self.status.map_or(true, |s| wager.status == s)
            && self
                .sport_key
                .as_deref()
                .map_or(true, |k| wager.sport_key == k)
    }
}

/// 1-based page request, already clamped by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// One page of results plus the unpaged total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    /// Slice an already-ordered collection.
    pub fn slice(items: Vec<T>, req: PageRequest) -> Self {
        let total = items.len() as u64;
        let data = items
            .into_iter()
            .skip(req.offset() as usize)
            .take(req.limit as usize)
            .collect();
        Self {
            data,
            total,
            page: req.page,
            limit: req.limit,
        }
    }
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

/// Read-only performance aggregate for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub balance: Decimal,
    pub total_staked: Decimal,
    pub total_returned: Decimal,
    pub wins: u64,
    pub losses: u64,
    pub pending: u64,
    /// Percentage of resolved wagers that won.
    pub win_rate: Decimal,
    pub net_profit: Decimal,
    /// Net profit over total staked, as a percentage.
    pub roi: Decimal,
}

/// Result of checking `balance == opening_balance + Σ entries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerAudit {
    pub account_id: AccountId,
    pub opening_balance: Decimal,
    pub entries_total: Decimal,
    pub entry_count: usize,
    pub balance: Decimal,
}

impl LedgerAudit {
    pub fn expected_balance(&self) -> Decimal {
        self.opening_balance + self.entries_total
    }

    pub fn is_consistent(&self) -> bool {
        self.expected_balance() == self.balance
    }

    pub fn discrepancy(&self) -> Decimal {
        self.balance - self.expected_balance()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error taxonomy of the ledger core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient funds: need {needed:.2}, have {available:.2}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Wager {0} has already been resolved")]
    AlreadyResolved(WagerId),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn account_not_found(id: AccountId) -> Self {
        LedgerError::NotFound(format!("account {id}"))
    }

    pub fn wager_not_found(id: WagerId) -> Self {
        LedgerError::NotFound(format!("wager {id}"))
    }

    /// Only storage failures may succeed on a later attempt; every other
    /// variant is a business outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage(_))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => LedgerError::NotFound("row".to_string()),
            other => LedgerError::Storage(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
