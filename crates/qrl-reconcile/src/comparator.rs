//! Pure comparison of local vs broker state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

use qrl_config::ReconcileConfig;
use qrl_schemas::{BrokerAccount, BrokerPosition, Position};

use crate::types::{Discrepancy, DiscrepancyType};

fn discrepancy(
    kind: DiscrepancyType,
    account_id: &str,
    symbol: Option<&str>,
    local: Option<Decimal>,
    broker: Option<Decimal>,
    now: DateTime<Utc>,
) -> Discrepancy {
    Discrepancy {
        kind,
        severity: kind.severity(),
        account_id: account_id.to_string(),
        symbol: symbol.map(str::to_string),
        local_value: local,
        broker_value: broker,
        timestamp: now,
    }
}

/// Compare local positions against broker positions, walking the symbol
/// union in deterministic order.
pub fn compare_positions(
    account_id: &str,
    local: &[Position],
    broker: &[BrokerPosition],
    now: DateTime<Utc>,
) -> Vec<Discrepancy> {
    let local_by_symbol: BTreeMap<&str, &Position> =
        local.iter().map(|p| (p.symbol.as_str(), p)).collect();
    let broker_by_symbol: BTreeMap<&str, &BrokerPosition> =
        broker.iter().map(|p| (p.symbol.as_str(), p)).collect();

    let symbols: BTreeSet<&str> = local_by_symbol
        .keys()
        .chain(broker_by_symbol.keys())
        .copied()
        .collect();

    let mut discrepancies = Vec::new();
    for symbol in symbols {
        match (local_by_symbol.get(symbol), broker_by_symbol.get(symbol)) {
            (None, Some(b)) => discrepancies.push(discrepancy(
                DiscrepancyType::MissingLocal,
                account_id,
                Some(symbol),
                None,
                Some(Decimal::from(b.quantity)),
                now,
            )),
            (Some(l), None) => discrepancies.push(discrepancy(
                DiscrepancyType::MissingBroker,
                account_id,
                Some(symbol),
                Some(Decimal::from(l.quantity)),
                None,
                now,
            )),
            (Some(l), Some(b)) if l.quantity != b.quantity => discrepancies.push(discrepancy(
                DiscrepancyType::QuantityMismatch,
                account_id,
                Some(symbol),
                Some(Decimal::from(l.quantity)),
                Some(Decimal::from(b.quantity)),
                now,
            )),
            (Some(l), Some(b)) if l.avg_cost != b.avg_cost => discrepancies.push(discrepancy(
                DiscrepancyType::CostMismatch,
                account_id,
                Some(symbol),
                Some(l.avg_cost),
                Some(b.avg_cost),
                now,
            )),
            _ => {}
        }
    }
    discrepancies
}

/// Compare local cash/equity against the broker account: cash with an
/// absolute tolerance, equity with a relative one.
pub fn compare_account(
    account_id: &str,
    local_cash: Decimal,
    local_equity: Decimal,
    broker: &BrokerAccount,
    config: &ReconcileConfig,
    now: DateTime<Utc>,
) -> Vec<Discrepancy> {
    let mut discrepancies = Vec::new();

    if (local_cash - broker.cash).abs() > config.cash_tolerance {
        discrepancies.push(discrepancy(
            DiscrepancyType::CashMismatch,
            account_id,
            None,
            Some(local_cash),
            Some(broker.cash),
            now,
        ));
    }

    if local_equity != Decimal::ZERO {
        let diff_pct = (local_equity - broker.total_equity).abs() / local_equity;
        if diff_pct > config.equity_tolerance_pct {
            discrepancies.push(discrepancy(
                DiscrepancyType::EquityMismatch,
                account_id,
                None,
                Some(local_equity),
                Some(broker.total_equity),
                now,
            ));
        }
    }

    discrepancies
}
